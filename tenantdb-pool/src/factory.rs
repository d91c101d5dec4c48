//! Pool Factory Adapter
//!
//! Lets callers receive a domain object built from a tenant's pool handle
//! instead of the raw handle. A factory is either passed per call or
//! registered once, keyed by the type it produces.

use std::any::{type_name, Any, TypeId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tenantdb_core::{
    BrokerResult, ConnectOptions, FactoryError, PoolConnector, PoolHandle, RequestContext,
    ValidationError,
};
use tracing::{debug, warn};

use crate::manager::{PoolOf, TenantConnectionManager};

/// Builds a `T` from a tenant pool handle.
pub type PoolFactory<H, T> = Arc<dyn Fn(Arc<H>) -> T + Send + Sync>;

struct Registered {
    type_name: &'static str,
    factory: Box<dyn Any + Send + Sync>,
}

/// Factories keyed by the type they produce.
///
/// Lookup is type-checked: asking for a type with no factory reports either
/// an empty registry or the types that are registered, and the mismatched
/// factory is never invoked.
pub struct FactoryRegistry<H> {
    factories: RwLock<HashMap<TypeId, Registered>>,
    _handle: PhantomData<fn() -> H>,
}

impl<H: PoolHandle> Default for FactoryRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: PoolHandle> FactoryRegistry<H> {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            _handle: PhantomData,
        }
    }

    /// Register the factory for `T`. The last registration wins; returns
    /// `true` if it replaced an earlier one.
    pub fn register<T, F>(&self, factory: F) -> bool
    where
        T: 'static,
        F: Fn(Arc<H>) -> T + Send + Sync + 'static,
    {
        let factory: PoolFactory<H, T> = Arc::new(factory);
        let replaced = self
            .write()
            .insert(
                TypeId::of::<T>(),
                Registered {
                    type_name: type_name::<T>(),
                    factory: Box::new(factory),
                },
            )
            .is_some();

        if replaced {
            warn!(type_name = type_name::<T>(), "Replacing registered pool factory");
        } else {
            debug!(type_name = type_name::<T>(), "Registered pool factory");
        }
        replaced
    }

    /// Register the factory for `T`, refusing to replace an existing one.
    pub fn try_register<T, F>(&self, factory: F) -> Result<(), FactoryError>
    where
        T: 'static,
        F: Fn(Arc<H>) -> T + Send + Sync + 'static,
    {
        let mut factories = self.write();
        match factories.entry(TypeId::of::<T>()) {
            Entry::Occupied(_) => Err(FactoryError::AlreadyRegistered {
                type_name: type_name::<T>(),
            }),
            Entry::Vacant(slot) => {
                let factory: PoolFactory<H, T> = Arc::new(factory);
                slot.insert(Registered {
                    type_name: type_name::<T>(),
                    factory: Box::new(factory),
                });
                Ok(())
            }
        }
    }

    /// The factory producing `T`.
    pub fn get<T: 'static>(&self) -> Result<PoolFactory<H, T>, FactoryError> {
        let factories = self.read();
        match factories.get(&TypeId::of::<T>()) {
            Some(registered) => registered
                .factory
                .downcast_ref::<PoolFactory<H, T>>()
                .cloned()
                .ok_or_else(|| FactoryError::TypeMismatch {
                    requested: type_name::<T>(),
                    registered: vec![registered.type_name],
                }),
            None if factories.is_empty() => Err(FactoryError::NotRegistered {
                type_name: type_name::<T>(),
            }),
            None => {
                let mut registered: Vec<&'static str> =
                    factories.values().map(|r| r.type_name).collect();
                registered.sort_unstable();
                Err(FactoryError::TypeMismatch {
                    requested: type_name::<T>(),
                    registered,
                })
            }
        }
    }

    pub fn unregister<T: 'static>(&self) -> bool {
        self.write().remove(&TypeId::of::<T>()).is_some()
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.read().contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TypeId, Registered>> {
        self.factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TypeId, Registered>> {
        self.factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<H> fmt::Debug for FactoryRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&'static str> = match self.factories.read() {
            Ok(factories) => factories.values().map(|r| r.type_name).collect(),
            Err(poisoned) => poisoned.get_ref().values().map(|r| r.type_name).collect(),
        };
        f.debug_struct("FactoryRegistry")
            .field("types", &names)
            .finish()
    }
}

// ============================================================================
// ADAPTER OPERATIONS
// ============================================================================

impl<C: PoolConnector> TenantConnectionManager<C> {
    /// Get the pool for `opts.tenant` and build a `T` from its handle.
    ///
    /// The pool is returned alongside the object so the caller can close
    /// it. `factory` is not invoked if the pool is already closed.
    pub async fn new_with_tenant_connection<T, F>(
        &self,
        ctx: &RequestContext,
        factory: F,
        opts: ConnectOptions,
    ) -> BrokerResult<(T, Arc<PoolOf<C>>)>
    where
        F: FnOnce(Arc<C::Handle>) -> T,
    {
        let pool = self.get_connection(ctx, opts).await?;
        let handle = pool.handle().await?;
        Ok((factory(handle), pool))
    }

    /// Build a `T` for `tenant` with default options.
    pub async fn connect_with<T, F>(
        &self,
        ctx: &RequestContext,
        tenant: &str,
        factory: F,
    ) -> BrokerResult<(T, Arc<PoolOf<C>>)>
    where
        F: FnOnce(Arc<C::Handle>) -> T,
    {
        self.new_with_tenant_connection(ctx, factory, ConnectOptions::new(tenant))
            .await
    }

    /// Build a `T` for the tenant carried by `ctx`.
    pub async fn connect_from_context_with<T, F>(
        &self,
        ctx: &RequestContext,
        factory: F,
    ) -> BrokerResult<(T, Arc<PoolOf<C>>)>
    where
        F: FnOnce(Arc<C::Handle>) -> T,
    {
        let tenant = ctx.tenant().ok_or(ValidationError::TenantNotInContext)?;
        self.connect_with(ctx, tenant, factory).await
    }

    /// Build a `T` for `tenant` with the registered factory for `T`.
    ///
    /// The registry is checked before any I/O.
    pub async fn connect<T: 'static>(
        &self,
        ctx: &RequestContext,
        tenant: &str,
    ) -> BrokerResult<(T, Arc<PoolOf<C>>)> {
        let factory = self.factories().get::<T>()?;
        self.connect_with(ctx, tenant, move |handle| factory(handle))
            .await
    }

    /// Like [`connect`](Self::connect), with explicit options.
    pub async fn connect_with_options<T: 'static>(
        &self,
        ctx: &RequestContext,
        opts: ConnectOptions,
    ) -> BrokerResult<(T, Arc<PoolOf<C>>)> {
        let factory = self.factories().get::<T>()?;
        self.new_with_tenant_connection(ctx, move |handle| factory(handle), opts)
            .await
    }

    /// Build a `T` for the tenant carried by `ctx` with the registered
    /// factory for `T`.
    pub async fn connect_from_context<T: 'static>(
        &self,
        ctx: &RequestContext,
    ) -> BrokerResult<(T, Arc<PoolOf<C>>)> {
        let tenant = ctx.tenant().ok_or(ValidationError::TenantNotInContext)?;
        self.connect::<T>(ctx, tenant).await
    }
}
