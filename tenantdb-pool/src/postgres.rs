//! PostgreSQL driver binding on deadpool-postgres.
//!
//! Session statements (`search_path`, `TIMEZONE`) are per connection in
//! PostgreSQL, so [`PgPoolHandle::apply_session`] records them and a
//! `post_create` hook replays them on every connection the pool opens.
//! Connections opened before a statement was recorded are retired.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use deadpool_postgres::{
    ClientWrapper, Config, Hook, HookError, ManagerConfig, Object, Pool, RecyclingMethod, Runtime,
};
use postgres_types::ToSql;
use tenantdb_core::{ConnectionString, DriverError, PoolConnector, PoolHandle, PoolSettings, PoolStatus};
use tokio_postgres::{NoTls, Row};
use tracing::debug;

/// Opens [`PgPoolHandle`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

#[async_trait]
impl PoolConnector for PgConnector {
    type Handle = PgPoolHandle;

    async fn open(
        &self,
        dsn: &ConnectionString,
        settings: &PoolSettings,
    ) -> Result<PgPoolHandle, DriverError> {
        PgPoolHandle::open(dsn, settings)
    }
}

type SessionStatements = Arc<RwLock<Vec<String>>>;

/// A deadpool-postgres pool bound to one tenant.
#[derive(Clone)]
pub struct PgPoolHandle {
    pool: Pool,
    settings: PoolSettings,
    session: SessionStatements,
}

impl PgPoolHandle {
    /// Build the pool. Connections are opened lazily on first checkout.
    pub fn open(dsn: &ConnectionString, settings: &PoolSettings) -> Result<Self, DriverError> {
        let mut cfg = Config::new();
        cfg.url = Some(dsn.expose().to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let session: SessionStatements = Arc::default();
        let replay = Arc::clone(&session);
        let max_lifetime = settings.conn_max_lifetime;
        let max_idle = settings.conn_max_idle;

        let pool = cfg
            .builder(NoTls)
            .map_err(|e| DriverError::InvalidConfig {
                reason: e.to_string(),
            })?
            .max_size(settings.max_open_conns)
            .runtime(Runtime::Tokio1)
            .post_create(Hook::async_fn(move |client: &mut ClientWrapper, _| {
                let statements = snapshot(&replay);
                Box::pin(async move {
                    for statement in &statements {
                        if let Err(e) = client.batch_execute(statement).await {
                            return Err(HookError::Backend(e));
                        }
                    }
                    Ok(())
                })
            }))
            .pre_recycle(Hook::sync_fn(move |_, metrics| {
                if metrics.age() > max_lifetime {
                    return Err(HookError::Message("connection exceeded max lifetime".into()));
                }
                if metrics.last_used() > max_idle {
                    return Err(HookError::Message("connection exceeded max idle time".into()));
                }
                Ok(())
            }))
            .build()
            .map_err(|e| DriverError::InvalidConfig {
                reason: e.to_string(),
            })?;

        debug!(dsn = %dsn, max_size = settings.max_open_conns, "Opened postgres pool");
        Ok(Self {
            pool,
            settings: *settings,
            session,
        })
    }

    /// The underlying deadpool pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn client(&self, operation: &'static str) -> Result<Object, DriverError> {
        if self.pool.is_closed() {
            return Err(DriverError::Closed);
        }
        self.pool
            .get()
            .await
            .map_err(|e| DriverError::backend(operation, e))
    }

    /// Drop idle connections beyond `max_idle_conns`.
    fn trim_idle(&self) {
        let keep = self.settings.max_idle_conns;
        if self.pool.status().available <= keep {
            return;
        }
        let kept = AtomicUsize::new(0);
        let _ = self
            .pool
            .retain(|_, _| kept.fetch_add(1, Ordering::Relaxed) < keep);
    }
}

fn snapshot(session: &SessionStatements) -> Vec<String> {
    match session.read() {
        Ok(statements) => statements.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

#[async_trait]
impl PoolHandle for PgPoolHandle {
    type Row = Row;

    async fn ping(&self) -> Result<(), DriverError> {
        let client = self.client("ping").await?;
        client
            .batch_execute("SELECT 1")
            .await
            .map_err(|e| DriverError::backend("ping", e))
    }

    async fn apply_session(&self, statement: &str) -> Result<(), DriverError> {
        match self.session.write() {
            Ok(mut statements) => statements.push(statement.to_string()),
            Err(poisoned) => poisoned.into_inner().push(statement.to_string()),
        }
        // Idle connections predate the statement.
        let _ = self.pool.retain(|_, _| false);

        // A fresh checkout runs the replay hook, which validates the statement.
        let client = self.client("apply session statement").await?;
        drop(client);
        Ok(())
    }

    async fn execute(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, DriverError> {
        let result = {
            let client = self.client("execute").await?;
            client.execute(statement, params).await
        };
        self.trim_idle();
        result.map_err(|e| DriverError::backend("execute", e))
    }

    async fn query(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, DriverError> {
        let result = {
            let client = self.client("query").await?;
            client.query(statement, params).await
        };
        self.trim_idle();
        result.map_err(|e| DriverError::backend("query", e))
    }

    async fn query_one(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Row, DriverError> {
        let result = {
            let client = self.client("query_one").await?;
            client.query_one(statement, params).await
        };
        self.trim_idle();
        result.map_err(|e| DriverError::backend("query_one", e))
    }

    fn close(&self) -> Result<(), DriverError> {
        self.pool.close();
        Ok(())
    }

    fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
        }
    }
}

impl std::fmt::Debug for PgPoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPoolHandle")
            .field("status", &self.pool.status())
            .field("settings", &self.settings)
            .field("session", &snapshot(&self.session))
            .finish()
    }
}
