//! Request-scoped context
//!
//! A [`RequestContext`] carries an optional deadline and a typed value map
//! down the call chain. The tenant key has exactly one canonical slot,
//! [`TenantKey`], read through [`RequestContext::tenant`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

/// The canonical context value holding the tenant key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantKey(pub String);

/// Returned by [`RequestContext::run`] when the deadline passes first.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;

/// Deadline and request-scoped values for one logical request.
///
/// Cloning is cheap; values are shared behind an `Arc`.
#[derive(Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    values: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl RequestContext {
    /// A context with no deadline and no values.
    pub fn background() -> Self {
        Self::default()
    }

    /// Bound this context by `timeout` from now, keeping any earlier deadline.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }

    /// Bound this context by `deadline`, keeping any earlier deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }

    /// Attach a value, replacing any previous value of the same type.
    pub fn with_value<T: Any + Send + Sync>(mut self, value: T) -> Self {
        let mut values = (*self.values).clone();
        values.insert(TypeId::of::<T>(), Arc::new(value));
        self.values = Arc::new(values);
        self
    }

    pub fn value<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn with_tenant(self, tenant: impl Into<String>) -> Self {
        self.with_value(TenantKey(tenant.into()))
    }

    /// The tenant key, if one was attached and it is non-empty.
    pub fn tenant(&self) -> Option<&str> {
        self.value::<TenantKey>()
            .map(|key| key.0.as_str())
            .filter(|tenant| !tenant.is_empty())
    }

    /// Drive `fut` to completion unless the deadline passes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, DeadlineExceeded> {
        match self.deadline {
            Some(deadline) => {
                tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), fut)
                    .await
                    .map_err(|_| DeadlineExceeded)
            }
            None => Ok(fut.await),
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("deadline", &self.deadline)
            .field("tenant", &self.tenant())
            .field("values", &self.values.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_accessor() {
        let ctx = RequestContext::background();
        assert_eq!(ctx.tenant(), None);

        let ctx = ctx.with_tenant("acme");
        assert_eq!(ctx.tenant(), Some("acme"));

        let empty = RequestContext::background().with_tenant("");
        assert_eq!(empty.tenant(), None);
    }

    #[test]
    fn test_values_are_typed() {
        #[derive(Debug, PartialEq)]
        struct RequestId(u64);

        let ctx = RequestContext::background()
            .with_value(RequestId(7))
            .with_tenant("acme");
        assert_eq!(ctx.value::<RequestId>(), Some(&RequestId(7)));
        assert_eq!(ctx.value::<String>(), None);

        // Clones share values but adding to one does not leak into the other.
        let parent = ctx.clone();
        let child = ctx.with_tenant("globex");
        assert_eq!(parent.tenant(), Some("acme"));
        assert_eq!(child.tenant(), Some("globex"));
    }

    #[test]
    fn test_with_deadline_keeps_earliest() {
        let now = Instant::now();
        let early = now + Duration::from_secs(1);
        let late = now + Duration::from_secs(60);

        let ctx = RequestContext::background()
            .with_deadline(early)
            .with_deadline(late);
        assert_eq!(ctx.deadline(), Some(early));
        assert!(!ctx.is_expired());
        assert!(RequestContext::background().remaining().is_none());
    }

    #[tokio::test]
    async fn test_run_honors_deadline() {
        let ctx = RequestContext::background().with_timeout(Duration::from_millis(10));
        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert_eq!(result, Err(DeadlineExceeded));

        let unbounded = RequestContext::background();
        assert_eq!(unbounded.run(async { 42 }).await, Ok(42));
    }
}
