//! Query logging hook
//!
//! Every logged statement is handed to a [`QueryLogger`] before it runs. When a
//! tenant's options carry no logger, the process-wide default is used.

use std::sync::Arc;

use once_cell::sync::Lazy;
use postgres_types::ToSql;

use crate::context::RequestContext;

/// Statement parameters as accepted by `tokio-postgres`.
pub type SqlParams<'a> = &'a [&'a (dyn ToSql + Sync)];

/// Hook invoked with the statement text and its arguments before execution.
pub type QueryLogger = Arc<dyn Fn(&RequestContext, &str, SqlParams<'_>) + Send + Sync>;

static DEFAULT_LOGGER: Lazy<QueryLogger> = Lazy::new(|| {
    let logger: QueryLogger = Arc::new(log_query);
    logger
});

/// The process-wide default logger.
pub fn default_query_logger() -> QueryLogger {
    Arc::clone(&DEFAULT_LOGGER)
}

/// A logger that discards everything.
pub fn noop_query_logger() -> QueryLogger {
    Arc::new(discard_query)
}

fn discard_query(_: &RequestContext, _: &str, _: SqlParams<'_>) {}

fn log_query(ctx: &RequestContext, query: &str, args: SqlParams<'_>) {
    tracing::info!(
        target: "tenantdb::query",
        tenant = ctx.tenant().unwrap_or("-"),
        query,
        args = ?args,
        "[TenantQuery]"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_custom_logger_receives_query_and_args() {
        let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let logger: QueryLogger = Arc::new(move |_: &RequestContext, query: &str, args: SqlParams<'_>| {
            sink.lock()
                .unwrap()
                .push((query.to_string(), format!("{:?}", args)));
        });

        let id = 123i32;
        logger(
            &RequestContext::background(),
            "SELECT * FROM users WHERE id = $1",
            &[&id],
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "SELECT * FROM users WHERE id = $1");
        assert!(seen[0].1.contains("123"));
    }

    #[test]
    fn test_default_logger_is_shared() {
        let a = default_query_logger();
        let b = default_query_logger();
        assert!(Arc::ptr_eq(&a, &b));
        a(&RequestContext::background(), "SELECT 1", &[]);
    }
}
