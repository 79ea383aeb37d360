use std::time::Duration;

use thiserror::Error;

/// Failures produced by the connection manager and the query façade.
///
/// Only `PoolExhausted`, `Query`, `NotConnected` and `FatalDisconnected` ever
/// reach HTTP callers. The remaining variants describe probe failures that
/// the supervisor absorbs and logs while a path back to `Connected` exists.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DbError {
    /// Name resolution failed for a candidate host; the candidate is skipped.
    #[error("DNS resolution failed for {host}: {message}")]
    DnsResolutionFailed { host: String, message: String },

    /// A physical connection could not be opened.
    #[error("connection to {host} failed: {message}")]
    ConnectFailed { host: String, message: String },

    /// A connection opened but did not answer the liveness query.
    #[error("liveness check against {host} failed: {message}")]
    LivenessCheckFailed { host: String, message: String },

    /// Every connection is busy and the caller could not be queued or timed out.
    #[error("connection pool exhausted after waiting {waited:?}")]
    PoolExhausted { waited: Duration },

    /// A live connection dropped mid-session.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The driver rejected or failed a statement.
    #[error("query failed: {message}")]
    Query {
        message: String,
        code: Option<String>,
    },

    /// No pool is installed yet.
    #[error("database not connected")]
    NotConnected,

    /// Bounded retries were exhausted; the manager no longer reconnects.
    #[error("database unavailable after {passes} failed probe passes")]
    FatalDisconnected { passes: u32 },
}

impl DbError {
    /// Stable machine-readable name, used in error payloads and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DbError::DnsResolutionFailed { .. } => "dns_resolution_failed",
            DbError::ConnectFailed { .. } => "connect_failed",
            DbError::LivenessCheckFailed { .. } => "liveness_check_failed",
            DbError::PoolExhausted { .. } => "pool_exhausted",
            DbError::ConnectionLost(_) => "connection_lost",
            DbError::Query { .. } => "query_error",
            DbError::NotConnected => "not_connected",
            DbError::FatalDisconnected { .. } => "fatal_disconnected",
        }
    }

    /// Whether the supervisor can recover from this failure by probing again.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            DbError::Query { .. } | DbError::FatalDisconnected { .. }
        )
    }

    /// Whether the service is unavailable, as opposed to the statement itself failing.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            DbError::PoolExhausted { .. }
                | DbError::NotConnected
                | DbError::FatalDisconnected { .. }
                | DbError::ConnectionLost(_)
        )
    }

    pub(crate) fn query(message: impl Into<String>) -> Self {
        DbError::Query {
            message: message.into(),
            code: None,
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => DbError::Query {
                message: db_err.message().to_string(),
                code: db_err.code().map(|c| c.into_owned()),
            },
            _ => DbError::query(err.to_string()),
        }
    }
}

/// Whether a driver error means the underlying socket is gone.
///
/// SQLSTATE `08S01` is MySQL's communication link failure.
pub fn is_connection_lost(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::Protocol(_) | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("08S01"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_failures_are_recoverable() {
        let dns = DbError::DnsResolutionFailed {
            host: "db.internal".into(),
            message: "no such host".into(),
        };
        assert!(dns.is_recoverable());
        assert!(!dns.is_unavailable());
        assert!(!DbError::FatalDisconnected { passes: 3 }.is_recoverable());
        assert!(!DbError::query("syntax error").is_recoverable());
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(DbError::NotConnected.kind(), "not_connected");
        assert_eq!(
            DbError::PoolExhausted {
                waited: Duration::from_secs(1)
            }
            .kind(),
            "pool_exhausted"
        );
        assert_eq!(DbError::query("x").kind(), "query_error");
    }

    #[test]
    fn io_errors_count_as_connection_loss() {
        let io = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "broken pipe",
        ));
        assert!(is_connection_lost(&io));
        assert!(!is_connection_lost(&sqlx::Error::RowNotFound));

        let mapped = DbError::from(io);
        assert_eq!(mapped.kind(), "query_error");
    }
}
