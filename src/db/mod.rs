//! Database connection management.
//!
//! The [`ConnectionManager`] owns one bounded pool at a time and keeps it
//! pointed at a reachable MySQL host. Candidates are probed in order, failed
//! passes back off, and dropped connections trigger a background re-probe.

pub mod candidates;
pub mod connector;
pub mod error;
pub mod manager;
pub mod pool;
pub mod query;
pub mod retry;
pub mod state;

pub use candidates::{CandidateSource, DnsResolver, HostCandidate, HostResolver, Secret, TargetConfig};
pub use connector::{Connector, MySqlConnector};
pub use error::DbError;
pub use manager::{ConnectionManager, DatabaseSettings};
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection, Slots};
pub use query::{Database, QueryOutcome, SqlValue};
pub use retry::{BackoffPolicy, FatalPolicy, RetryPolicy};
pub use state::{ConnectionEvent, ConnectionState, ConnectionStatus, Transition};
