use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::Connection;

use super::candidates::HostCandidate;
use super::error::DbError;

/// Opens and checks physical connections for a pool.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self, target: &HostCandidate) -> Result<Self::Connection, DbError>;

    /// Runs the liveness query on `conn`.
    async fn ping(&self, conn: &mut Self::Connection) -> Result<(), DbError>;

    /// Closes `conn` gracefully. Dropping a connection is always allowed too.
    async fn close(&self, conn: Self::Connection);
}

/// MySQL connector built on `sqlx::MySqlConnection`.
#[derive(Debug, Default, Clone)]
pub struct MySqlConnector;

impl MySqlConnector {
    pub fn new() -> Self {
        Self
    }

    fn options(target: &HostCandidate) -> MySqlConnectOptions {
        let options = MySqlConnectOptions::new()
            .host(&target.host)
            .port(target.port)
            .username(&target.user)
            .database(&target.database);

        match &target.password {
            Some(password) => options.password(password.expose()),
            None => options,
        }
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    type Connection = MySqlConnection;

    async fn connect(&self, target: &HostCandidate) -> Result<MySqlConnection, DbError> {
        MySqlConnection::connect_with(&Self::options(target))
            .await
            .map_err(|e| DbError::ConnectFailed {
                host: target.address(),
                message: e.to_string(),
            })
    }

    async fn ping(&self, conn: &mut MySqlConnection) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&mut *conn)
            .await
            .map(|_| ())
            .map_err(|e| DbError::ConnectionLost(e.to_string()))
    }

    async fn close(&self, conn: MySqlConnection) {
        if let Err(e) = conn.close().await {
            tracing::debug!("Closing MySQL connection failed: {}", e);
        }
    }
}
