//! Query execution façade over the MySQL connection manager.
//!
//! Statements run once. A failure that means the socket is gone marks the
//! handle broken and wakes the supervisor, but the statement is not retried,
//! so non-idempotent writes never execute twice.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::Serialize;
use sqlx::mysql::{MySqlArguments, MySqlRow};
use sqlx::{Arguments, FromRow};

use super::connector::MySqlConnector;
use super::error::{is_connection_lost, DbError};
use super::manager::ConnectionManager;
use super::pool::PooledConnection;

/// Manager over real MySQL connections.
pub type Database = ConnectionManager<MySqlConnector>;

/// A positional statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
    Date(NaiveDate),
    Decimal(BigDecimal),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(value.into())
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(value: NaiveDate) -> Self {
        SqlValue::Date(value)
    }
}

impl From<BigDecimal> for SqlValue {
    fn from(value: BigDecimal) -> Self {
        SqlValue::Decimal(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Result of a statement that returns no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueryOutcome {
    pub rows_affected: u64,
    pub last_insert_id: u64,
}

fn arguments(params: &[SqlValue]) -> Result<MySqlArguments, DbError> {
    let mut args = MySqlArguments::default();
    for param in params {
        let added = match param {
            SqlValue::Null => args.add(Option::<String>::None),
            SqlValue::Int(v) => args.add(*v),
            SqlValue::Text(v) => args.add(v.clone()),
            SqlValue::Date(v) => args.add(*v),
            SqlValue::Decimal(v) => args.add(v.clone()),
        };
        added.map_err(|e| DbError::query(format!("cannot bind parameter: {}", e)))?;
    }
    Ok(args)
}

impl Database {
    /// Converts a driver error, reporting dropped connections to the supervisor.
    fn query_failed(&self, conn: &mut PooledConnection<MySqlConnector>, err: sqlx::Error) -> DbError {
        if is_connection_lost(&err) {
            self.report_connection_lost(conn, &err.to_string());
        }
        tracing::error!("Query against {} failed: {}", conn.target().address(), err);
        DbError::from(err)
    }

    /// Runs a statement and maps every returned row to `T`.
    pub async fn fetch_all<T>(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<T>, DbError>
    where
        T: for<'r> FromRow<'r, MySqlRow> + Send + Unpin,
    {
        let args = arguments(params)?;
        let mut conn = self.acquire().await?;
        let result = sqlx::query_as_with::<_, T, _>(sql, args)
            .fetch_all(&mut *conn)
            .await;
        result.map_err(|e| self.query_failed(&mut conn, e))
    }

    /// Runs a statement expected to return at most one row.
    pub async fn fetch_optional<T>(&self, sql: &str, params: &[SqlValue]) -> Result<Option<T>, DbError>
    where
        T: for<'r> FromRow<'r, MySqlRow> + Send + Unpin,
    {
        let args = arguments(params)?;
        let mut conn = self.acquire().await?;
        let result = sqlx::query_as_with::<_, T, _>(sql, args)
            .fetch_optional(&mut *conn)
            .await;
        result.map_err(|e| self.query_failed(&mut conn, e))
    }

    /// Runs an insert/update/delete statement.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryOutcome, DbError> {
        let args = arguments(params)?;
        let mut conn = self.acquire().await?;
        let result = sqlx::query_with(sql, args).execute(&mut *conn).await;
        result
            .map(|done| QueryOutcome {
                rows_affected: done.rows_affected(),
                last_insert_id: done.last_insert_id(),
            })
            .map_err(|e| self.query_failed(&mut conn, e))
    }
}
