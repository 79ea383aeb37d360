use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::db::DbError;

/// Application-specific error types.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Database-related errors.
    Database(DbError),
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    fn root(&self) -> &AppError {
        match self {
            AppError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Machine-readable error kind for the response payload.
    pub fn kind(&self) -> &'static str {
        match self.root() {
            AppError::Database(e) => e.kind(),
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::WithContext { .. } => "internal_error",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self.root() {
            AppError::Database(e) if e.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::WithContext { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Database(e) => write!(f, "Database error: {}", e),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// The body always carries `error`, `kind` and `message`. Driver
    /// internals are reduced to the driver's message text.
    fn into_response(self) -> Response {
        if let AppError::WithContext { context, source } = &self {
            // Log full context chain for debugging
            tracing::error!("Error with context: {} -> {}", context, source);
        }

        let status = self.status();
        let kind = self.kind();
        let (error, message) = match self.root() {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                let message = match e {
                    DbError::Query { message, .. } => message.clone(),
                    DbError::PoolExhausted { .. } => {
                        "Database is busy, retry shortly".to_string()
                    }
                    DbError::FatalDisconnected { .. } | DbError::NotConnected => {
                        "Database is unavailable".to_string()
                    }
                    _ => "Database connection problem".to_string(),
                };
                ("Database error".to_string(), message)
            }
            AppError::NotFound(msg) => ("Not found".to_string(), msg.clone()),
            AppError::BadRequest(msg) => ("Bad request".to_string(), msg.clone()),
            AppError::WithContext { .. } => (
                "Internal server error".to_string(),
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error,
            "kind": kind,
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl From<DbError> for AppError {
    /// Converts a `DbError` into an `AppError`.
    fn from(err: DbError) -> Self {
        AppError::Database(err)
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    ///
    /// # Arguments
    ///
    /// * `f` - A closure that produces the context message.
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<AppError>> ResultExt<T> for Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e.into()),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e.into()),
            context: f(),
        })
    }
}
