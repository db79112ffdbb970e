use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pollnation_shared::ErrorBody;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Task(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }
}

/// True only for UNIQUE (and primary key) violations. CHECK and FOREIGN KEY
/// failures are not duplicates and stay database errors.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorBody {
            success: false,
            message,
            status_code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn response_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn client_errors_map_to_their_status() {
        assert_eq!(
            response_status(AppError::validation("bad")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(response_status(AppError::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(response_status(AppError::forbidden("no")), StatusCode::FORBIDDEN);
        assert_eq!(response_status(AppError::not_found("gone")), StatusCode::NOT_FOUND);
        assert_eq!(response_status(AppError::conflict("dup")), StatusCode::CONFLICT);
    }

    #[test]
    fn internal_returns_500() {
        assert_eq!(
            response_status(AppError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            response_status(AppError::Database(rusqlite::Error::QueryReturnedNoRows)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn only_unique_failures_count_as_duplicates() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE parent (id INTEGER PRIMARY KEY);
             CREATE TABLE child (
                 id        INTEGER PRIMARY KEY,
                 parent_id INTEGER NOT NULL REFERENCES parent(id),
                 name      TEXT NOT NULL UNIQUE,
                 qty       INTEGER NOT NULL CHECK (qty >= 0)
             );
             INSERT INTO parent (id) VALUES (1);
             INSERT INTO child (parent_id, name, qty) VALUES (1, 'a', 0);",
        )
        .unwrap();

        let insert = |parent: i64, name: &str, qty: i64| {
            conn.execute(
                "INSERT INTO child (parent_id, name, qty) VALUES (?1, ?2, ?3)",
                rusqlite::params![parent, name, qty],
            )
            .unwrap_err()
        };

        assert!(is_unique_violation(&insert(1, "a", 0)));
        assert!(!is_unique_violation(&insert(99, "b", 0)));
        assert!(!is_unique_violation(&insert(1, "c", -1)));
    }

    #[tokio::test]
    async fn body_carries_message_and_status() {
        let resp = AppError::not_found("Post not found").into_response();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert!(!body.success);
        assert_eq!(body.message, "Post not found");
        assert_eq!(body.status_code, 404);
    }

    #[tokio::test]
    async fn server_errors_hide_details() {
        let resp = AppError::Internal("disk on fire".into()).into_response();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.message, "Internal server error");
    }
}
