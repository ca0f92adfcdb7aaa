use axum::{http::StatusCode, response::IntoResponse};
use std::fmt::Display;

pub type AppResult<T> = Result<T, AppErr>;

#[derive(thiserror::Error, Debug)]
pub enum AppErr {
    #[error("Bad request: {0}")]
    Bad(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Room '{0}' is already claimed")]
    AlreadyClaimed(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ingestion failed: {0}")]
    Ingestion(String),

    #[error("Token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Store: {0}")]
    Store(#[from] sqlx::Error),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AppErr {
    fn into_response(self) -> axum::response::Response {
        let (code, body) = match self {
            AppErr::Bad(msg) => (StatusCode::BAD_REQUEST, msg),
            AppErr::UnsupportedMediaType(mime) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, format!("unsupported media type: {mime}"))
            }
            AppErr::AlreadyClaimed(name) => {
                (StatusCode::FORBIDDEN, format!("room '{name}' is already claimed"))
            }
            AppErr::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppErr::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            AppErr::Store(ref err) => {
                tracing::error!(%err, "store failure");
                (StatusCode::SERVICE_UNAVAILABLE, "store unavailable".into())
            }
            other => {
                tracing::error!(err = %other, "internal failure");
                (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        };
        (code, body).into_response()
    }
}

/* ── helpers: wrap any error into a variant ── */
pub fn bad<E: Display>(e: E) -> AppErr {
    AppErr::Bad(e.to_string())
}
pub fn ingest<E: Display>(e: E) -> AppErr {
    AppErr::Ingestion(e.to_string())
}
