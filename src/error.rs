use std::io;

use http::status::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use serde_json::Error as JsonError;
use sqlx::Error as SqlxError;

#[cfg(feature = "service")]
use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    response::{IntoResponse, Response},
    Json,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum EvidenceMapError {
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("Incorrect password")]
    Forbidden,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Metadata lookup failed: {0}")]
    UpstreamLookupFailed(String),
    #[error("Graph store error: {0}")]
    Store(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("File System error: {0}")]
    Io(String),
}

pub type Result<T, E = EvidenceMapError> = std::result::Result<T, E>;

impl EvidenceMapError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EvidenceMapError::NotFound(_) => StatusCode::NOT_FOUND,
            EvidenceMapError::Forbidden => StatusCode::FORBIDDEN,
            EvidenceMapError::Conflict(_) => StatusCode::CONFLICT,
            EvidenceMapError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            // Lookups fail closed: whatever went wrong upstream, the caller sees "not found".
            EvidenceMapError::UpstreamLookupFailed(_) => StatusCode::NOT_FOUND,
            EvidenceMapError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EvidenceMapError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EvidenceMapError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message exposed to API callers. Store internals are logged, never returned.
    pub fn public_message(&self) -> String {
        match self {
            EvidenceMapError::Store(_) => "Graph store error".to_string(),
            EvidenceMapError::Serialization(_) | EvidenceMapError::Io(_) => {
                "Internal error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<SqlxError> for EvidenceMapError {
    fn from(db_error: SqlxError) -> Self {
        match &db_error {
            SqlxError::Database(db) if db.is_unique_violation() => {
                EvidenceMapError::Conflict(format!("unique constraint violated: {}", db.message()))
            }
            SqlxError::RowNotFound => EvidenceMapError::NotFound("row not found".to_string()),
            _ => EvidenceMapError::Store(format!("database error: {db_error:?}")),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for EvidenceMapError {
    fn from(src: sqlx::migrate::MigrateError) -> Self {
        EvidenceMapError::Store(format!("migration failed: {src}"))
    }
}

impl From<JsonError> for EvidenceMapError {
    fn from(src: JsonError) -> EvidenceMapError {
        EvidenceMapError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<toml::de::Error> for EvidenceMapError {
    fn from(src: toml::de::Error) -> EvidenceMapError {
        EvidenceMapError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for EvidenceMapError {
    fn from(src: toml::ser::Error) -> EvidenceMapError {
        EvidenceMapError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<url::ParseError> for EvidenceMapError {
    fn from(src: url::ParseError) -> EvidenceMapError {
        EvidenceMapError::InvalidRequest(format!("Invalid URL: {src}"))
    }
}

impl From<io::Error> for EvidenceMapError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => EvidenceMapError::NotFound(format!("{x}")),
            _ => EvidenceMapError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

#[cfg(feature = "service")]
impl From<reqwest::Error> for EvidenceMapError {
    fn from(src: reqwest::Error) -> Self {
        EvidenceMapError::UpstreamLookupFailed(format!("{src}"))
    }
}

#[cfg(feature = "service")]
impl From<JsonRejection> for EvidenceMapError {
    fn from(src: JsonRejection) -> Self {
        EvidenceMapError::InvalidRequest(src.body_text())
    }
}

#[cfg(feature = "service")]
impl From<QueryRejection> for EvidenceMapError {
    fn from(src: QueryRejection) -> Self {
        EvidenceMapError::InvalidRequest(src.body_text())
    }
}

#[cfg(feature = "service")]
impl IntoResponse for EvidenceMapError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("[EvidenceMapError] {}", self);
        }
        let body = Json(serde_json::json!({ "error": self.public_message() }));
        (status, body).into_response()
    }
}
