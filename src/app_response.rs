use std::fmt::{Display, Formatter};

use lmdb::Error as LmdbError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppResponse {
    DatabaseError(String),
    SerializationError(String),
    NotFound(String),
    ValidationError(String),
    BadRequest(String),
    NetworkError(String),
}

impl Display for AppResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppResponse::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppResponse::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppResponse::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppResponse::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppResponse::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            AppResponse::NetworkError(msg) => write!(f, "Network error: {}", msg),
        }
    }
}

impl std::error::Error for AppResponse {}

impl From<LmdbError> for AppResponse {
    fn from(err: LmdbError) -> Self {
        match err {
            LmdbError::NotFound => AppResponse::NotFound("Key not found in database".to_string()),
            LmdbError::KeyExist => {
                AppResponse::ValidationError("A record with this id already exists".to_string())
            }
            LmdbError::MapFull => {
                AppResponse::DatabaseError("Database map is full, increase mapSizeMb".to_string())
            }
            LmdbError::Corrupted => AppResponse::DatabaseError("Database is corrupted".to_string()),
            _ => AppResponse::DatabaseError(format!("LMDB error: {}", err)),
        }
    }
}

impl From<SerdeError> for AppResponse {
    fn from(err: SerdeError) -> Self {
        AppResponse::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl AppResponse {
    pub fn not_connected() -> Self {
        AppResponse::DatabaseError("Database is not connected".to_string())
    }
}

/// Outcome of a repository operation as seen by the embedding application.
///
/// Precondition failures, write failures and successful operations all come back
/// through this type; `error` carries the underlying cause when there is one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult<T = ()> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AppResponse>,
}

impl<T> OperationResult<T> {
    pub fn success(message: impl Into<String>) -> Self {
        OperationResult {
            success: true,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        OperationResult {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        OperationResult {
            success: false,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    pub fn from_error(message: impl Into<String>, error: AppResponse) -> Self {
        OperationResult {
            success: false,
            message: message.into(),
            data: None,
            error: Some(error),
        }
    }

    /// Turns a failed result back into an error so callers can use `?`.
    pub fn into_result(self) -> Result<Option<T>, AppResponse> {
        if self.success {
            return Ok(self.data);
        }
        Err(self
            .error
            .unwrap_or(AppResponse::ValidationError(self.message)))
    }
}
