//! Error types for the reMarkable MCP server

use thiserror::Error;

use crate::extract::ExtractError;
use crate::mcp::protocol::error_codes;
use crate::ocr::OcrError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Document store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for document store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl AppError {
    /// JSON-RPC error code reported to the client
    pub fn json_rpc_code(&self) -> i32 {
        match self {
            AppError::NotFound(_) => error_codes::RESOURCE_NOT_FOUND,
            AppError::BadRequest(_) | AppError::Json(_) => error_codes::INVALID_PARAMS,
            AppError::Store(StoreError::NotFound(_)) => error_codes::RESOURCE_NOT_FOUND,
            AppError::Store(e) => {
                tracing::error!("Store error: {}", e);
                error_codes::STORE_ERROR
            }
            AppError::Ocr(e) => {
                tracing::error!("OCR error: {}", e);
                error_codes::OCR_ERROR
            }
            AppError::Extract(_) | AppError::Io(_) => error_codes::INTERNAL_ERROR,
        }
    }
}
