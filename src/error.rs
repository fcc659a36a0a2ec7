//! Error types for the environment masking layer
//!
//! This module provides the error taxonomy with:
//! - Error variants for each failure mode
//! - Error classification (fatal configuration vs recoverable per-call)
//! - Error codes for programmatic handling
//!
//! Only configuration errors ever escape to the loader. Everything raised
//! while a patched method runs is caught and the native result is returned.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wasm_bindgen::JsValue;

pub type Result<T> = std::result::Result<T, SpoofError>;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Configuration errors (1xx) - FATAL
    MissingSeed = 100,
    MissingConfig = 101,
    InvalidConfig = 102,

    // Host call errors (2xx)
    HostCallFailed = 200,
    TaintedResource = 201,
    Unsupported = 202,

    // Buffer/shape errors (3xx)
    InvalidBuffer = 300,
    InvalidImage = 301,

    // Patching errors (4xx)
    PatchSkipped = 400,
    HookFailed = 401,

    // Sync/serialization errors (5xx)
    SyncFailed = 500,
    Serialization = 501,

    // Internal errors (9xx)
    InternalError = 900,
    NotInitialized = 901,
}

/// Main error type for the masking layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpoofError {
    // ===== Configuration Errors (FATAL) =====
    #[error("Seed is missing or empty")]
    MissingSeed,

    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== Host Errors =====
    #[error("Native call failed: {0}")]
    Host(String),

    #[error("Resource is tainted: {0}")]
    Tainted(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    // ===== Buffer Errors =====
    #[error("Invalid buffer: expected {expected} bytes, got {got}")]
    BufferSize { expected: usize, got: usize },

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    // ===== Patching Errors =====
    #[error("Patch skipped for {method}: {reason}")]
    PatchSkipped { method: String, reason: String },

    #[error("Hook failed: {0}")]
    Hook(String),

    // ===== Sync Errors =====
    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== Internal Errors =====
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Runtime not initialized")]
    NotInitialized,
}

impl SpoofError {
    /// Get the error code for programmatic handling
    pub fn code(&self) -> ErrorCode {
        match self {
            SpoofError::MissingSeed => ErrorCode::MissingSeed,
            SpoofError::MissingConfig(_) => ErrorCode::MissingConfig,
            SpoofError::InvalidConfig(_) => ErrorCode::InvalidConfig,

            SpoofError::Host(_) => ErrorCode::HostCallFailed,
            SpoofError::Tainted(_) => ErrorCode::TaintedResource,
            SpoofError::Unsupported(_) => ErrorCode::Unsupported,

            SpoofError::BufferSize { .. } => ErrorCode::InvalidBuffer,
            SpoofError::InvalidImage(_) => ErrorCode::InvalidImage,

            SpoofError::PatchSkipped { .. } => ErrorCode::PatchSkipped,
            SpoofError::Hook(_) => ErrorCode::HookFailed,

            SpoofError::Sync(_) => ErrorCode::SyncFailed,
            SpoofError::Serialization(_) => ErrorCode::Serialization,

            SpoofError::Internal(_) => ErrorCode::InternalError,
            SpoofError::NotInitialized => ErrorCode::NotInitialized,
        }
    }

    /// Configuration errors abort initialization; nothing else does.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SpoofError::MissingSeed | SpoofError::MissingConfig(_) | SpoofError::InvalidConfig(_)
        )
    }

    /// Whether a patched call may swallow this error and fall back to the
    /// native result.
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }

    pub fn host(msg: impl Into<String>) -> Self {
        SpoofError::Host(msg.into())
    }

    pub fn hook(msg: impl Into<String>) -> Self {
        SpoofError::Hook(msg.into())
    }

    /// Build an `ErrorInfo` for JS consumers.
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code(),
            message: self.to_string(),
            fatal: self.is_fatal(),
        }
    }
}

/// Serializable error summary handed to JS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    pub fatal: bool,
}

impl From<SpoofError> for JsValue {
    fn from(err: SpoofError) -> Self {
        serde_wasm_bindgen::to_value(&err.info())
            .unwrap_or_else(|_| JsValue::from_str(&err.to_string()))
    }
}

impl From<serde_json::Error> for SpoofError {
    fn from(err: serde_json::Error) -> Self {
        SpoofError::Serialization(err.to_string())
    }
}

impl From<serde_wasm_bindgen::Error> for SpoofError {
    fn from(err: serde_wasm_bindgen::Error) -> Self {
        SpoofError::Serialization(err.to_string())
    }
}

impl From<JsValue> for SpoofError {
    fn from(value: JsValue) -> Self {
        let msg = value
            .as_string()
            .unwrap_or_else(|| format!("{:?}", value));
        SpoofError::Host(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SpoofError::MissingSeed.code(), ErrorCode::MissingSeed);
        assert_eq!(
            SpoofError::BufferSize { expected: 4, got: 3 }.code(),
            ErrorCode::InvalidBuffer
        );
        assert_eq!(SpoofError::NotInitialized.code(), ErrorCode::NotInitialized);
    }

    #[test]
    fn test_only_config_errors_are_fatal() {
        assert!(SpoofError::MissingSeed.is_fatal());
        assert!(SpoofError::InvalidConfig("dpr".into()).is_fatal());
        assert!(!SpoofError::host("tainted").is_fatal());
        assert!(SpoofError::hook("boom").is_recoverable());
    }

    #[test]
    fn test_error_info() {
        let info = SpoofError::MissingSeed.info();
        assert!(info.fatal);
        assert_eq!(info.message, "Seed is missing or empty");
    }
}
