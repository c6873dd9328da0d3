//! Error types for the cirrus library.
//!
//! This module provides a unified error type with explicit variants for
//! transport failures, structured server errors, and input validation
//! errors. Server errors carry a numeric code from a fixed registry so
//! callers can branch on code rather than message text.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The unified error type for cirrus operations.
///
/// This error type covers all possible failure modes in the library,
/// with explicit variants to allow callers to handle specific cases.
#[derive(Debug, Error)]
pub enum Error {
    /// Network transport errors (DNS, TLS, connection, timeout).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Structured errors returned by the server.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// Input validation errors (invalid record type, id, URL, attribute key).
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInputError),
}

impl Error {
    /// Returns the server error code, if this is a server error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Server(err) => Some(err.code),
            _ => None,
        }
    }

    /// Check whether this error carries the given server error code.
    pub fn is_code(&self, code: ErrorCode) -> bool {
        self.code() == Some(code)
    }
}

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network connection failed.
    #[error("connection failed: {message}")]
    Connection { message: String },

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// Generic HTTP error.
    #[error("HTTP error: {message}")]
    Http { message: String },

    /// WebSocket error on the pub/sub channel.
    #[error("websocket error: {message}")]
    WebSocket { message: String },
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connection {
                message: err.to_string(),
            }
        } else {
            TransportError::Http {
                message: err.to_string(),
            }
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(TransportError::from(err))
    }
}

/// The fixed registry of server error codes.
///
/// Codes are stable across releases; callers should branch on these
/// rather than on message text. Codes the client does not recognize are
/// mapped to [`ErrorCode::UnexpectedError`] with the raw code preserved
/// on the [`ServerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotAuthenticated,
    PermissionDenied,
    AccessKeyNotAccepted,
    AccessTokenNotAccepted,
    InvalidCredentials,
    InvalidSignature,
    BadRequest,
    InvalidArgument,
    Duplicated,
    ResourceNotFound,
    NotSupported,
    NotImplemented,
    ConstraintViolated,
    IncompatibleSchema,
    AtomicOperationFailure,
    PartialOperationFailure,
    UndefinedOperation,
    PluginUnavailable,
    PluginTimeout,
    RecordQueryInvalid,
    PluginInitializing,
    UnexpectedError,
}

impl ErrorCode {
    /// Returns the numeric wire code.
    pub fn code(self) -> u32 {
        match self {
            ErrorCode::NotAuthenticated => 101,
            ErrorCode::PermissionDenied => 102,
            ErrorCode::AccessKeyNotAccepted => 103,
            ErrorCode::AccessTokenNotAccepted => 104,
            ErrorCode::InvalidCredentials => 105,
            ErrorCode::InvalidSignature => 106,
            ErrorCode::BadRequest => 107,
            ErrorCode::InvalidArgument => 108,
            ErrorCode::Duplicated => 109,
            ErrorCode::ResourceNotFound => 110,
            ErrorCode::NotSupported => 111,
            ErrorCode::NotImplemented => 112,
            ErrorCode::ConstraintViolated => 113,
            ErrorCode::IncompatibleSchema => 114,
            ErrorCode::AtomicOperationFailure => 115,
            ErrorCode::PartialOperationFailure => 116,
            ErrorCode::UndefinedOperation => 117,
            ErrorCode::PluginUnavailable => 118,
            ErrorCode::PluginTimeout => 119,
            ErrorCode::RecordQueryInvalid => 120,
            ErrorCode::PluginInitializing => 121,
            ErrorCode::UnexpectedError => 10000,
        }
    }

    /// Look up a wire code in the registry.
    ///
    /// Unknown codes return [`ErrorCode::UnexpectedError`]; the raw value
    /// is kept separately on the [`ServerError`].
    pub fn from_code(code: u32) -> Self {
        match code {
            101 => ErrorCode::NotAuthenticated,
            102 => ErrorCode::PermissionDenied,
            103 => ErrorCode::AccessKeyNotAccepted,
            104 => ErrorCode::AccessTokenNotAccepted,
            105 => ErrorCode::InvalidCredentials,
            106 => ErrorCode::InvalidSignature,
            107 => ErrorCode::BadRequest,
            108 => ErrorCode::InvalidArgument,
            109 => ErrorCode::Duplicated,
            110 => ErrorCode::ResourceNotFound,
            111 => ErrorCode::NotSupported,
            112 => ErrorCode::NotImplemented,
            113 => ErrorCode::ConstraintViolated,
            114 => ErrorCode::IncompatibleSchema,
            115 => ErrorCode::AtomicOperationFailure,
            116 => ErrorCode::PartialOperationFailure,
            117 => ErrorCode::UndefinedOperation,
            118 => ErrorCode::PluginUnavailable,
            119 => ErrorCode::PluginTimeout,
            120 => ErrorCode::RecordQueryInvalid,
            121 => ErrorCode::PluginInitializing,
            _ => ErrorCode::UnexpectedError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A structured error returned by the server.
///
/// Carries a code from the registry, a human-readable message, and an
/// optional structured info payload. Batch operations attach one of these
/// per failed item rather than failing the whole call.
#[derive(Debug, Clone)]
pub struct ServerError {
    /// The registry code.
    pub code: ErrorCode,
    /// The raw numeric code from the wire (differs from `code.code()`
    /// only when the server sent a code outside the registry).
    pub raw_code: u32,
    /// Human-readable message.
    pub message: String,
    /// Optional structured info payload.
    pub info: Option<serde_json::Value>,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.raw_code, self.message)
    }
}

impl std::error::Error for ServerError {}

impl ServerError {
    /// Create a new server error with a registry code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            raw_code: code.code(),
            message: message.into(),
            info: None,
        }
    }

    /// Create a server error from a raw wire code.
    pub fn from_wire(raw_code: u32, message: impl Into<String>, info: Option<serde_json::Value>) -> Self {
        Self {
            code: ErrorCode::from_code(raw_code),
            raw_code,
            message: message.into(),
            info,
        }
    }
}

/// The `error` object of the server's error transport shape.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireError {
    pub code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
}

/// The full error transport shape: `{status, error: {code, message, info?}}`.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireErrorEnvelope {
    pub status: u16,
    pub error: WireError,
}

impl From<WireError> for ServerError {
    fn from(wire: WireError) -> Self {
        ServerError::from_wire(wire.code, wire.message, wire.info)
    }
}

/// Input validation errors.
#[derive(Debug, Error)]
pub enum InvalidInputError {
    /// Invalid record type name.
    #[error("invalid record type '{value}': {reason}")]
    RecordType { value: String, reason: String },

    /// Invalid record id.
    #[error("invalid record id '{value}': {reason}")]
    RecordId { value: String, reason: String },

    /// Invalid server URL.
    #[error("invalid server URL '{value}': {reason}")]
    ServerUrl { value: String, reason: String },

    /// Invalid role name.
    #[error("invalid role '{value}': {reason}")]
    Role { value: String, reason: String },

    /// Invalid attribute key (reserved prefix or empty).
    #[error("invalid attribute key '{key}': {reason}")]
    AttributeKey { key: String, reason: String },

    /// A wire value that does not decode to a known variant.
    #[error("invalid value: {reason}")]
    Value { reason: String },

    /// A query that cannot be built or decoded.
    #[error("invalid query: {reason}")]
    Query { reason: String },

    /// Generic invalid input.
    #[error("invalid input: {message}")]
    Other { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_codes_round_trip() {
        let all = [
            ErrorCode::NotAuthenticated,
            ErrorCode::PermissionDenied,
            ErrorCode::AccessKeyNotAccepted,
            ErrorCode::AccessTokenNotAccepted,
            ErrorCode::InvalidCredentials,
            ErrorCode::InvalidSignature,
            ErrorCode::BadRequest,
            ErrorCode::InvalidArgument,
            ErrorCode::Duplicated,
            ErrorCode::ResourceNotFound,
            ErrorCode::NotSupported,
            ErrorCode::NotImplemented,
            ErrorCode::ConstraintViolated,
            ErrorCode::IncompatibleSchema,
            ErrorCode::AtomicOperationFailure,
            ErrorCode::PartialOperationFailure,
            ErrorCode::UndefinedOperation,
            ErrorCode::PluginUnavailable,
            ErrorCode::PluginTimeout,
            ErrorCode::RecordQueryInvalid,
            ErrorCode::PluginInitializing,
            ErrorCode::UnexpectedError,
        ];
        for code in all {
            assert_eq!(ErrorCode::from_code(code.code()), code);
        }
    }

    #[test]
    fn unknown_wire_code_maps_to_unexpected() {
        let err = ServerError::from_wire(4242, "boom", None);
        assert_eq!(err.code, ErrorCode::UnexpectedError);
        assert_eq!(err.raw_code, 4242);
    }

    #[test]
    fn wire_envelope_parses() {
        let body = serde_json::json!({
            "status": 404,
            "error": {"code": 110, "message": "record not found", "info": {"id": "note/1"}}
        });
        let envelope: WireErrorEnvelope = serde_json::from_value(body).unwrap();
        let err = ServerError::from(envelope.error);
        assert_eq!(err.code, ErrorCode::ResourceNotFound);
        assert!(err.info.is_some());
    }
}
