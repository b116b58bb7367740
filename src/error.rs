//! Unified error handling for the shared data layer
//!
//! Two kinds of errors live here. Crate-level failures (configuration,
//! address parsing, I/O) are ordinary `Result` errors. Command dispatch errors
//! form a fixed taxonomy: every [`DispatcherError`] maps to exactly one
//! [`InternalError`], which in turn maps to the [`ClientError`] surfaced by the
//! storage layer.

use crate::core::AddressError;
use crate::utils::log_error_once;
use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for shared data layer operations
#[derive(Debug, Error)]
pub enum SdlError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Address parsing errors
    #[error("Address parsing error: {0}")]
    AddressParse(#[from] AddressError),

    /// Database info that no dispatcher can be built from
    #[error("Invalid database info: {message}")]
    InvalidDatabaseInfo { message: String },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid database type: {0}")]
    InvalidDbType(String),
}

/// Result type alias for shared data layer operations
pub type SdlResult<T> = Result<T, SdlError>;

impl SdlError {
    pub fn invalid_database_info<S: Into<String>>(message: S) -> Self {
        SdlError::InvalidDatabaseInfo {
            message: message.into(),
        }
    }
}

/// Errors delivered to command callbacks by a dispatcher.
///
/// Success is expressed as `Ok(())` next to the reply, so this enum only
/// carries failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum DispatcherError {
    #[error("redis error")]
    UnknownError,
    #[error("redis connection lost")]
    ConnectionLost,
    #[error("redis protocol error")]
    ProtocolError,
    #[error("redis out of memory")]
    OutOfMemory,
    #[error("redis dataset still being loaded into memory")]
    DatasetLoading,
    #[error("not connected to redis, SDL operation not started")]
    NotConnected,
    #[error("redis I/O error")]
    IoError,
    #[error("writing to slave")]
    WritingToSlave,
}

impl DispatcherError {
    pub const ALL: [DispatcherError; 8] = [
        DispatcherError::UnknownError,
        DispatcherError::ConnectionLost,
        DispatcherError::ProtocolError,
        DispatcherError::OutOfMemory,
        DispatcherError::DatasetLoading,
        DispatcherError::NotConnected,
        DispatcherError::IoError,
        DispatcherError::WritingToSlave,
    ];

    /// Numeric code, `0` being reserved for success
    pub fn code(&self) -> i32 {
        match self {
            DispatcherError::UnknownError => 1,
            DispatcherError::ConnectionLost => 2,
            DispatcherError::ProtocolError => 3,
            DispatcherError::OutOfMemory => 4,
            DispatcherError::DatasetLoading => 5,
            DispatcherError::NotConnected => 6,
            DispatcherError::IoError => 7,
            DispatcherError::WritingToSlave => 8,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.code() == code)
    }

    pub fn message(&self) -> &'static str {
        match self {
            DispatcherError::UnknownError => "redis error",
            DispatcherError::ConnectionLost => "redis connection lost",
            DispatcherError::ProtocolError => "redis protocol error",
            DispatcherError::OutOfMemory => "redis out of memory",
            DispatcherError::DatasetLoading => "redis dataset still being loaded into memory",
            DispatcherError::NotConnected => "not connected to redis, SDL operation not started",
            DispatcherError::IoError => "redis I/O error",
            DispatcherError::WritingToSlave => "writing to slave",
        }
    }

    pub fn internal_error(&self) -> InternalError {
        match self {
            DispatcherError::ConnectionLost => InternalError::BackendConnectionLost,
            DispatcherError::ProtocolError => InternalError::BackendRejectedRequest,
            DispatcherError::OutOfMemory => InternalError::BackendError,
            DispatcherError::DatasetLoading => InternalError::BackendNotReady,
            DispatcherError::NotConnected => InternalError::SdlNotConnectedToBackend,
            DispatcherError::UnknownError => InternalError::BackendError,
            DispatcherError::IoError => InternalError::BackendError,
            DispatcherError::WritingToSlave => InternalError::BackendError,
        }
    }
}

/// Message for a raw dispatcher code, including success
pub fn dispatcher_message(code: i32) -> &'static str {
    match DispatcherError::from_code(code) {
        Some(error) => error.message(),
        None if code == 0 => "Success",
        None => "unknown error",
    }
}

/// Internal error for a raw dispatcher code.
///
/// Codes outside the table are a classification gap, not a safety problem:
/// they are logged and reported as a logic error.
pub fn internal_error_for_code(code: i32) -> InternalError {
    match DispatcherError::from_code(code) {
        Some(error) => error.internal_error(),
        None if code == 0 => InternalError::Success,
        None => {
            log_error_once(&format!(
                "no internal error mapping for dispatcher error code {}",
                code
            ));
            InternalError::SdlErrorCodeLogicError
        }
    }
}

/// Internal error for the outcome handed to a command callback
pub fn internal_error(result: &Result<(), DispatcherError>) -> InternalError {
    match result {
        Ok(()) => InternalError::Success,
        Err(error) => error.internal_error(),
    }
}

/// Implementation independent error set shared by all backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalError {
    Success,
    SdlNotConnectedToBackend,
    BackendConnectionLost,
    BackendRejectedRequest,
    BackendNotReady,
    BackendError,
    SdlErrorCodeLogicError,
    SdlReceivedInvalidParameter,
    SdlNotReady,
}

impl InternalError {
    pub fn client_error(&self) -> ClientError {
        match self {
            InternalError::Success => ClientError::Success,
            InternalError::SdlNotConnectedToBackend
            | InternalError::BackendNotReady
            | InternalError::SdlNotReady => ClientError::NotConnected,
            InternalError::BackendConnectionLost => ClientError::OperationInterrupted,
            InternalError::BackendError | InternalError::SdlErrorCodeLogicError => {
                ClientError::BackendFailure
            }
            InternalError::BackendRejectedRequest => ClientError::RejectedByBackend,
            InternalError::SdlReceivedInvalidParameter => ClientError::RejectedBySdl,
        }
    }
}

/// Errors reported to shared data layer clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientError {
    Success,
    NotConnected,
    OperationInterrupted,
    BackendFailure,
    RejectedByBackend,
    RejectedBySdl,
}

impl ClientError {
    pub fn message(&self) -> &'static str {
        match self {
            ClientError::Success => "Success",
            ClientError::NotConnected => "shareddatalayer not connected to backend data storage",
            ClientError::OperationInterrupted => {
                "shareddatalayer sent the request to backend data storage but did not receive reply"
            }
            ClientError::BackendFailure => "backend data storage failed to process the request",
            ClientError::RejectedByBackend => "backend data storage rejected the request",
            ClientError::RejectedBySdl => "SDL rejected the request",
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}
