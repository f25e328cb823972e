//! Error definitions for the mount core

use thiserror::Error;

/// Mount error types
#[derive(Error, Debug)]
pub enum MountError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connect to {endpoint} failed: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    #[error("Send timeout")]
    SendTimeout,

    #[error("Read timeout")]
    ReadTimeout,

    #[error("Socket closed")]
    SocketClosed,

    #[error("Short reply: expected {expected} fields, got {got}")]
    ParseShort { expected: usize, got: usize },

    #[error("Reply mismatch: {0}")]
    ParseMismatch(String),

    #[error("Mount refused: {0}")]
    ProtocolRefused(String),

    #[error("Canceled")]
    Canceled,

    #[error("Model operation already in progress")]
    Busy,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

/// Coarse error taxonomy used for recovery decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectFailed,
    SendTimeout,
    ReadTimeout,
    SocketClosed,
    ParseShort,
    ParseMismatch,
    ProtocolRefused,
    Canceled,
    Other,
}

impl MountError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MountError::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            MountError::SendTimeout => ErrorKind::SendTimeout,
            MountError::ReadTimeout => ErrorKind::ReadTimeout,
            MountError::SocketClosed => ErrorKind::SocketClosed,
            MountError::ParseShort { .. } => ErrorKind::ParseShort,
            MountError::ParseMismatch(_) => ErrorKind::ParseMismatch,
            MountError::ProtocolRefused(_) => ErrorKind::ProtocolRefused,
            MountError::Canceled => ErrorKind::Canceled,
            _ => ErrorKind::Other,
        }
    }

    /// True when the TCP conversation is gone and the channel must be
    /// reported as disconnected
    pub fn is_connection_loss(&self) -> bool {
        matches!(self.kind(), ErrorKind::ConnectFailed | ErrorKind::SocketClosed)
    }

    pub fn mismatch(msg: impl Into<String>) -> Self {
        MountError::ParseMismatch(msg.into())
    }

    pub fn refused(msg: impl Into<String>) -> Self {
        MountError::ProtocolRefused(msg.into())
    }
}

/// Result type alias for mount operations
pub type MountResult<T> = Result<T, MountError>;
