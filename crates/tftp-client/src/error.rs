//! Error types for transfer operations.

use thiserror::Error;

use tftp_proto::{ErrorCode, ProtoError};

/// Transfer error type.
#[derive(Debug, Error)]
pub enum TftpError {
    /// The request URI was unusable (bad scheme, missing host or path).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The retransmission timer gave up without a response.
    #[error("transfer timed out")]
    Timeout,

    /// The consumer closed its end of the transfer.
    #[error("transfer cancelled")]
    Cancelled,

    /// Socket-level failure.
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    /// Server reported that the file does not exist.
    #[error("file not found")]
    NotFound,

    /// Server denied access to the file.
    #[error("access denied")]
    AccessDenied,

    /// Server rejected the request or sent an error this client has no
    /// better mapping for.
    #[error("operation not supported")]
    NotSupported,

    /// The peer sent a packet that cannot belong to a valid transfer.
    #[error("malformed transfer: {0}")]
    Packet(String),

    /// An option in the server's OACK failed to parse.
    #[error(transparent)]
    Proto(#[from] ProtoError),
}

impl TftpError {
    /// Maps a server ERROR packet code to a terminal transfer status.
    pub(crate) fn from_server(code: ErrorCode) -> Self {
        match code {
            ErrorCode::FileNotFound => TftpError::NotFound,
            ErrorCode::AccessDenied => TftpError::AccessDenied,
            ErrorCode::IllegalOperation | ErrorCode::Other(_) => TftpError::NotSupported,
        }
    }
}

/// Result type for transfer operations.
pub type Result<T> = std::result::Result<T, TftpError>;
