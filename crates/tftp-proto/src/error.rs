//! Error types for the TFTP wire layer.

use thiserror::Error;

/// Wire-layer error type.
///
/// Packet-shape errors (`Underlength`, `UnknownOpcode`) are recoverable: the
/// receiving side drops the offending datagram and the transfer continues.
/// Option-parse errors are fatal to a transfer because they mean the two
/// ends no longer agree on the transfer parameters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// Packet shorter than the fixed header for its opcode.
    #[error("underlength packet ({len} bytes)")]
    Underlength { len: usize },

    /// Opcode outside the set handled by a read-only client.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),

    /// "blksize" option value was not a plain decimal number.
    #[error("invalid blksize option {0:?}")]
    InvalidBlksize(String),

    /// "tsize" option value was not a plain decimal number.
    #[error("invalid tsize option {0:?}")]
    InvalidTsize(String),

    /// "multicast" option had no port field.
    #[error("multicast option missing port")]
    MulticastMissingPort,

    /// "multicast" option had no master-client field.
    #[error("multicast option missing mc flag")]
    MulticastMissingMc,

    /// "multicast" option master-client field was not numeric.
    #[error("invalid multicast mc flag {0:?}")]
    MulticastInvalidMc(String),

    /// "multicast" option address was not an IPv4 dotted quad.
    #[error("invalid multicast IP address {0:?}")]
    MulticastInvalidIp(String),

    /// "multicast" option port was not a valid port number.
    #[error("invalid multicast port {0:?}")]
    MulticastInvalidPort(String),
}

/// Result type for wire-layer operations.
pub type Result<T> = std::result::Result<T, ProtoError>;
