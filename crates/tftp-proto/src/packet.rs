//! TFTP packet encoding and decoding.
//!
//! A read-only client encodes two packet types and decodes three:
//!
//! ```text
//! RRQ   (1):  | opcode | filename | 0 | "octet" | 0 | [opt | 0 | value | 0]... |
//! DATA  (3):  | opcode | block# | payload (0..blksize bytes) |
//! ACK   (4):  | opcode | block# |
//! ERROR (5):  | opcode | errcode | message | 0 |
//! OACK  (6):  | opcode | [opt | 0 | value | 0]... |
//! ```
//!
//! All multi-byte integers on the wire are big-endian. No I/O happens here,
//! this is pure data transformation.

use crate::error::{ProtoError, Result};

/// Read request opcode.
pub const OPCODE_RRQ: u16 = 1;
/// Data block opcode.
pub const OPCODE_DATA: u16 = 3;
/// Acknowledgement opcode.
pub const OPCODE_ACK: u16 = 4;
/// Error opcode.
pub const OPCODE_ERROR: u16 = 5;
/// Option acknowledgement opcode.
pub const OPCODE_OACK: u16 = 6;

/// Block size used when the server does not negotiate one.
pub const DEFAULT_BLKSIZE: usize = 512;

/// Largest block size worth requesting: an Ethernet frame minus the IP, UDP
/// and DATA headers.
pub const MAX_BLKSIZE: usize = 1432;

/// Well-known TFTP server port.
pub const TFTP_PORT: u16 = 69;

/// Well-known MTFTP server port.
pub const MTFTP_PORT: u16 = 1759;

/// The only transfer mode a binary downloader needs.
pub const MODE_OCTET: &str = "octet";

/// Server error codes carried by ERROR packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Code 1: the requested file does not exist.
    FileNotFound,
    /// Code 2: access violation.
    AccessDenied,
    /// Code 4: illegal TFTP operation.
    IllegalOperation,
    /// Any other code.
    Other(u16),
}

impl ErrorCode {
    /// Maps a wire error code to its meaning.
    pub fn from_wire(code: u16) -> Self {
        match code {
            1 => ErrorCode::FileNotFound,
            2 => ErrorCode::AccessDenied,
            4 => ErrorCode::IllegalOperation,
            other => ErrorCode::Other(other),
        }
    }
}

/// A decoded inbound packet.
///
/// Payloads borrow from the receive buffer; nothing is copied until the
/// caller decides a packet is worth keeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet<'a> {
    /// A data block. `block` is the raw 16-bit wire block number.
    Data { block: u16, data: &'a [u8] },
    /// An option acknowledgement. `options` is the raw option region,
    /// parsed separately by [`crate::options::parse_oack_options`].
    Oack { options: &'a [u8] },
    /// A terminal server error.
    Error { code: ErrorCode, message: String },
}

impl<'a> Packet<'a> {
    /// Decodes one inbound datagram.
    ///
    /// Returns [`ProtoError::Underlength`] when the buffer is shorter than
    /// the fixed header for its opcode and [`ProtoError::UnknownOpcode`] for
    /// opcodes a read-only client never receives (including RRQ and ACK).
    pub fn decode(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(ProtoError::Underlength { len: buf.len() });
        }
        let opcode = u16::from_be_bytes([buf[0], buf[1]]);
        match opcode {
            OPCODE_DATA => {
                if buf.len() < 4 {
                    return Err(ProtoError::Underlength { len: buf.len() });
                }
                let block = u16::from_be_bytes([buf[2], buf[3]]);
                Ok(Packet::Data {
                    block,
                    data: &buf[4..],
                })
            }
            OPCODE_OACK => Ok(Packet::Oack { options: &buf[2..] }),
            OPCODE_ERROR => {
                if buf.len() < 4 {
                    return Err(ProtoError::Underlength { len: buf.len() });
                }
                let code = ErrorCode::from_wire(u16::from_be_bytes([buf[2], buf[3]]));
                let raw = &buf[4..];
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                let message = String::from_utf8_lossy(&raw[..end]).into_owned();
                Ok(Packet::Error { code, message })
            }
            other => Err(ProtoError::UnknownOpcode(other)),
        }
    }
}

fn push_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

/// Encodes a read request.
///
/// `filename` is placed on the wire as given; callers strip any leading `/`
/// beforehand. When `blksize` is set the request carries `blksize=<n>` and
/// `tsize=0` options; `multicast` adds a `multicast` option with an empty
/// value.
pub fn encode_rrq(filename: &str, blksize: Option<usize>, multicast: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + filename.len() + 32);
    buf.extend_from_slice(&OPCODE_RRQ.to_be_bytes());
    push_cstr(&mut buf, filename);
    push_cstr(&mut buf, MODE_OCTET);
    if let Some(blksize) = blksize {
        push_cstr(&mut buf, "blksize");
        push_cstr(&mut buf, &blksize.to_string());
        push_cstr(&mut buf, "tsize");
        push_cstr(&mut buf, "0");
    }
    if multicast {
        push_cstr(&mut buf, "multicast");
        push_cstr(&mut buf, "");
    }
    buf
}

/// Encodes an acknowledgement for `block`.
pub fn encode_ack(block: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4);
    buf.extend_from_slice(&OPCODE_ACK.to_be_bytes());
    buf.extend_from_slice(&block.to_be_bytes());
    buf
}

/// Resolves a 16-bit wire block number to an unbounded 0-based block index.
///
/// Wire block numbers start at 1 and wrap at 65535. The current epoch is
/// recovered from `first_gap`, the lowest block index not yet received:
/// since blocks are acknowledged in order, the next expected wire number is
/// `first_gap + 1`, whose high bits identify the epoch. Returns `None` for
/// wire block 0 in the first epoch, which no valid sequence can produce.
pub fn resolve_block(first_gap: u64, wire_block: u16) -> Option<u64> {
    let epoch = (first_gap + 1) & !0xffff;
    if wire_block == 0 && epoch == 0 {
        return None;
    }
    Some(epoch + u64::from(wire_block) - 1)
}
