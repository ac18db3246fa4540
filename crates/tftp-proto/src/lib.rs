//! # tftp-proto
//!
//! Wire-level building blocks for the Trivial File Transfer Protocol
//! (RFC 1350) and its option extensions: option negotiation (RFC 2347),
//! block size (RFC 2348), transfer size (RFC 2349) and multicast (RFC 2090).
//!
//! This crate is pure data transformation: packet encoding and decoding,
//! OACK option parsing, and the block bitmap used to assemble out-of-order
//! multicast deliveries. The transfer engine living on top of it is
//! `tftp-client`.
//!
//! ## Example: request round trip
//!
//! ```rust
//! use tftp_proto::packet::{encode_rrq, encode_ack, Packet};
//!
//! let rrq = encode_rrq("vmlinuz", Some(1432), false);
//! assert!(rrq.starts_with(b"\x00\x01vmlinuz\x00octet\x00"));
//!
//! let ack = encode_ack(7);
//! assert_eq!(ack, b"\x00\x04\x00\x07");
//!
//! let data = Packet::decode(b"\x00\x03\x00\x01hello").unwrap();
//! assert_eq!(data, Packet::Data { block: 1, data: b"hello" });
//! ```
//!
//! ## Example: tracking a multicast reception
//!
//! ```rust
//! use tftp_proto::bitmap::BlockBitmap;
//!
//! let mut bitmap = BlockBitmap::new();
//! bitmap.resize(3);
//! bitmap.set(2); // joined the group mid-stream
//! bitmap.set(0);
//! assert_eq!(bitmap.first_gap(), 1); // acknowledge block 1 next
//! bitmap.set(1);
//! assert!(bitmap.full());
//! ```

mod error;

pub mod bitmap;
pub mod options;
pub mod packet;

pub use error::{ProtoError, Result};

pub use bitmap::BlockBitmap;
pub use options::{parse_oack_options, MulticastOption, OackOptions};
pub use packet::{
    encode_ack, encode_rrq, resolve_block, ErrorCode, Packet, DEFAULT_BLKSIZE, MAX_BLKSIZE,
    MTFTP_PORT, TFTP_PORT,
};
