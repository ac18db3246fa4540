//! # tftp-client
//!
//! A read-only client engine for the three wire-compatible variants of the
//! Trivial File Transfer Protocol:
//!
//! - **TFTP** (RFC 1350) with option negotiation (RFC 2347), block size
//!   (RFC 2348) and transfer size (RFC 2349)
//! - **TFTM**, TFTP with the RFC 2090 multicast option
//! - **MTFTP**, the PXE flavour of multicast TFTP, with automatic fallback
//!   to plain TFTP when the multicast group stays silent
//!
//! One request downloads one file. The engine negotiates options, binds to
//! the server's per-transfer port, assembles blocks (out of order when
//! multicast is in play) and hands positioned byte ranges to the consumer.
//!
//! ## Protocol flow
//!
//! ```text
//! Client                                              Server
//!    |  ── RRQ "file" octet blksize=1432 tsize=0 ──────> :69
//!    |                                                    |
//!    |  <────── OACK blksize=512 tsize=1024 ───────────  :TID
//!    |  ── ACK 0 ──────────────────────────────────────> :TID
//!    |  <────── DATA 1 (512 bytes) ─────────────────────  |
//!    |  ── ACK 1 ──────────────────────────────────────>  |
//!    |  <────── DATA 2 (512 bytes) ─────────────────────  |
//!    |  ── ACK 2 ──────────────────────────────────────>  |
//!    |  <────── DATA 3 (0 bytes) ───────────────────────  |
//!    |  ── ACK 3 ──────────────────────────────────────>  |
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use tftp_client::{open, TransferEvent};
//!
//! # async fn example() -> tftp_client::Result<()> {
//! let mut transfer = open("tftp://192.168.0.1/boot/vmlinuz").await?;
//! let mut file = vec![0u8; 0];
//!
//! while let Some(event) = transfer.recv().await {
//!     match event {
//!         TransferEvent::Size(len) => {
//!             if file.len() < len as usize {
//!                 file.resize(len as usize, 0);
//!             }
//!         }
//!         TransferEvent::Block { offset, data } => {
//!             let end = offset as usize + data.len();
//!             if file.len() < end {
//!                 file.resize(end, 0);
//!             }
//!             file[offset as usize..end].copy_from_slice(&data);
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
mod error;
pub mod request;
pub mod settings;
mod socket;
pub mod timer;
pub mod url;

pub use error::{Result, TftpError};
pub use request::{open, open_url, open_with, TransferConfig, TransferEvent, TransferHandle};
pub use timer::TimerConfig;
pub use url::{Scheme, TftpUrl};
