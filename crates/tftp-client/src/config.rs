//! Process-wide transfer configuration.
//!
//! Two knobs are global rather than per-request: the block size we ask
//! servers for, and the multicast group an `mtftp://` transfer listens on
//! (handed out by the DHCP/PXE environment, not by the URI). Both are plain
//! atomics; a change takes effect on the next read request and is not
//! synchronized with transfers already in flight.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};

use tftp_proto::{DEFAULT_BLKSIZE, MAX_BLKSIZE};

/// Default MTFTP multicast group address.
pub const DEFAULT_MTFTP_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 1, 1);

/// Default MTFTP multicast port.
pub const DEFAULT_MTFTP_PORT: u16 = 3001;

static REQUEST_BLKSIZE: AtomicU32 = AtomicU32::new(MAX_BLKSIZE as u32);
static MTFTP_ADDR: AtomicU32 = AtomicU32::new(u32::from_be_bytes(DEFAULT_MTFTP_ADDR.octets()));
static MTFTP_PORT: AtomicU16 = AtomicU16::new(DEFAULT_MTFTP_PORT);

/// Sets the block size requested in read requests.
///
/// Values below the protocol default of 512 are raised to it.
pub fn set_request_blksize(blksize: usize) {
    let blksize = blksize.max(DEFAULT_BLKSIZE);
    REQUEST_BLKSIZE.store(blksize as u32, Ordering::Relaxed);
}

/// The block size requested in read requests.
pub fn request_blksize() -> usize {
    REQUEST_BLKSIZE.load(Ordering::Relaxed) as usize
}

/// Sets the MTFTP multicast group address.
pub fn set_mtftp_address(addr: Ipv4Addr) {
    MTFTP_ADDR.store(u32::from(addr), Ordering::Relaxed);
}

/// Sets the MTFTP multicast port.
pub fn set_mtftp_port(port: u16) {
    MTFTP_PORT.store(port, Ordering::Relaxed);
}

/// The MTFTP multicast group endpoint.
pub fn mtftp_group() -> SocketAddrV4 {
    SocketAddrV4::new(
        Ipv4Addr::from(MTFTP_ADDR.load(Ordering::Relaxed)),
        MTFTP_PORT.load(Ordering::Relaxed),
    )
}
