//! Option-acknowledgement parsing.
//!
//! An OACK carries a flat run of NUL-terminated name/value pairs. Parsing is
//! deliberately forgiving about the region's tail: at least one deployed
//! server (IBM Tivoli PXE Server 5.1.0.3) appends garbage bytes after the
//! last well-formed pair, so anything that does not form a complete pair is
//! ignored rather than rejected. A value that fails to parse is a hard
//! error: the two ends would disagree about the transfer parameters.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::error::{ProtoError, Result};

/// Options accepted by the server, decoded from an OACK.
///
/// Applying these to a running transfer (replacing the block size, presizing
/// receive state, opening a multicast socket) is the caller's business; this
/// type only reports what the server said.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OackOptions {
    /// Negotiated "blksize" value.
    pub blksize: Option<usize>,
    /// Advertised "tsize" (total transfer size) in bytes.
    pub tsize: Option<u64>,
    /// RFC 2090 "multicast" parameters.
    pub multicast: Option<MulticastOption>,
}

/// Parsed `multicast=<addr>,<port>,<mc>` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MulticastOption {
    /// Group endpoint to listen on. `None` when the server left the address
    /// and port fields empty, deferring group assignment to a later OACK.
    pub group: Option<SocketAddrV4>,
    /// Master-client flag. Only the master client of a multicast group
    /// acknowledges data blocks.
    pub master: bool,
}

/// Splits the next NUL-terminated string off `buf`.
///
/// Returns `None` when no terminator is found before the end of the region
/// or the bytes are not UTF-8; both mean the remainder is not a well-formed
/// pair and should be ignored.
fn take_cstr(buf: &[u8]) -> Option<(&str, &[u8])> {
    let nul = buf.iter().position(|&b| b == 0)?;
    let s = std::str::from_utf8(&buf[..nul]).ok()?;
    Some((s, &buf[nul + 1..]))
}

/// Parses the option region of an OACK.
///
/// Option names are matched case-insensitively; unknown options are silently
/// ignored as RFC 2347 requires.
pub fn parse_oack_options(region: &[u8]) -> Result<OackOptions> {
    let mut options = OackOptions::default();
    let mut rest = region;
    while !rest.is_empty() {
        let Some((name, after_name)) = take_cstr(rest) else {
            break;
        };
        let Some((value, after_value)) = take_cstr(after_name) else {
            break;
        };
        apply_option(&mut options, name, value)?;
        rest = after_value;
    }
    Ok(options)
}

fn apply_option(options: &mut OackOptions, name: &str, value: &str) -> Result<()> {
    if name.eq_ignore_ascii_case("blksize") {
        options.blksize = Some(
            value
                .parse()
                .map_err(|_| ProtoError::InvalidBlksize(value.to_string()))?,
        );
    } else if name.eq_ignore_ascii_case("tsize") {
        options.tsize = Some(
            value
                .parse()
                .map_err(|_| ProtoError::InvalidTsize(value.to_string()))?,
        );
    } else if name.eq_ignore_ascii_case("multicast") {
        options.multicast = Some(parse_multicast(value)?);
    }
    // Unknown options are silently ignored.
    Ok(())
}

fn parse_multicast(value: &str) -> Result<MulticastOption> {
    let (addr, rest) = value.split_once(',').ok_or(ProtoError::MulticastMissingPort)?;
    let (port, mc) = rest.split_once(',').ok_or(ProtoError::MulticastMissingMc)?;

    let master = mc
        .parse::<u32>()
        .map_err(|_| ProtoError::MulticastInvalidMc(mc.to_string()))?
        != 0;

    let group = if !addr.is_empty() && !port.is_empty() {
        let ip: Ipv4Addr = addr
            .parse()
            .map_err(|_| ProtoError::MulticastInvalidIp(addr.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| ProtoError::MulticastInvalidPort(port.to_string()))?;
        Some(SocketAddrV4::new(ip, port))
    } else {
        None
    };

    Ok(MulticastOption { group, master })
}
