//! URI parsing for the three TFTP variants.
//!
//! # Supported URI formats
//!
//! - `tftp://host[:port]/path` - classic TFTP, default port 69
//! - `tftm://host[:port]/path` - TFTP with the RFC 2090 multicast option
//! - `mtftp://host[:port]/path` - PXE multicast TFTP, default port 1759
//!
//! # Example
//!
//! ```
//! use tftp_client::url::{Scheme, TftpUrl};
//!
//! let url = TftpUrl::parse("tftp://192.168.0.1/boot/vmlinuz").unwrap();
//! assert_eq!(url.scheme, Scheme::Tftp);
//! assert_eq!(url.host, "192.168.0.1");
//! assert_eq!(url.port_or_default(), 69);
//! assert_eq!(url.wire_path(), "boot/vmlinuz");
//! ```

use std::fmt;

use tftp_proto::{MTFTP_PORT, TFTP_PORT};

use crate::error::{Result, TftpError};

/// Transfer variant selected by the URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Classic TFTP.
    Tftp,
    /// Multicast TFTP (RFC 2090).
    Tftm,
    /// PXE multicast TFTP.
    Mtftp,
}

impl Scheme {
    /// Server port used when the URI does not specify one.
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Tftp | Scheme::Tftm => TFTP_PORT,
            Scheme::Mtftp => MTFTP_PORT,
        }
    }

    /// Scheme name as it appears in a URI.
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Tftp => "tftp",
            Scheme::Tftm => "tftm",
            Scheme::Mtftp => "mtftp",
        }
    }
}

/// A parsed transfer URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TftpUrl {
    /// The transfer variant.
    pub scheme: Scheme,
    /// Server host name or address.
    pub host: String,
    /// Explicit server port, when the URI carried one.
    pub port: Option<u16>,
    /// File path, including the leading `/`.
    pub path: String,
}

impl TftpUrl {
    /// Parses a transfer URI.
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| TftpError::InvalidArgument(format!("missing scheme in {uri:?}")))?;

        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "tftp" => Scheme::Tftp,
            "tftm" => Scheme::Tftm,
            "mtftp" => Scheme::Mtftp,
            other => {
                return Err(TftpError::InvalidArgument(format!(
                    "unsupported scheme {other:?}"
                )))
            }
        };

        let (authority, path) = match rest.find('/') {
            Some(slash) => (&rest[..slash], &rest[slash..]),
            None => (rest, ""),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port.parse().map_err(|_| {
                    TftpError::InvalidArgument(format!("invalid port {port:?}"))
                })?;
                (host, Some(port))
            }
            None => (authority, None),
        };

        if host.is_empty() {
            return Err(TftpError::InvalidArgument(format!("missing host in {uri:?}")));
        }

        Ok(TftpUrl {
            scheme,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// The server port: explicit when given, otherwise the scheme default.
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }

    /// File name as placed on the wire.
    ///
    /// A URI provides no way to express a non-absolute path, but many TFTP
    /// servers (Windows ones in particular) object to a leading `/`, and a
    /// DHCP-supplied filename would not have one. One leading slash is
    /// therefore stripped.
    pub fn wire_path(&self) -> &str {
        self.path.strip_prefix('/').unwrap_or(&self.path)
    }
}

impl fmt::Display for TftpUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        write!(f, "{}", self.path)
    }
}
