//! DHCP-driven default server.
//!
//! PXE environments learn their boot server from the DHCP `siaddr`
//! ("next-server") field. This applicator turns that value into a working
//! base URI of the form `tftp://<ip>/`.

use std::net::Ipv4Addr;

use tracing::debug;

use crate::url::TftpUrl;

/// Tracks the DHCP next-server setting and derives the current working URI
/// from it.
///
/// The URI is rewritten only when the server address actually changes:
/// settings are re-applied wholesale whenever anything changes, and a user
/// who picked their own URI would not expect it clobbered because an
/// unrelated setting moved.
#[derive(Debug)]
pub struct NextServerApplicator {
    next_server: Ipv4Addr,
    cwuri: Option<TftpUrl>,
}

impl Default for NextServerApplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl NextServerApplicator {
    pub fn new() -> Self {
        Self {
            next_server: Ipv4Addr::UNSPECIFIED,
            cwuri: None,
        }
    }

    /// Feeds the latest next-server value. Returns the new working URI when
    /// the address changed, `None` otherwise.
    pub fn apply(&mut self, next_server: Ipv4Addr) -> Option<&TftpUrl> {
        if next_server == self.next_server {
            return None;
        }
        self.next_server = next_server;

        debug!(%next_server, "tftp server changed");
        // The URI is built from a valid address, so this cannot fail.
        self.cwuri = TftpUrl::parse(&format!("tftp://{next_server}/")).ok();
        self.cwuri.as_ref()
    }

    /// The current working URI, if a server has been applied.
    pub fn current(&self) -> Option<&TftpUrl> {
        self.cwuri.as_ref()
    }
}
