//! The transfer engine.
//!
//! One request downloads one file. The engine drives a small state machine
//! from a single task, multiplexing its event sources with `select!`:
//!
//! ```text
//!             ┌────────────────────────────────────────┐
//!             │              TftpRequest               │
//!   timer ───▶│  retransmit RRQ / ACK, MTFTP recovery  │
//! unicast ───▶│  OACK, DATA, ERROR  (binds the TID)    │──▶ events ──▶ consumer
//! multicast ─▶│  DATA only                             │
//!  cancel ───▶│  consumer gave up                      │
//!             └────────────────────────────────────────┘
//! ```
//!
//! ## Transfer identifiers
//!
//! The server answers a read request from a freshly chosen port, its
//! transfer identifier. The first reply binds the request to that source;
//! everything from elsewhere is dropped on the floor.
//!
//! ## Acknowledgement gating
//!
//! Receiving *anything* on the unicast socket marks this client as the one
//! that acknowledges. That covers plain TFTP (all traffic is unicast), the
//! RFC 2090 multicast option (the OACK arrives on unicast, and the option
//! value then clears the flag for non-master clients), and MTFTP (only the
//! master client is addressed directly).
//!
//! ## Block accounting
//!
//! Blocks are tracked in a bitmap so that multicast data arriving out of
//! order, or from a transfer already in progress, still lands at the right
//! file offset. The acknowledged block number is always the bitmap's first
//! gap, and the transfer is complete when the bitmap has no gaps left.

use std::net::{SocketAddr, SocketAddrV4};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use tftp_proto::{
    encode_ack, encode_rrq, parse_oack_options, resolve_block, BlockBitmap, Packet,
    DEFAULT_BLKSIZE, TFTP_PORT,
};

use crate::config;
use crate::error::{Result, TftpError};
use crate::socket::{MulticastSocket, UnicastSocket};
use crate::timer::{RetryTimer, TimerConfig};
use crate::url::{Scheme, TftpUrl};

/// Request flag bits.
mod flags {
    /// Send ACK packets.
    pub const SEND_ACK: u16 = 0x0001;
    /// Request blksize and tsize options in the RRQ.
    pub const RRQ_SIZES: u16 = 0x0002;
    /// Request the multicast option in the RRQ.
    pub const RRQ_MULTICAST: u16 = 0x0004;
    /// Attempt MTFTP recovery on timeout.
    pub const MTFTP_RECOVERY: u16 = 0x0008;
}

/// MTFTP open attempts before giving up on multicast and retrying as a
/// plain TFTP transfer.
const MTFTP_MAX_TIMEOUTS: u32 = 3;

/// Per-request tuning.
#[derive(Debug, Clone, Default)]
pub struct TransferConfig {
    /// Retransmission timing.
    pub timing: TimerConfig,
    /// Multicast endpoint an `mtftp://` transfer listens on. `None` uses
    /// the process-wide [`config::mtftp_group`] setting.
    pub multicast_local: Option<SocketAddrV4>,
}

/// What a transfer delivers to its consumer.
#[derive(Debug, PartialEq, Eq)]
pub enum TransferEvent {
    /// The known lower bound on the file length grew, so a consumer can
    /// preallocate. The block that taught us the new bound is delivered
    /// just before this event.
    Size(u64),
    /// File bytes positioned at an absolute offset. Blocks may arrive out
    /// of order and, on lossy multicast paths, more than once.
    Block { offset: u64, data: Vec<u8> },
}

/// Consumer end of a running transfer.
///
/// Dropping the handle cancels the transfer.
#[derive(Debug)]
pub struct TransferHandle {
    events: mpsc::UnboundedReceiver<Event>,
    window: watch::Receiver<usize>,
    cancel: CancellationToken,
    status: Option<Result<()>>,
}

impl TransferHandle {
    /// Receives the next delivery. Returns `None` once the transfer has
    /// finished; [`status`](Self::status) then reports how it ended.
    pub async fn recv(&mut self) -> Option<TransferEvent> {
        match self.events.recv().await? {
            Event::Deliver(event) => Some(event),
            Event::Done(status) => {
                self.status = Some(status);
                None
            }
        }
    }

    /// The preferred delivery chunk size: the negotiated block size.
    pub fn window(&self) -> usize {
        *self.window.borrow()
    }

    /// How the transfer ended. Available once [`recv`](Self::recv) has
    /// returned `None`; `None` before that.
    pub fn status(&self) -> Option<&Result<()>> {
        self.status.as_ref()
    }

    /// Cancels the transfer. Idempotent; the engine tears down its sockets
    /// and timer immediately.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TransferHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Starts a download with default tuning.
pub async fn open(uri: &str) -> Result<TransferHandle> {
    open_with(uri, TransferConfig::default()).await
}

/// Starts a download with explicit tuning.
pub async fn open_with(uri: &str, config: TransferConfig) -> Result<TransferHandle> {
    open_url(TftpUrl::parse(uri)?, config).await
}

/// Starts a download from an already-parsed URI.
///
/// The URI scheme selects the variant: `tftp://` negotiates sizes,
/// `tftm://` additionally requests the multicast option, and `mtftp://`
/// listens on the configured multicast group with recovery-on-timeout.
pub async fn open_url(url: TftpUrl, config: TransferConfig) -> Result<TransferHandle> {
    if url.wire_path().is_empty() {
        return Err(TftpError::InvalidArgument(format!("missing path in {url}")));
    }

    let request_flags = match url.scheme {
        Scheme::Tftp => flags::RRQ_SIZES,
        Scheme::Tftm => flags::RRQ_SIZES | flags::RRQ_MULTICAST,
        Scheme::Mtftp => flags::MTFTP_RECOVERY,
    };

    let server_port = url.port_or_default();
    let socket = UnicastSocket::open(&url.host, server_port).await?;
    let mc_socket = if url.scheme == Scheme::Mtftp {
        let group = config.multicast_local.unwrap_or_else(config::mtftp_group);
        Some(MulticastSocket::open(group).await?)
    } else {
        None
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (window_tx, window_rx) = watch::channel(DEFAULT_BLKSIZE);
    let cancel = CancellationToken::new();

    let mut request = TftpRequest {
        url,
        server_port,
        socket,
        mc_socket,
        peer: None,
        blksize: DEFAULT_BLKSIZE,
        tsize: 0,
        filesize: 0,
        bitmap: BlockBitmap::new(),
        flags: request_flags,
        mtftp_timeouts: 0,
        timer: RetryTimer::new(config.timing),
        events: events_tx,
        window: window_tx,
        cancel: cancel.clone(),
    };

    // The RRQ goes out on the first timer fire.
    request.timer.start_nodelay();
    tokio::spawn(request.run());

    Ok(TransferHandle {
        events: events_rx,
        window: window_rx,
        cancel,
        status: None,
    })
}

/// Channel protocol between the engine task and the handle.
#[derive(Debug)]
enum Event {
    Deliver(TransferEvent),
    Done(Result<()>),
}

/// What one pass through the event loop observed.
enum Wakeup {
    Cancelled,
    Timeout,
    Unicast { len: usize, src: SocketAddr },
    Multicast { len: usize, src: SocketAddr },
}

/// State for one ongoing transfer.
struct TftpRequest {
    url: TftpUrl,
    /// Port the read request is (re)sent to. Reset to 69 by MTFTP fallback.
    server_port: u16,
    socket: UnicastSocket,
    mc_socket: Option<MulticastSocket>,
    /// The server's data endpoint, learned from its first reply.
    peer: Option<SocketAddr>,
    /// Negotiated block size.
    blksize: usize,
    /// Server-advertised total size; 0 means unknown.
    tsize: u64,
    /// Largest known lower bound on the file length.
    filesize: u64,
    bitmap: BlockBitmap,
    flags: u16,
    /// Consecutive timer expiries with no reply while waiting for an MTFTP
    /// transfer to open.
    mtftp_timeouts: u32,
    timer: RetryTimer,
    events: mpsc::UnboundedSender<Event>,
    window: watch::Sender<usize>,
    cancel: CancellationToken,
}

impl TftpRequest {
    async fn run(mut self) {
        let status = self.run_to_completion().await;

        // Teardown order matters to observers: the timer must not fire
        // again, the ports must be released, and only then does the
        // consumer learn the outcome.
        debug!(url = %self.url, ok = status.is_ok(), "transfer finished");
        self.timer.stop();
        let TftpRequest {
            socket,
            mc_socket,
            events,
            ..
        } = self;
        drop(socket);
        drop(mc_socket);
        let _ = events.send(Event::Done(status));
    }

    async fn run_to_completion(&mut self) -> Result<()> {
        // Sized for the largest DATA packet we would request. The server
        // cannot negotiate the block size upwards (RFC 2348), so this holds
        // for the whole transfer.
        let buf_len = config::request_blksize().max(DEFAULT_BLKSIZE) + 4;
        let mut ubuf = vec![0u8; buf_len];
        let mut mbuf = vec![0u8; buf_len];

        loop {
            let wakeup = tokio::select! {
                _ = self.cancel.cancelled() => Wakeup::Cancelled,
                _ = self.timer.fired() => Wakeup::Timeout,
                res = self.socket.recv_from(&mut ubuf) => {
                    let (len, src) = res?;
                    Wakeup::Unicast { len, src }
                }
                res = recv_multicast(&self.mc_socket, &mut mbuf) => {
                    let (len, src) = res?;
                    Wakeup::Multicast { len, src }
                }
            };

            let done = match wakeup {
                Wakeup::Cancelled => return Err(TftpError::Cancelled),
                Wakeup::Timeout => {
                    let fail = self.timer.expire();
                    self.handle_timeout(fail).await?;
                    false
                }
                Wakeup::Unicast { len, src } => {
                    // Anything unicast means the server is talking to us
                    // directly: we are the acknowledging client.
                    self.flags |= flags::SEND_ACK;
                    self.receive(&ubuf[..len], src).await?
                }
                Wakeup::Multicast { len, src } => self.receive(&mbuf[..len], src).await?,
            };

            if done {
                return Ok(());
            }
        }
    }

    fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    /// Replaces the unicast socket, forgetting the old transfer identifier.
    async fn reopen(&mut self) -> Result<()> {
        self.flags &= !flags::SEND_ACK;
        self.peer = None;
        self.socket = UnicastSocket::open(&self.url.host, self.server_port).await?;
        Ok(())
    }

    async fn handle_timeout(&mut self, fail: bool) -> Result<()> {
        if self.has_flag(flags::MTFTP_RECOVERY) {
            if self.peer.is_some() {
                // The server responded at least once; re-sending the RRQ
                // from a fresh port restarts the download.
                debug!("reopening to restart the multicast transfer");
                self.reopen().await?;
            } else {
                self.mtftp_timeouts += 1;
                debug!(timeouts = self.mtftp_timeouts, "no answer to multicast open");
                if self.mtftp_timeouts > MTFTP_MAX_TIMEOUTS {
                    debug!("falling back to plain tftp");
                    self.flags = flags::RRQ_SIZES;
                    self.mc_socket = None;
                    // The renegotiated block size may differ, which would
                    // invalidate every index in the bitmap.
                    self.bitmap = BlockBitmap::new();
                    self.server_port = TFTP_PORT;
                    self.reopen().await?;
                }
            }
        } else if fail {
            return Err(TftpError::Timeout);
        }
        self.send_packet().await
    }

    /// Sends whatever keeps the transfer moving: the read request until the
    /// server has answered, afterwards an acknowledgement when this client
    /// is the acknowledging one.
    async fn send_packet(&mut self) -> Result<()> {
        self.timer.stop();
        self.timer.start();

        match self.peer {
            None => {
                let path = self.url.wire_path();
                debug!(path, port = self.server_port, "requesting file");
                let blksize = self
                    .has_flag(flags::RRQ_SIZES)
                    .then(config::request_blksize);
                let rrq = encode_rrq(path, blksize, self.has_flag(flags::RRQ_MULTICAST));
                self.socket.send(&rrq).await?;
            }
            Some(peer) if self.has_flag(flags::SEND_ACK) => {
                let block = self.bitmap.first_gap();
                trace!(block, "acknowledging");
                self.socket.send_to(&encode_ack(block as u16), peer).await?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Common receive path for both sockets: transfer-identifier filtering,
    /// decoding, and dispatch by opcode. Returns `true` when the transfer
    /// has completed.
    async fn receive(&mut self, buf: &[u8], src: SocketAddr) -> Result<bool> {
        if buf.len() < 2 {
            debug!(len = buf.len(), "dropping underlength packet");
            return Ok(false);
        }

        match self.peer {
            None => {
                debug!(%src, "transfer bound to server data port");
                self.peer = Some(src);
            }
            Some(peer) if peer != src => {
                debug!(%src, expected = %peer, "dropping packet from wrong source");
                return Ok(false);
            }
            Some(_) => {}
        }

        let packet = match Packet::decode(buf) {
            Ok(packet) => packet,
            Err(err) => {
                debug!(%err, "dropping undecodable packet");
                return Ok(false);
            }
        };

        match packet {
            Packet::Oack { options } => {
                self.handle_oack(options).await?;
                Ok(false)
            }
            Packet::Data { block, data } => self.handle_data(block, data).await,
            Packet::Error { code, message } => {
                warn!(?code, %message, "server aborted the transfer");
                Err(TftpError::from_server(code))
            }
        }
    }

    async fn handle_oack(&mut self, region: &[u8]) -> Result<()> {
        let options = parse_oack_options(region)?;

        if let Some(blksize) = options.blksize {
            debug!(blksize, "negotiated block size");
            self.blksize = blksize;
            let _ = self.window.send(blksize);
        }
        if let Some(tsize) = options.tsize {
            debug!(tsize, "server advertised transfer size");
            self.tsize = tsize;
        }
        if let Some(multicast) = options.multicast {
            if !multicast.master {
                self.flags &= !flags::SEND_ACK;
            }
            debug!(master = multicast.master, "multicast option accepted");
            if let Some(group) = multicast.group {
                self.mc_socket = Some(MulticastSocket::open(group).await?);
            }
        }

        if self.tsize > 0 {
            self.presize(self.tsize)?;
        }

        // Ask for the next block we need, block 1 after a fresh OACK.
        self.send_packet().await
    }

    async fn handle_data(&mut self, wire_block: u16, data: &[u8]) -> Result<bool> {
        let Some(block) = resolve_block(self.bitmap.first_gap() as u64, wire_block) else {
            warn!("received data block 0 outside a wraparound epoch");
            return Err(TftpError::Packet("data block 0".to_string()));
        };

        if data.len() > self.blksize {
            debug!(
                len = data.len(),
                blksize = self.blksize,
                "dropping overlength data packet"
            );
            return Ok(false);
        }

        let offset = block * self.blksize as u64;
        trace!(block, offset, len = data.len(), "data");

        self.deliver(TransferEvent::Block {
            offset,
            data: data.to_vec(),
        })?;

        // Every block teaches us a lower bound on the file length, which is
        // all we ever learn when the server never told us a tsize.
        self.presize(offset + data.len() as u64)?;
        self.bitmap.set(block as usize);
        self.send_packet().await?;

        Ok(self.bitmap.full())
    }

    /// Grows the bitmap and tells the consumer once a new lower bound `len`
    /// on the file length is known.
    ///
    /// A file whose length is an exact multiple of the block size still ends
    /// with a zero-length block, hence the unconditional `+ 1`.
    fn presize(&mut self, len: u64) -> Result<()> {
        if len > self.filesize {
            self.filesize = len;
            self.deliver(TransferEvent::Size(len))?;
        } else if !self.bitmap.is_empty() {
            // Nothing new, and the bitmap is already sized.
            return Ok(());
        }

        let blocks = (self.filesize / self.blksize as u64) + 1;
        self.bitmap.resize(blocks as usize);
        trace!(filesize = self.filesize, blocks, "presized receive state");
        Ok(())
    }

    fn deliver(&self, event: TransferEvent) -> Result<()> {
        // A vanished consumer is indistinguishable from an explicit close.
        self.events
            .send(Event::Deliver(event))
            .map_err(|_| TftpError::Cancelled)
    }
}

async fn recv_multicast(
    socket: &Option<MulticastSocket>,
    buf: &mut [u8],
) -> std::io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buf).await,
        None => std::future::pending().await,
    }
}
