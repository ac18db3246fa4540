//! End-to-end transfers against a scripted UDP peer on loopback.
//!
//! Each test plays the server side by hand: it receives the client's read
//! request on a "well-known port" socket, then answers from a second socket
//! standing in for the server's per-transfer port (its TID), exactly as a
//! real server forks transfers off its listener.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use tftp_client::{config, open_with, TftpError, TimerConfig, TransferConfig, TransferEvent, TransferHandle};

/// Transfer tuning fast enough for tests but with enough headroom that a
/// scripted reply never races a retransmission failure.
fn fast(min_ms: u64, max_ms: u64) -> TransferConfig {
    TransferConfig {
        timing: TimerConfig {
            min_timeout: Duration::from_millis(min_ms),
            max_timeout: Duration::from_millis(max_ms),
        },
        multicast_local: None,
    }
}

async fn bind_server() -> (UdpSocket, u16) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    (socket, port)
}

async fn recv_packet(socket: &UdpSocket) -> (Vec<u8>, SocketAddr) {
    let mut buf = [0u8; 2048];
    let (len, src) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for a client packet")
        .unwrap();
    (buf[..len].to_vec(), src)
}

async fn next_event(handle: &mut TransferHandle) -> Option<TransferEvent> {
    timeout(Duration::from_secs(5), handle.recv())
        .await
        .expect("timed out waiting for a transfer event")
}

fn push_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

fn rrq_bytes(path: &str, sizes: bool, multicast: bool) -> Vec<u8> {
    let mut buf = vec![0, 1];
    push_cstr(&mut buf, path);
    push_cstr(&mut buf, "octet");
    if sizes {
        push_cstr(&mut buf, "blksize");
        push_cstr(&mut buf, &config::request_blksize().to_string());
        push_cstr(&mut buf, "tsize");
        push_cstr(&mut buf, "0");
    }
    if multicast {
        push_cstr(&mut buf, "multicast");
        push_cstr(&mut buf, "");
    }
    buf
}

fn oack_packet(options: &[u8]) -> Vec<u8> {
    let mut buf = vec![0, 6];
    buf.extend_from_slice(options);
    buf
}

fn data_packet(block: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0, 3];
    buf.extend_from_slice(&block.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn error_packet(code: u16, message: &str) -> Vec<u8> {
    let mut buf = vec![0, 5];
    buf.extend_from_slice(&code.to_be_bytes());
    buf.extend_from_slice(message.as_bytes());
    buf.push(0);
    buf
}

fn ack_block(packet: &[u8]) -> u16 {
    assert_eq!(&packet[..2], &[0, 4], "expected an ACK, got {packet:?}");
    assert_eq!(packet.len(), 4);
    u16::from_be_bytes([packet[2], packet[3]])
}

async fn expect_ack(socket: &UdpSocket, block: u16) {
    let (packet, _) = recv_packet(socket).await;
    assert_eq!(ack_block(&packet), block);
}

fn expect_block(event: Option<TransferEvent>, offset: u64, payload: &[u8]) {
    match event {
        Some(TransferEvent::Block { offset: o, data }) => {
            assert_eq!(o, offset);
            assert_eq!(data, payload);
        }
        other => panic!("expected a block at offset {offset}, got {other:?}"),
    }
}

#[tokio::test]
async fn negotiated_transfer_with_oack() {
    let (server, port) = bind_server().await;
    let tid = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut handle = open_with(&format!("tftp://127.0.0.1:{port}/boot/image"), fast(200, 6400))
        .await
        .unwrap();

    let (rrq, client) = recv_packet(&server).await;
    assert_eq!(rrq, rrq_bytes("boot/image", true, false));

    // Negotiate the block size down and advertise the file length.
    tid.send_to(&oack_packet(b"blksize\x00512\x00tsize\x001024\x00"), client)
        .await
        .unwrap();
    expect_ack(&tid, 0).await;

    assert_eq!(next_event(&mut handle).await, Some(TransferEvent::Size(1024)));
    assert_eq!(handle.window(), 512);

    // 1024 bytes at blksize 512: two full blocks and a terminating empty one.
    tid.send_to(&data_packet(1, &[0xaa; 512]), client).await.unwrap();
    expect_ack(&tid, 1).await;
    expect_block(next_event(&mut handle).await, 0, &[0xaa; 512]);

    tid.send_to(&data_packet(2, &[0xbb; 512]), client).await.unwrap();
    expect_ack(&tid, 2).await;
    expect_block(next_event(&mut handle).await, 512, &[0xbb; 512]);

    tid.send_to(&data_packet(3, &[]), client).await.unwrap();
    expect_ack(&tid, 3).await;
    expect_block(next_event(&mut handle).await, 1024, &[]);

    assert_eq!(next_event(&mut handle).await, None);
    assert!(matches!(handle.status(), Some(Ok(()))));
}

#[tokio::test]
async fn transfer_without_oack_presizes_from_observed_bytes() {
    let (server, port) = bind_server().await;
    let tid = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut handle = open_with(&format!("tftp://127.0.0.1:{port}/f"), fast(200, 6400))
        .await
        .unwrap();

    let (_, client) = recv_packet(&server).await;

    // An old server ignores the options and answers with data directly.
    tid.send_to(&data_packet(1, &[1u8; 512]), client).await.unwrap();
    expect_ack(&tid, 1).await;
    expect_block(next_event(&mut handle).await, 0, &[1u8; 512]);
    assert_eq!(next_event(&mut handle).await, Some(TransferEvent::Size(512)));

    // A short block ends the file.
    tid.send_to(&data_packet(2, &[2u8; 300]), client).await.unwrap();
    expect_ack(&tid, 2).await;
    expect_block(next_event(&mut handle).await, 512, &[2u8; 300]);
    assert_eq!(next_event(&mut handle).await, Some(TransferEvent::Size(812)));

    assert_eq!(next_event(&mut handle).await, None);
    assert!(matches!(handle.status(), Some(Ok(()))));
}

#[tokio::test]
async fn multicast_master_client_acknowledges() {
    let (server, port) = bind_server().await;
    let tid = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut handle = open_with(&format!("tftm://127.0.0.1:{port}/f"), fast(200, 6400))
        .await
        .unwrap();

    let (rrq, client) = recv_packet(&server).await;
    assert_eq!(rrq, rrq_bytes("f", true, true));

    // Group assignment deferred; this client is the master.
    tid.send_to(
        &oack_packet(b"blksize\x00512\x00tsize\x001024\x00multicast\x00,,1\x00"),
        client,
    )
    .await
    .unwrap();
    expect_ack(&tid, 0).await;
    assert_eq!(next_event(&mut handle).await, Some(TransferEvent::Size(1024)));

    for (block, fill) in [(1u16, 0x11u8), (2, 0x22)] {
        tid.send_to(&data_packet(block, &[fill; 512]), client).await.unwrap();
        expect_ack(&tid, block).await;
        expect_block(
            next_event(&mut handle).await,
            u64::from(block - 1) * 512,
            &[fill; 512],
        );
    }
    tid.send_to(&data_packet(3, &[]), client).await.unwrap();
    expect_ack(&tid, 3).await;
    expect_block(next_event(&mut handle).await, 1024, &[]);

    assert_eq!(next_event(&mut handle).await, None);
    assert!(matches!(handle.status(), Some(Ok(()))));
}

#[tokio::test]
async fn multicast_non_master_does_not_acknowledge_the_oack() {
    let (server, port) = bind_server().await;
    let tid = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut handle = open_with(&format!("tftm://127.0.0.1:{port}/f"), fast(300, 9600))
        .await
        .unwrap();

    let (_, client) = recv_packet(&server).await;
    tid.send_to(&oack_packet(b"tsize\x00500\x00multicast\x00,,0\x00"), client)
        .await
        .unwrap();
    assert_eq!(next_event(&mut handle).await, Some(TransferEvent::Size(500)));

    // A non-master client stays silent: no acknowledgement for the OACK,
    // even across a retransmission interval.
    let mut buf = [0u8; 64];
    assert!(
        timeout(Duration::from_millis(500), tid.recv_from(&mut buf))
            .await
            .is_err(),
        "non-master client must not acknowledge"
    );

    // Being addressed directly promotes this client to master, after which
    // acknowledgements flow again.
    tid.send_to(&data_packet(1, &[7u8; 500]), client).await.unwrap();
    expect_ack(&tid, 1).await;
    expect_block(next_event(&mut handle).await, 0, &[7u8; 500]);

    assert_eq!(next_event(&mut handle).await, None);
    assert!(matches!(handle.status(), Some(Ok(()))));
}

#[tokio::test]
async fn mtftp_receives_on_the_multicast_path_without_acks() {
    let (server, port) = bind_server().await;

    // Pick a free port for the listening socket standing in for the group.
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let group_port = probe.local_addr().unwrap().port();
    drop(probe);

    let config = TransferConfig {
        timing: TimerConfig {
            min_timeout: Duration::from_millis(500),
            max_timeout: Duration::from_millis(16_000),
        },
        multicast_local: Some(SocketAddrV4::new(Ipv4Addr::LOCALHOST, group_port)),
    };
    let mut handle = open_with(&format!("mtftp://127.0.0.1:{port}/f"), config)
        .await
        .unwrap();

    // An MTFTP request carries no options.
    let (rrq, _) = recv_packet(&server).await;
    assert_eq!(rrq, rrq_bytes("f", false, false));

    // Data arrives on the listening path only; this client was never
    // addressed directly and so never acknowledges.
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let group = (Ipv4Addr::LOCALHOST, group_port);
    sender.send_to(&data_packet(1, &[3u8; 512]), group).await.unwrap();
    expect_block(next_event(&mut handle).await, 0, &[3u8; 512]);
    assert_eq!(next_event(&mut handle).await, Some(TransferEvent::Size(512)));

    sender.send_to(&data_packet(2, &[4u8; 100]), group).await.unwrap();
    expect_block(next_event(&mut handle).await, 512, &[4u8; 100]);
    assert_eq!(next_event(&mut handle).await, Some(TransferEvent::Size(612)));

    assert_eq!(next_event(&mut handle).await, None);
    assert!(matches!(handle.status(), Some(Ok(()))));

    // No acknowledgement ever went to the data sender.
    let mut buf = [0u8; 64];
    assert!(timeout(Duration::from_millis(200), sender.recv_from(&mut buf))
        .await
        .is_err());
}

#[tokio::test]
async fn mtftp_falls_back_to_plain_tftp_after_silence() {
    let (server, port) = bind_server().await;

    // The fallback request goes to the well-known TFTP port.
    let fallback_server = match UdpSocket::bind("127.0.0.1:69").await {
        Ok(socket) => socket,
        // The well-known port may be privileged or already taken; nothing
        // to test then.
        Err(err)
            if matches!(
                err.kind(),
                std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::AddrInUse
            ) =>
        {
            return
        }
        Err(err) => panic!("binding 127.0.0.1:69: {err}"),
    };

    let config = TransferConfig {
        timing: TimerConfig {
            min_timeout: Duration::from_millis(50),
            max_timeout: Duration::from_millis(16_000),
        },
        multicast_local: Some(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)),
    };
    let mut handle = open_with(&format!("mtftp://127.0.0.1:{port}/f"), config)
        .await
        .unwrap();

    // Optionless requests repeat while the transfer fails to open.
    let (rrq, _) = recv_packet(&server).await;
    assert_eq!(rrq, rrq_bytes("f", false, false));

    // After the timeout budget is spent the client abandons multicast and
    // starts over as plain TFTP.
    let (rrq, client) = recv_packet(&fallback_server).await;
    assert_eq!(rrq, rrq_bytes("f", true, false));

    let tid = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    tid.send_to(&data_packet(1, &[9u8; 100]), client).await.unwrap();
    expect_ack(&tid, 1).await;
    expect_block(next_event(&mut handle).await, 0, &[9u8; 100]);
    assert_eq!(next_event(&mut handle).await, Some(TransferEvent::Size(100)));

    assert_eq!(next_event(&mut handle).await, None);
    assert!(matches!(handle.status(), Some(Ok(()))));
}

#[tokio::test]
async fn mtftp_reopens_when_the_transfer_stalls() {
    let (server, port) = bind_server().await;
    let tid = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let config = TransferConfig {
        timing: TimerConfig {
            min_timeout: Duration::from_millis(400),
            max_timeout: Duration::from_millis(25_600),
        },
        multicast_local: Some(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)),
    };
    let mut handle = open_with(&format!("mtftp://127.0.0.1:{port}/f"), config)
        .await
        .unwrap();

    let (_, client1) = recv_packet(&server).await;

    // Answering directly makes this client the master; it acknowledges.
    tid.send_to(&data_packet(1, &[5u8; 512]), client1).await.unwrap();
    expect_ack(&tid, 1).await;
    expect_block(next_event(&mut handle).await, 0, &[5u8; 512]);
    assert_eq!(next_event(&mut handle).await, Some(TransferEvent::Size(512)));

    // Then silence. The client restarts the download from a fresh port
    // rather than giving up; received blocks are kept.
    let (rrq, client2) = recv_packet(&server).await;
    assert_eq!(rrq, rrq_bytes("f", false, false));
    assert_ne!(client1, client2, "a restart must use a fresh transfer id");

    // The next needed block is 2; deliver it and finish.
    let tid2 = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    tid2.send_to(&data_packet(2, &[6u8; 100]), client2).await.unwrap();
    expect_ack(&tid2, 2).await;
    expect_block(next_event(&mut handle).await, 512, &[6u8; 100]);
    assert_eq!(next_event(&mut handle).await, Some(TransferEvent::Size(612)));

    assert_eq!(next_event(&mut handle).await, None);
    assert!(matches!(handle.status(), Some(Ok(()))));
}

#[tokio::test]
async fn server_error_maps_to_a_terminal_status() {
    let (server, port) = bind_server().await;
    let tid = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut handle = open_with(&format!("tftp://127.0.0.1:{port}/nope"), fast(200, 6400))
        .await
        .unwrap();

    let (_, client) = recv_packet(&server).await;
    tid.send_to(&error_packet(1, "File not found"), client).await.unwrap();

    assert_eq!(next_event(&mut handle).await, None);
    assert!(matches!(handle.status(), Some(Err(TftpError::NotFound))));
}

#[tokio::test]
async fn packets_from_the_wrong_source_are_dropped() {
    let (server, port) = bind_server().await;
    let tid = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let imposter = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut handle = open_with(&format!("tftp://127.0.0.1:{port}/f"), fast(200, 6400))
        .await
        .unwrap();

    let (_, client) = recv_packet(&server).await;
    tid.send_to(&oack_packet(b"blksize\x00512\x00tsize\x004\x00"), client)
        .await
        .unwrap();
    expect_ack(&tid, 0).await;
    assert_eq!(next_event(&mut handle).await, Some(TransferEvent::Size(4)));

    // A third party tries to inject the first block.
    imposter
        .send_to(&data_packet(1, b"evil"), client)
        .await
        .unwrap();

    // Only the real server's data is delivered and acknowledged.
    tid.send_to(&data_packet(1, b"good"), client).await.unwrap();
    expect_ack(&tid, 1).await;
    expect_block(next_event(&mut handle).await, 0, b"good");

    assert_eq!(next_event(&mut handle).await, None);
    assert!(matches!(handle.status(), Some(Ok(()))));
}

#[tokio::test]
async fn unknown_options_and_trailing_garbage_are_tolerated() {
    let (server, port) = bind_server().await;
    let tid = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut handle = open_with(&format!("tftp://127.0.0.1:{port}/f"), fast(200, 6400))
        .await
        .unwrap();

    let (_, client) = recv_packet(&server).await;
    // "timeout" is unknown to this client, and the region ends in garbage.
    tid.send_to(
        &oack_packet(b"timeout\x005\x00tsize\x004\x00\xff\xfe"),
        client,
    )
    .await
    .unwrap();
    expect_ack(&tid, 0).await;
    assert_eq!(next_event(&mut handle).await, Some(TransferEvent::Size(4)));

    tid.send_to(&data_packet(1, b"data"), client).await.unwrap();
    expect_ack(&tid, 1).await;
    expect_block(next_event(&mut handle).await, 0, b"data");

    assert_eq!(next_event(&mut handle).await, None);
    assert!(matches!(handle.status(), Some(Ok(()))));
}

#[tokio::test]
async fn silent_server_times_the_transfer_out() {
    let (server, port) = bind_server().await;

    let mut handle = open_with(&format!("tftp://127.0.0.1:{port}/f"), fast(20, 160))
        .await
        .unwrap();

    // The request is retransmitted while the server stays silent.
    let (first, _) = recv_packet(&server).await;
    let (second, _) = recv_packet(&server).await;
    assert_eq!(first, second);

    assert_eq!(next_event(&mut handle).await, None);
    assert!(matches!(handle.status(), Some(Err(TftpError::Timeout))));
}

#[tokio::test]
async fn consumer_close_cancels_immediately() {
    let (server, port) = bind_server().await;

    let mut handle = open_with(&format!("tftp://127.0.0.1:{port}/f"), fast(200, 6400))
        .await
        .unwrap();
    let (_, _) = recv_packet(&server).await;

    handle.close();
    assert_eq!(next_event(&mut handle).await, None);
    assert!(matches!(handle.status(), Some(Err(TftpError::Cancelled))));
}

#[tokio::test]
async fn invalid_uris_are_rejected_up_front() {
    for uri in [
        "tftp://127.0.0.1",
        "tftp://127.0.0.1/",
        "http://127.0.0.1/f",
        "tftp:///f",
    ] {
        let err = open_with(uri, fast(200, 6400)).await.err().unwrap();
        assert!(
            matches!(err, TftpError::InvalidArgument(_)),
            "{uri}: {err:?}"
        );
    }
}

/// Real multicast delivery. Needs an interface with multicast routing, so
/// it only runs with `--features multicast-tests`.
#[cfg(feature = "multicast-tests")]
#[tokio::test]
async fn tftm_joins_the_advertised_group() {
    let (server, port) = bind_server().await;
    let tid = UdpSocket::bind("0.0.0.0:0").await.unwrap();

    let probe = UdpSocket::bind("0.0.0.0:0").await.unwrap();
    let group_port = probe.local_addr().unwrap().port();
    drop(probe);
    let group = Ipv4Addr::new(239, 255, 77, 1);

    let mut handle = open_with(&format!("tftm://127.0.0.1:{port}/f"), fast(300, 9600))
        .await
        .unwrap();

    let (_, client) = recv_packet(&server).await;
    let options = format!("tsize\x00512\x00multicast\x00{group},{group_port},1\x00");
    tid.send_to(&oack_packet(options.as_bytes()), client).await.unwrap();
    expect_ack(&tid, 0).await;
    assert_eq!(next_event(&mut handle).await, Some(TransferEvent::Size(512)));

    // Data goes to the group, acknowledgements come back on unicast.
    tid.send_to(&data_packet(1, &[8u8; 512]), (group, group_port))
        .await
        .unwrap();
    expect_ack(&tid, 1).await;
    expect_block(next_event(&mut handle).await, 0, &[8u8; 512]);

    tid.send_to(&data_packet(2, &[]), (group, group_port)).await.unwrap();
    expect_ack(&tid, 2).await;
    expect_block(next_event(&mut handle).await, 512, &[]);

    assert_eq!(next_event(&mut handle).await, None);
    assert!(matches!(handle.status(), Some(Ok(()))));
}
