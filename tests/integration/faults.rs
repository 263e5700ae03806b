//! Fault injection against a real client: corruption, bad digests,
//! silence, and datagram loss.

use crate::*;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use ferry_core::digest;
use ferry_core::wire::{Packet, PacketKind, HEADER_SIZE, MAX_PAYLOAD};
use ferry_session::{download, DownloadError};
use tokio::net::UdpSocket;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn corrupted_segment_is_nacked_then_the_good_copy_lands() {
    let probe = Probe::bind().await;
    let server = probe.addr();
    let out = scratch_dir("fault-corrupt");

    let transfer = fast_transfer();
    let client = tokio::spawn(async move { download(server, &transfer, "f.bin", &out).await });

    let (get, peer) = probe.recv().await;
    assert_eq!(get.kind, PacketKind::Get);
    assert_eq!(&get.payload[..], b"f.bin");

    let payload = Bytes::from_static(b"corruptible content");

    // Digest does not match the payload: the client must refuse it.
    probe
        .send_to(&Packet::data(0, [0u8; 32], payload.clone()), peer)
        .await;
    let (nack, _) = probe.recv().await;
    assert_eq!((nack.kind, nack.seq_bit), (PacketKind::Ack, 1), "implicit NACK");

    // The identical retransmission, digest intact this time.
    probe
        .send_to(&Packet::data(0, digest::digest(&payload), payload.clone()), peer)
        .await;
    let (ack, _) = probe.recv().await;
    assert_eq!((ack.kind, ack.seq_bit), (PacketKind::Ack, 0));

    probe
        .send_to(&Packet::eor(1, digest::digest(&payload)), peer)
        .await;
    let (fin, _) = probe.recv().await;
    assert_eq!((fin.kind, fin.seq_bit), (PacketKind::Ack, 1));

    let path = client.await.unwrap().expect("download should recover");
    assert_eq!(std::fs::read(path).unwrap(), &payload[..]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_bit_segment_never_reaches_the_buffer() {
    let probe = Probe::bind().await;
    let server = probe.addr();
    let out = scratch_dir("fault-bit");
    let out_check = out.clone();

    let transfer = fast_transfer();
    let client = tokio::spawn(async move { download(server, &transfer, "g.bin", &out).await });

    let (_, peer) = probe.recv().await;

    // Valid digest but the wrong sequence bit: a stray duplicate.
    let ghost = Bytes::from_static(b"ghost");
    probe
        .send_to(&Packet::data(1, digest::digest(&ghost), ghost), peer)
        .await;
    let (nack, _) = probe.recv().await;
    assert_eq!((nack.kind, nack.seq_bit), (PacketKind::Ack, 1));

    let real = Bytes::from_static(b"real");
    probe
        .send_to(&Packet::data(0, digest::digest(&real), real.clone()), peer)
        .await;
    let (ack, _) = probe.recv().await;
    assert_eq!((ack.kind, ack.seq_bit), (PacketKind::Ack, 0));

    probe.send_to(&Packet::eor(1, digest::digest(&real)), peer).await;
    probe.recv().await;

    let path = client.await.unwrap().expect("download should succeed");
    assert_eq!(
        std::fs::read(&path).unwrap(),
        b"real",
        "rejected payload must never be appended"
    );
    assert!(!out_check.join("g.bin.part").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn whole_file_digest_mismatch_discards_everything() {
    let probe = Probe::bind().await;
    let server = probe.addr();
    let out = scratch_dir("fault-whole");
    let out_check = out.clone();

    let transfer = fast_transfer();
    let client = tokio::spawn(async move { download(server, &transfer, "h.bin", &out).await });

    let (_, peer) = probe.recv().await;

    // A perfectly valid segment...
    let payload = Bytes::from_static(b"looks fine in isolation");
    probe
        .send_to(&Packet::data(0, digest::digest(&payload), payload), peer)
        .await;
    probe.recv().await;

    // ...but the EOR names a different whole-file digest, as it would if a
    // segment had been duplicated or dropped past the per-segment checks.
    probe
        .send_to(&Packet::eor(1, digest::digest(b"some other content")), peer)
        .await;
    probe.recv().await;

    let err = client.await.unwrap().expect_err("verification must fail");
    assert!(matches!(err, DownloadError::IntegrityMismatch { .. }));
    assert_eq!(
        std::fs::read_dir(&out_check).unwrap().count(),
        0,
        "nothing may be persisted"
    );
}

#[tokio::test]
async fn zero_retries_and_total_loss_terminate_within_one_timeout() {
    // Bound but mute: every datagram to it is a guaranteed loss.
    let mute = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server = mute.local_addr().unwrap();
    let out = scratch_dir("fault-mute");

    let transfer = ferry_core::config::TransferConfig {
        timeout_ms: 200,
        max_retries: 0,
        max_payload: 1024,
    };

    let started = Instant::now();
    let err = download(server, &transfer, "anything", &out)
        .await
        .expect_err("nothing can arrive");
    let elapsed = started.elapsed();

    assert!(matches!(err, DownloadError::RetryExhausted(_)));
    assert!(
        elapsed < Duration::from_secs(1),
        "must terminate promptly, took {elapsed:?}"
    );
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transfer_survives_periodic_datagram_loss() {
    let root = scratch_dir("fault-loss-root");
    let out = scratch_dir("fault-loss-out");
    let data = patterned(5000);
    std::fs::write(root.join("lossy.bin"), &data).unwrap();

    let mut transfer = fast_transfer();
    transfer.max_payload = 512;
    let server = spawn_server(root, transfer.clone()).await;
    let proxied = lossy_proxy(server, 3).await;

    let path = download(proxied, &transfer, "lossy.bin", &out)
        .await
        .expect("ARQ must recover from periodic loss");
    assert_eq!(std::fs::read(&path).unwrap(), data);
}

/// A UDP proxy between one client and `server` that drops every
/// `drop_nth` datagram it sees, counting both directions together. A
/// dropped retransmission is never followed by another drop of the same
/// packet, so a stop-and-wait exchange always gets through.
async fn lossy_proxy(server: SocketAddr, drop_nth: u64) -> SocketAddr {
    let front = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = front.local_addr().unwrap();
    let back = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    back.connect(server).await.unwrap();

    tokio::spawn(async move {
        let mut client: Option<SocketAddr> = None;
        let mut buf_front = vec![0u8; HEADER_SIZE + MAX_PAYLOAD];
        let mut buf_back = vec![0u8; HEADER_SIZE + MAX_PAYLOAD];
        let mut seen: u64 = 0;
        loop {
            tokio::select! {
                Ok((n, from)) = front.recv_from(&mut buf_front) => {
                    client = Some(from);
                    seen += 1;
                    if seen % drop_nth != 0 {
                        let _ = back.send(&buf_front[..n]).await;
                    }
                }
                Ok(n) = back.recv(&mut buf_back) => {
                    seen += 1;
                    if seen % drop_nth != 0 {
                        if let Some(client) = client {
                            let _ = front.send_to(&buf_back[..n], client).await;
                        }
                    }
                }
            }
        }
    });
    addr
}
