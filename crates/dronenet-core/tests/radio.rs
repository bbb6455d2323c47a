//! End-to-end tests for the virtual ShockBurst radio: two devices on one
//! IPC root exchanging frames.

use std::path::Path;
use std::time::Duration;

use dronenet_core::config::RadioSettings;
use dronenet_core::{ipc, ShockBurstRadio, TxOutcome};
use dronenet_proto::{AckFrame, Endpoint, Frame, MacAddress, PackedFrame, Pipe};
use tokio::net::UnixDatagram;
use tokio::time;

const SRC: u64 = 0xA4A5A6A7A0;
const DST: u64 = 0xB4B5B6B7B5;

fn settings(root: &Path) -> RadioSettings {
    RadioSettings {
        ipc_root: root.to_path_buf(),
        process_period: Duration::from_millis(5),
        ack_timeout: Duration::from_millis(300),
        ack_poll: Duration::from_millis(5),
    }
}

fn mac(v: u64) -> MacAddress {
    MacAddress::new(v).unwrap()
}

#[tokio::test]
async fn acked_frame_reaches_destination_pipe() {
    let dir = tempfile::tempdir().unwrap();
    let sender = ShockBurstRadio::new(settings(dir.path()));
    let receiver = ShockBurstRadio::new(settings(dir.path()));
    sender.set_device_mac(mac(SRC)).await.unwrap();
    receiver.set_device_mac(mac(DST)).await.unwrap();

    let pipe = Endpoint::NetworkServices.pipe();
    sender.open_tx_pipe(mac(DST), pipe).await.unwrap();

    let tx_handle = sender.start().unwrap();
    let rx_handle = receiver.start().unwrap();

    let mut frame = PackedFrame::with_data(b"takeoff").unwrap();
    frame.require_ack = true;
    let outcome = sender.send_frame(&frame).await.unwrap();
    assert_eq!(outcome, TxOutcome::Acked);

    let entry = receiver
        .receive(Duration::from_secs(1))
        .await
        .expect("frame received");
    assert_eq!(entry.pipe, pipe);
    assert_eq!(entry.frame.read_data().unwrap(), b"takeoff");

    let tx_stats = sender.stats();
    assert_eq!(tx_stats.tx_frames, 1);
    assert_eq!(tx_stats.tx_acked, 1);
    assert_eq!(tx_stats.tx_failed, 0);
    let rx_stats = receiver.stats();
    assert_eq!(rx_stats.rx_frames, 1);
    assert_eq!(rx_stats.acks_sent, 1);

    sender.kill();
    receiver.kill();
    tx_handle.join().await;
    rx_handle.join().await;
}

#[tokio::test]
async fn unacked_frame_is_sent_without_waiting() {
    let dir = tempfile::tempdir().unwrap();
    let sender = ShockBurstRadio::new(settings(dir.path()));
    let receiver = ShockBurstRadio::new(settings(dir.path()));
    sender.set_device_mac(mac(SRC)).await.unwrap();
    receiver.set_device_mac(mac(DST)).await.unwrap();
    sender
        .open_tx_pipe(mac(DST), Pipe::new(5).unwrap())
        .await
        .unwrap();

    let tx_handle = sender.start().unwrap();
    let rx_handle = receiver.start().unwrap();

    let frame = PackedFrame::with_data(&[1, 2, 3]).unwrap();
    assert_eq!(sender.send_frame(&frame).await.unwrap(), TxOutcome::Sent);

    let entry = receiver.receive(Duration::from_secs(1)).await.unwrap();
    assert_eq!(entry.pipe.index(), 5);
    assert!(!entry.frame.require_ack);
    assert_eq!(receiver.stats().acks_sent, 0);

    sender.kill();
    receiver.kill();
    tx_handle.join().await;
    rx_handle.join().await;
}

#[tokio::test]
async fn missing_ack_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let sender = ShockBurstRadio::new(settings(dir.path()));
    // Bound but never started, so nothing answers.
    let silent = ShockBurstRadio::new(settings(dir.path()));
    sender.set_device_mac(mac(SRC)).await.unwrap();
    silent.set_device_mac(mac(DST)).await.unwrap();
    sender
        .open_tx_pipe(mac(DST), Pipe::new(1).unwrap())
        .await
        .unwrap();
    let handle = sender.start().unwrap();

    let mut frame = PackedFrame::with_data(b"ping").unwrap();
    frame.require_ack = true;
    assert_eq!(sender.send_frame(&frame).await.unwrap(), TxOutcome::NoAck);
    assert_eq!(sender.stats().tx_failed, 1);

    sender.kill();
    handle.join().await;
}

#[tokio::test]
async fn unbound_destination_is_undeliverable() {
    let dir = tempfile::tempdir().unwrap();
    let sender = ShockBurstRadio::new(settings(dir.path()));
    sender.set_device_mac(mac(SRC)).await.unwrap();
    sender
        .open_tx_pipe(mac(DST), Pipe::new(2).unwrap())
        .await
        .unwrap();
    let handle = sender.start().unwrap();

    let frame = PackedFrame::with_data(b"lost").unwrap();
    assert_eq!(
        sender.send_frame(&frame).await.unwrap(),
        TxOutcome::Undeliverable
    );

    sender.kill();
    handle.join().await;
}

#[tokio::test]
async fn malformed_datagram_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let receiver = ShockBurstRadio::new(settings(dir.path()));
    receiver.set_device_mac(mac(DST)).await.unwrap();
    let handle = receiver.start().unwrap();

    let target = ipc::rx_pipe_path(dir.path(), mac(DST), Pipe::new(1).unwrap());
    let garbage = UnixDatagram::unbound().unwrap();
    garbage.send_to(&[0u8; 7], &target).await.unwrap();

    assert!(receiver.receive(Duration::from_millis(100)).await.is_none());
    assert_eq!(receiver.stats().rx_dropped, 1);
    assert_eq!(receiver.stats().rx_frames, 0);

    receiver.kill();
    handle.join().await;
}

#[tokio::test]
async fn receive_times_out_when_idle() {
    let dir = tempfile::tempdir().unwrap();
    let radio = ShockBurstRadio::new(settings(dir.path()));
    assert!(radio.receive(Duration::from_millis(20)).await.is_none());
    assert_eq!(ShockBurstRadio::available_rx_pipes(), 6);
    assert_eq!(ShockBurstRadio::available_tx_pipes(), 1);
}

#[tokio::test]
async fn idle_peer_does_not_stall_the_pump() {
    let dir = tempfile::tempdir().unwrap();
    let sender = ShockBurstRadio::new(settings(dir.path()));
    // Bound but never started, so its socket queue fills up.
    let idle = ShockBurstRadio::new(settings(dir.path()));
    sender.set_device_mac(mac(SRC)).await.unwrap();
    idle.set_device_mac(mac(DST)).await.unwrap();
    sender
        .open_tx_pipe(mac(DST), Pipe::new(1).unwrap())
        .await
        .unwrap();
    let handle = sender.start().unwrap();

    let frame = PackedFrame::with_data(b"burst").unwrap();
    for _ in 0..200 {
        sender.transmit(frame.pack().to_vec()).unwrap();
    }
    let last = time::timeout(Duration::from_secs(2), sender.send_frame(&frame))
        .await
        .expect("pump kept servicing the tx queue")
        .unwrap();
    assert_eq!(last, TxOutcome::Undeliverable);

    let stats = sender.stats();
    assert_eq!(stats.tx_frames + stats.tx_failed, 201);
    assert!(stats.tx_failed > 0);

    let mac_lookup = time::timeout(Duration::from_secs(1), sender.device_mac()).await;
    assert_eq!(mac_lookup.unwrap(), Some(mac(SRC)));

    sender.kill();
    time::timeout(Duration::from_secs(2), handle.join())
        .await
        .expect("pump exits after kill");
}

#[tokio::test]
async fn late_ack_does_not_confirm_next_frame() {
    let dir = tempfile::tempdir().unwrap();
    let sender = ShockBurstRadio::new(settings(dir.path()));
    let silent = ShockBurstRadio::new(settings(dir.path()));
    sender.set_device_mac(mac(SRC)).await.unwrap();
    silent.set_device_mac(mac(DST)).await.unwrap();
    sender
        .open_tx_pipe(mac(DST), Pipe::new(1).unwrap())
        .await
        .unwrap();

    // An ACK already waiting on the sender's pipe 0 before the frame goes out.
    let ack_path = ipc::tx_pipe_path(dir.path(), mac(SRC), Pipe::ZERO);
    let stray = UnixDatagram::unbound().unwrap();
    stray
        .send_to(&AckFrame::new().to_bytes(), &ack_path)
        .await
        .unwrap();

    let handle = sender.start().unwrap();
    let mut frame = PackedFrame::with_data(b"arm").unwrap();
    frame.require_ack = true;
    assert_eq!(sender.send_frame(&frame).await.unwrap(), TxOutcome::NoAck);
    assert_eq!(sender.stats().tx_acked, 0);

    sender.kill();
    handle.join().await;
}
