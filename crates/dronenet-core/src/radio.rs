//! Virtual nRF24L01 transceiver.
//!
//! Emulates the ShockBurst PHY between processes on the same host. Each RX
//! pipe is a Unix datagram socket and one datagram carries one 32-byte frame.
//! The TX pipe sends from a socket bound at the device's own TX path, which
//! doubles as pipe 0: receivers answer frames that request an ACK by sending
//! an [`AckFrame`] back to the sender's address.
//!
//! All socket work happens on a single message pump task started with
//! [`ShockBurstRadio::start`], mirroring the hardware state machine: each
//! period it drains the RX pipes into the RX FIFO, then drains the TX queue,
//! blocking on ACKs where required.

use crate::config::RadioSettings;
use crate::ipc;
use bytes::Bytes;
use dronenet_proto::{
    AckFrame, Frame, MacAddress, PackedFrame, Pipe, RxFifoEntry, MAX_FRAME_SIZE,
};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixDatagram;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("device mac address has not been set")]
    NoDeviceMac,
    #[error("pipe {0} cannot be used for transmission")]
    InvalidTxPipe(Pipe),
    #[error("frame must be 32 bytes, got {0}")]
    FrameSize(usize),
    #[error("radio message pump already started")]
    AlreadyStarted,
    #[error("radio has stopped")]
    Stopped,
}

/// Result of pushing one frame through the TX pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxOutcome {
    /// Sent; no ACK was requested.
    Sent,
    Acked,
    /// Sent, but no valid ACK arrived before the timeout.
    NoAck,
    /// No TX pipe was open or the destination could not be reached.
    Undeliverable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RadioStats {
    pub tx_frames: u64,
    pub tx_acked: u64,
    pub tx_failed: u64,
    pub rx_frames: u64,
    pub acks_sent: u64,
    pub rx_dropped: u64,
}

#[derive(Default)]
struct Counters {
    tx_frames: AtomicU64,
    tx_acked: AtomicU64,
    tx_failed: AtomicU64,
    rx_frames: AtomicU64,
    acks_sent: AtomicU64,
    rx_dropped: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RadioStats {
        RadioStats {
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            tx_acked: self.tx_acked.load(Ordering::Relaxed),
            tx_failed: self.tx_failed.load(Ordering::Relaxed),
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
        }
    }
}

struct RxLink {
    pipe: Pipe,
    socket: UnixDatagram,
    path: PathBuf,
}

struct TxLink {
    socket: Arc<UnixDatagram>,
    path: PathBuf,
}

/// Socket and destination a single frame is sent with.
struct TxRoute {
    socket: Arc<UnixDatagram>,
    destination: PathBuf,
}

#[derive(Default)]
struct Links {
    device: Option<MacAddress>,
    rx: Vec<RxLink>,
    tx: Option<TxLink>,
    destination: Option<PathBuf>,
}

impl Links {
    /// Closes every socket and removes the files bound for them.
    fn release(&mut self) {
        let paths = self
            .rx
            .drain(..)
            .map(|link| link.path)
            .chain(self.tx.take().map(|link| link.path));
        for path in paths {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove socket");
                }
            }
        }
        self.device = None;
        self.destination = None;
    }
}

impl Drop for Links {
    fn drop(&mut self) {
        self.release();
    }
}

struct Shared {
    settings: RadioSettings,
    links: Mutex<Links>,
    counters: Counters,
}

struct TxRequest {
    data: Bytes,
    done: Option<oneshot::Sender<TxOutcome>>,
}

struct PumpState {
    tx_queue: mpsc::UnboundedReceiver<TxRequest>,
    rx_fifo: mpsc::UnboundedSender<RxFifoEntry>,
}

/// A virtual transceiver bound to one device address.
///
/// Like the hardware it emulates, the radio is half duplex: while the pump
/// waits for an ACK it does not service the RX pipes. Two radios sending
/// ACK-requiring frames to each other at the same moment therefore both
/// time out; callers that need a request/response exchange should only
/// request ACKs in one direction.
pub struct ShockBurstRadio {
    shared: Arc<Shared>,
    tx_queue: mpsc::UnboundedSender<TxRequest>,
    rx_fifo: Mutex<mpsc::UnboundedReceiver<RxFifoEntry>>,
    pump: std::sync::Mutex<Option<PumpState>>,
    shutdown: watch::Sender<bool>,
}

/// Handle to the running message pump.
pub struct RadioHandle {
    task: JoinHandle<()>,
}

impl RadioHandle {
    /// Waits for the pump to exit after [`ShockBurstRadio::kill`].
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "radio message pump panicked");
        }
    }
}

impl ShockBurstRadio {
    pub fn new(settings: RadioSettings) -> Self {
        let (tx_send, tx_recv) = mpsc::unbounded_channel();
        let (rx_send, rx_recv) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                settings,
                links: Mutex::new(Links::default()),
                counters: Counters::default(),
            }),
            tx_queue: tx_send,
            rx_fifo: Mutex::new(rx_recv),
            pump: std::sync::Mutex::new(Some(PumpState {
                tx_queue: tx_recv,
                rx_fifo: rx_send,
            })),
            shutdown,
        }
    }

    pub fn available_tx_pipes() -> u8 {
        dronenet_proto::nrf24::TX_PIPE_COUNT
    }

    pub fn available_rx_pipes() -> u8 {
        dronenet_proto::nrf24::RX_PIPE_COUNT
    }

    pub fn settings(&self) -> &RadioSettings {
        &self.shared.settings
    }

    pub async fn device_mac(&self) -> Option<MacAddress> {
        self.shared.links.lock().await.device
    }

    /// Binds RX pipes 1-5 following the nRF24L01 addressing scheme, plus the
    /// TX socket that receives ACKs in place of pipe 0.
    ///
    /// Any previously bound pipes are released first.
    pub async fn set_device_mac(&self, mac: MacAddress) -> Result<(), RadioError> {
        let root = &self.shared.settings.ipc_root;
        let mut links = self.shared.links.lock().await;
        links.release();
        ipc::ensure_dirs(root)?;

        for pipe in Pipe::data_pipes() {
            let path = ipc::rx_pipe_path(root, mac, pipe);
            let socket = ipc::bind_datagram(&path)?;
            tracing::info!(pipe = %pipe, path = %path.display(), "rx pipe bound");
            links.rx.push(RxLink { pipe, socket, path });
        }

        let path = ipc::tx_pipe_path(root, mac, Pipe::ZERO);
        let socket = ipc::bind_datagram(&path)?;
        tracing::info!(path = %path.display(), "tx pipe bound");
        links.tx = Some(TxLink {
            socket: Arc::new(socket),
            path,
        });
        links.device = Some(mac);
        Ok(())
    }

    /// Points the TX pipe at `pipe` on the device with address `dst_mac`.
    pub async fn open_tx_pipe(&self, dst_mac: MacAddress, pipe: Pipe) -> Result<(), RadioError> {
        if !pipe.is_data() {
            return Err(RadioError::InvalidTxPipe(pipe));
        }
        let mut links = self.shared.links.lock().await;
        if links.device.is_none() {
            return Err(RadioError::NoDeviceMac);
        }
        let path = ipc::rx_pipe_path(&self.shared.settings.ipc_root, dst_mac, pipe);
        tracing::info!(dst = %dst_mac, pipe = %pipe, path = %path.display(), "tx pipe opened");
        links.destination = Some(path);
        Ok(())
    }

    /// Queues a raw frame for the TX pipe.
    pub fn transmit(&self, data: impl Into<Bytes>) -> Result<(), RadioError> {
        self.enqueue(data.into(), None)
    }

    /// Queues a raw frame and waits until the pump has sent it.
    pub async fn transmit_confirmed(&self, data: impl Into<Bytes>) -> Result<TxOutcome, RadioError> {
        let (done, outcome) = oneshot::channel();
        self.enqueue(data.into(), Some(done))?;
        outcome.await.map_err(|_| RadioError::Stopped)
    }

    pub async fn send_frame(&self, frame: &PackedFrame) -> Result<TxOutcome, RadioError> {
        self.transmit_confirmed(frame.pack().to_vec()).await
    }

    fn enqueue(&self, data: Bytes, done: Option<oneshot::Sender<TxOutcome>>) -> Result<(), RadioError> {
        if data.len() != MAX_FRAME_SIZE {
            return Err(RadioError::FrameSize(data.len()));
        }
        self.tx_queue
            .send(TxRequest { data, done })
            .map_err(|_| RadioError::Stopped)
    }

    /// Pops the next received frame, waiting up to `timeout`.
    pub async fn receive(&self, timeout: Duration) -> Option<RxFifoEntry> {
        let mut fifo = self.rx_fifo.lock().await;
        time::timeout(timeout, fifo.recv()).await.ok().flatten()
    }

    pub fn stats(&self) -> RadioStats {
        self.shared.counters.snapshot()
    }

    /// Spawns the message pump on the current tokio runtime.
    pub fn start(&self) -> Result<RadioHandle, RadioError> {
        let state = self
            .pump
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(RadioError::AlreadyStarted)?;
        let shared = Arc::clone(&self.shared);
        let shutdown = self.shutdown.subscribe();
        let task = tokio::spawn(run(shared, state, shutdown));
        Ok(RadioHandle { task })
    }

    pub fn kill(&self) {
        self.shutdown.send_replace(true);
    }
}

async fn run(shared: Arc<Shared>, mut state: PumpState, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = time::interval(shared.settings.process_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!("starting shockburst processing");

    loop {
        // A kill issued before start() is already marked seen by subscribe().
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                {
                    let links = shared.links.lock().await;
                    enqueue_rx_pipes(&links, &shared.counters, &state.rx_fifo);
                }
                dequeue_tx_pipe(&shared, &mut state.tx_queue, &shutdown).await;
            }
        }
    }

    tracing::info!("shockburst processing stopped");
}

fn enqueue_rx_pipes(
    links: &Links,
    counters: &Counters,
    rx_fifo: &mpsc::UnboundedSender<RxFifoEntry>,
) {
    // One spare byte so an oversized datagram is not mistaken for a frame.
    let mut buf = [0u8; MAX_FRAME_SIZE + 1];

    for link in &links.rx {
        loop {
            let (n, peer) = match link.socket.try_recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(pipe = %link.pipe, error = %e, "rx pipe read failed");
                    break;
                }
            };

            let frame = match PackedFrame::unpack(&buf[..n]) {
                Ok(frame) => frame,
                Err(e) => {
                    Counters::bump(&counters.rx_dropped);
                    tracing::warn!(pipe = %link.pipe, error = %e, "dropping malformed frame");
                    continue;
                }
            };

            let require_ack = frame.require_ack;
            Counters::bump(&counters.rx_frames);
            tracing::debug!(pipe = %link.pipe, len = frame.data_length, "frame received");
            let _ = rx_fifo.send(RxFifoEntry::new(link.pipe, frame));

            if !require_ack {
                continue;
            }
            let Some(reply_to) = peer.as_pathname() else {
                tracing::warn!(pipe = %link.pipe, "sender is unbound, cannot ack");
                continue;
            };
            match link.socket.try_send_to(&AckFrame::new().to_bytes(), reply_to) {
                Ok(_) => Counters::bump(&counters.acks_sent),
                Err(e) => tracing::warn!(pipe = %link.pipe, error = %e, "failed to send ack"),
            }
        }
    }
}

async fn dequeue_tx_pipe(
    shared: &Shared,
    tx_queue: &mut mpsc::UnboundedReceiver<TxRequest>,
    shutdown: &watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        let Ok(request) = tx_queue.try_recv() else {
            break;
        };
        let route = tx_route(shared).await;
        let outcome = transmit_one(route, shared, &request.data, shutdown).await;
        match outcome {
            TxOutcome::Sent => {}
            TxOutcome::Acked => Counters::bump(&shared.counters.tx_acked),
            TxOutcome::NoAck | TxOutcome::Undeliverable => {
                Counters::bump(&shared.counters.tx_failed)
            }
        }
        if let Some(done) = request.done {
            let _ = done.send(outcome);
        }
    }
}

/// Snapshots the open TX pipe so the links lock is not held while sending.
async fn tx_route(shared: &Shared) -> Option<TxRoute> {
    let links = shared.links.lock().await;
    let tx = links.tx.as_ref()?;
    let destination = links.destination.clone()?;
    Some(TxRoute {
        socket: Arc::clone(&tx.socket),
        destination,
    })
}

async fn transmit_one(
    route: Option<TxRoute>,
    shared: &Shared,
    data: &[u8],
    shutdown: &watch::Receiver<bool>,
) -> TxOutcome {
    let Some(TxRoute {
        socket,
        destination,
    }) = route
    else {
        tracing::warn!("no tx pipe open, dropping frame");
        return TxOutcome::Undeliverable;
    };
    let require_ack = match PackedFrame::unpack(data) {
        Ok(frame) => frame.require_ack,
        Err(e) => {
            tracing::warn!(error = %e, "dropping malformed tx frame");
            return TxOutcome::Undeliverable;
        }
    };

    discard_stale(&socket);
    // A peer that stops draining its pipe must not stall the pump.
    if let Err(e) = socket.try_send_to(data, &destination) {
        tracing::warn!(dst = %destination.display(), error = %e, "transmit failed");
        return TxOutcome::Undeliverable;
    }
    Counters::bump(&shared.counters.tx_frames);

    if !require_ack {
        return TxOutcome::Sent;
    }
    let settings = &shared.settings;
    if wait_for_ack(&socket, settings.ack_timeout, settings.ack_poll, shutdown).await {
        TxOutcome::Acked
    } else {
        tracing::warn!(dst = %destination.display(), "failed to receive packet ack");
        TxOutcome::NoAck
    }
}

/// Drops late ACKs left over from earlier frames.
fn discard_stale(socket: &UnixDatagram) {
    let mut buf = [0u8; MAX_FRAME_SIZE + 1];
    while socket.try_recv(&mut buf).is_ok() {}
}

async fn wait_for_ack(
    socket: &UnixDatagram,
    timeout: Duration,
    poll: Duration,
    shutdown: &watch::Receiver<bool>,
) -> bool {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; MAX_FRAME_SIZE + 1];

    while Instant::now() < deadline {
        time::sleep(poll).await;
        if *shutdown.borrow() {
            return false;
        }
        loop {
            match socket.try_recv(&mut buf) {
                Ok(n) if AckFrame::matches(&buf[..n]) => return true,
                Ok(n) => tracing::debug!(len = n, "ignoring non-ack datagram on pipe 0"),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "ack pipe read failed");
                    return false;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(root: &std::path::Path) -> RadioSettings {
        RadioSettings {
            ipc_root: root.to_path_buf(),
            process_period: Duration::from_millis(5),
            ack_timeout: Duration::from_millis(200),
            ack_poll: Duration::from_millis(5),
        }
    }

    fn mac(v: u64) -> MacAddress {
        MacAddress::new(v).unwrap()
    }

    #[tokio::test]
    async fn transmit_checks_frame_size() {
        let dir = tempfile::tempdir().unwrap();
        let radio = ShockBurstRadio::new(settings(dir.path()));
        assert!(matches!(
            radio.transmit(vec![0u8; 31]),
            Err(RadioError::FrameSize(31))
        ));
        assert!(radio.transmit(vec![0u8; MAX_FRAME_SIZE]).is_ok());
    }

    #[tokio::test]
    async fn open_tx_pipe_requires_device_and_data_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let radio = ShockBurstRadio::new(settings(dir.path()));
        let dst = mac(0xB4B5B6B7B5);
        assert!(matches!(
            radio.open_tx_pipe(dst, Pipe::new(1).unwrap()).await,
            Err(RadioError::NoDeviceMac)
        ));
        radio.set_device_mac(mac(0xA4A5A6A7A0)).await.unwrap();
        assert!(matches!(
            radio.open_tx_pipe(dst, Pipe::ZERO).await,
            Err(RadioError::InvalidTxPipe(_))
        ));
        assert!(radio.open_tx_pipe(dst, Pipe::new(1).unwrap()).await.is_ok());
    }

    #[tokio::test]
    async fn set_device_mac_binds_and_drop_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let device = mac(0xA4A5A6A7A0);
        let radio = ShockBurstRadio::new(settings(dir.path()));
        radio.set_device_mac(device).await.unwrap();

        let mut paths: Vec<PathBuf> = Pipe::data_pipes()
            .map(|p| ipc::rx_pipe_path(dir.path(), device, p))
            .collect();
        paths.push(ipc::tx_pipe_path(dir.path(), device, Pipe::ZERO));
        assert!(paths.iter().all(|p| p.exists()));

        // Rebinding the same address must not delete the fresh sockets.
        radio.set_device_mac(device).await.unwrap();
        assert!(paths.iter().all(|p| p.exists()));

        drop(radio);
        assert!(paths.iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let radio = ShockBurstRadio::new(settings(dir.path()));
        let handle = radio.start().unwrap();
        assert!(matches!(radio.start(), Err(RadioError::AlreadyStarted)));
        radio.kill();
        handle.join().await;
    }

    #[tokio::test]
    async fn kill_before_start_stops_the_pump() {
        let dir = tempfile::tempdir().unwrap();
        let radio = ShockBurstRadio::new(settings(dir.path()));
        radio.kill();
        let handle = radio.start().unwrap();
        let joined = time::timeout(Duration::from_secs(2), handle.join()).await;
        assert!(joined.is_ok());
    }

    #[tokio::test]
    async fn frame_without_open_pipe_is_undeliverable() {
        let dir = tempfile::tempdir().unwrap();
        let radio = ShockBurstRadio::new(settings(dir.path()));
        radio.set_device_mac(mac(0x0102030405)).await.unwrap();
        let handle = radio.start().unwrap();

        let frame = PackedFrame::with_data(b"x").unwrap();
        assert_eq!(radio.send_frame(&frame).await.unwrap(), TxOutcome::Undeliverable);
        assert_eq!(radio.stats().tx_failed, 1);

        radio.kill();
        handle.join().await;
    }
}
