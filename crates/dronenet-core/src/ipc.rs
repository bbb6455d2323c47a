//! Filesystem addressing for the virtual radio's IPC sockets.
//!
//! Every pipe maps to a socket file named after the decimal value of the
//! hardware address that pipe listens on, so two processes agree on where
//! to find each other from the MAC alone.

use dronenet_proto::{pipe_address, MacAddress, Pipe};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio::net::UnixDatagram;

pub fn rx_dir(root: &Path) -> PathBuf {
    root.join("rx")
}

pub fn tx_dir(root: &Path) -> PathBuf {
    root.join("tx")
}

fn socket_name(mac: MacAddress, pipe: Pipe) -> String {
    format!("{}.ipc", pipe_address(mac, pipe).value())
}

/// Socket a device listens on for `pipe`.
pub fn rx_pipe_path(root: &Path, mac: MacAddress, pipe: Pipe) -> PathBuf {
    rx_dir(root).join(socket_name(mac, pipe))
}

/// Socket a device transmits from; its ACKs come back to the same path.
pub fn tx_pipe_path(root: &Path, mac: MacAddress, pipe: Pipe) -> PathBuf {
    tx_dir(root).join(socket_name(mac, pipe))
}

pub fn ensure_dirs(root: &Path) -> io::Result<()> {
    fs::create_dir_all(rx_dir(root))?;
    fs::create_dir_all(tx_dir(root))?;
    Ok(())
}

/// Binds a datagram socket at `path`, replacing a stale socket file left by
/// a previous run.
pub fn bind_datagram(path: &Path) -> io::Result<UnixDatagram> {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stale socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    UnixDatagram::bind(path)
}
