//! Message types used on the drone's network.

use crate::frame::{DecodeError, PackedFrame};
use crate::nrf24::{Pipe, MAX_FRAME_SIZE};

/// Common behaviour of every frame type carried over the radio.
pub trait Frame {
    fn from_bytes(&mut self, data: &[u8]) -> Result<(), DecodeError>;

    /// Gets the frame as transmittable network bytes.
    fn to_bytes(&self) -> [u8; MAX_FRAME_SIZE];

    /// Clears the frame to default values.
    fn reset(&mut self);

    fn is_valid(&self) -> bool;
}

/// Marker carried in the user data of every ShockBurst ACK.
pub const ACK_MARKER: u32 = 0xAABB_CCDD;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFrame {
    frame: PackedFrame,
}

impl Default for AckFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl AckFrame {
    pub fn new() -> Self {
        let frame = PackedFrame::with_data(&ACK_MARKER.to_le_bytes())
            .expect("4-byte ack marker fits in the 29-byte user data area");
        Self { frame }
    }

    /// Parses `data` and reports whether it is a valid ACK.
    pub fn matches(data: &[u8]) -> bool {
        let mut ack = Self::new();
        ack.from_bytes(data).is_ok() && ack.is_valid()
    }

    pub fn packed(&self) -> &PackedFrame {
        &self.frame
    }
}

impl Frame for AckFrame {
    fn from_bytes(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        self.frame = PackedFrame::unpack(data)?;
        Ok(())
    }

    fn to_bytes(&self) -> [u8; MAX_FRAME_SIZE] {
        self.frame.pack()
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    fn is_valid(&self) -> bool {
        let data = self.frame.user_data();
        let stored = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        stored == ACK_MARKER
    }
}

/// A received frame tagged with the RX pipe it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxFifoEntry {
    pub pipe: Pipe,
    pub frame: PackedFrame,
}

impl RxFifoEntry {
    pub fn new(pipe: Pipe, frame: PackedFrame) -> Self {
        Self { pipe, frame }
    }
}
