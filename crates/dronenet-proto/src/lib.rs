//! Protocol definitions for the drone network.
//!
//! This crate defines the nRF24L01 interface types, the packed data-link
//! frame every radio transfer carries, and the message types layered on top.

pub mod frame;
pub mod message;
pub mod nrf24;

pub use frame::{DecodeError, EncodeError, PackedFrame, CONTROL_FIELD_SIZE, USER_DATA_SIZE};
pub use message::{AckFrame, Frame, RxFifoEntry, ACK_MARKER};
pub use nrf24::{pipe_address, AddressError, Endpoint, MacAddress, Pipe, MAX_FRAME_SIZE};
