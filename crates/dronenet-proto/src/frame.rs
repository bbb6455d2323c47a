//! Packed data-link frame carried by a single radio transfer.
//!
//! Layout (bit offsets are within each byte, LSB first):
//!
//! ```text
//! byte 0: version[0..3]      frame_length[3..8]
//! byte 1: multicast[0]       require_ack[1]  pad[2]  data_length[3..8]
//! byte 2: frame_number[0..5] endpoint[5..8]
//! byte 3..32: user data
//! ```

use crate::nrf24::MAX_FRAME_SIZE;
use serde::Serialize;

/// Bytes of control field preceding the user data.
pub const CONTROL_FIELD_SIZE: usize = 3;

/// Bytes of user data a single frame can carry.
pub const USER_DATA_SIZE: usize = MAX_FRAME_SIZE - CONTROL_FIELD_SIZE;

// Offsets reference a single byte; masks are not shifted.
const VERSION_OFFSET: u8 = 0;
const VERSION_MASK: u8 = 0x07;
const FRAME_LENGTH_OFFSET: u8 = 3;
const FRAME_LENGTH_MASK: u8 = 0x1F;

const MULTICAST_OFFSET: u8 = 0;
const MULTICAST_MASK: u8 = 0x01;
const REQUIRE_ACK_OFFSET: u8 = 1;
const REQUIRE_ACK_MASK: u8 = 0x01;
const DATA_LENGTH_OFFSET: u8 = 3;
const DATA_LENGTH_MASK: u8 = 0x1F;

const FRAME_NUMBER_OFFSET: u8 = 0;
const FRAME_NUMBER_MASK: u8 = 0x1F;
const ENDPOINT_OFFSET: u8 = 5;
const ENDPOINT_MASK: u8 = 0x07;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame must be {expected} bytes, got {actual}")]
    InvalidSize { expected: usize, actual: usize },
    #[error("data length {0} exceeds user data area")]
    InvalidLength(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("payload of {0} bytes exceeds the 29 byte user data area")]
    PayloadTooLarge(usize),
    #[error("{field} value {value} does not fit in {bits} bits")]
    FieldOutOfRange {
        field: &'static str,
        value: u8,
        bits: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackedFrame {
    pub version: u8,
    pub frame_length: u8,
    pub multicast: bool,
    pub require_ack: bool,
    pub data_length: u8,
    frame_number: u8,
    endpoint: u8,
    #[serde(skip)]
    user_data: [u8; USER_DATA_SIZE],
}

impl Default for PackedFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl PackedFrame {
    pub fn new() -> Self {
        Self {
            version: 0,
            frame_length: 0,
            multicast: false,
            require_ack: false,
            data_length: 0,
            frame_number: 0,
            endpoint: 0,
            user_data: [0; USER_DATA_SIZE],
        }
    }

    /// Builds a frame holding `data` as its payload.
    pub fn with_data(data: &[u8]) -> Result<Self, EncodeError> {
        let mut frame = Self::new();
        frame.write_data(data)?;
        Ok(frame)
    }

    pub fn frame_number(&self) -> u8 {
        self.frame_number
    }

    pub fn set_frame_number(&mut self, value: u8) -> Result<(), EncodeError> {
        self.frame_number = check_field("frame_number", value, FRAME_NUMBER_MASK, 5)?;
        Ok(())
    }

    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    pub fn set_endpoint(&mut self, value: u8) -> Result<(), EncodeError> {
        self.endpoint = check_field("endpoint", value, ENDPOINT_MASK, 3)?;
        Ok(())
    }

    /// Raw user data area, including bytes past `data_length`.
    pub fn user_data(&self) -> &[u8; USER_DATA_SIZE] {
        &self.user_data
    }

    pub fn write_data(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        if data.len() > USER_DATA_SIZE {
            return Err(EncodeError::PayloadTooLarge(data.len()));
        }
        self.user_data[..data.len()].copy_from_slice(data);
        self.data_length = data.len() as u8;
        self.frame_length = self.data_length + CONTROL_FIELD_SIZE as u8;
        Ok(())
    }

    pub fn read_data(&self) -> Result<&[u8], DecodeError> {
        let len = self.data_length as usize;
        if len > USER_DATA_SIZE {
            return Err(DecodeError::InvalidLength(self.data_length));
        }
        Ok(&self.user_data[..len])
    }

    pub fn pack(&self) -> [u8; MAX_FRAME_SIZE] {
        let mut out = [0u8; MAX_FRAME_SIZE];

        out[0] = ((self.version & VERSION_MASK) << VERSION_OFFSET)
            | ((self.frame_length & FRAME_LENGTH_MASK) << FRAME_LENGTH_OFFSET);

        out[1] = ((self.multicast as u8 & MULTICAST_MASK) << MULTICAST_OFFSET)
            | ((self.require_ack as u8 & REQUIRE_ACK_MASK) << REQUIRE_ACK_OFFSET)
            | ((self.data_length & DATA_LENGTH_MASK) << DATA_LENGTH_OFFSET);

        out[2] = ((self.frame_number & FRAME_NUMBER_MASK) << FRAME_NUMBER_OFFSET)
            | ((self.endpoint & ENDPOINT_MASK) << ENDPOINT_OFFSET);

        out[CONTROL_FIELD_SIZE..].copy_from_slice(&self.user_data);
        out
    }

    pub fn unpack(input: &[u8]) -> Result<Self, DecodeError> {
        if input.len() != MAX_FRAME_SIZE {
            return Err(DecodeError::InvalidSize {
                expected: MAX_FRAME_SIZE,
                actual: input.len(),
            });
        }

        let mut user_data = [0u8; USER_DATA_SIZE];
        user_data.copy_from_slice(&input[CONTROL_FIELD_SIZE..]);

        Ok(Self {
            version: (input[0] >> VERSION_OFFSET) & VERSION_MASK,
            frame_length: (input[0] >> FRAME_LENGTH_OFFSET) & FRAME_LENGTH_MASK,
            multicast: (input[1] >> MULTICAST_OFFSET) & MULTICAST_MASK != 0,
            require_ack: (input[1] >> REQUIRE_ACK_OFFSET) & REQUIRE_ACK_MASK != 0,
            data_length: (input[1] >> DATA_LENGTH_OFFSET) & DATA_LENGTH_MASK,
            frame_number: (input[2] >> FRAME_NUMBER_OFFSET) & FRAME_NUMBER_MASK,
            endpoint: (input[2] >> ENDPOINT_OFFSET) & ENDPOINT_MASK,
            user_data,
        })
    }
}

fn check_field(field: &'static str, value: u8, mask: u8, bits: u8) -> Result<u8, EncodeError> {
    if value & !mask != 0 {
        return Err(EncodeError::FieldOutOfRange { field, value, bits });
    }
    Ok(value)
}
