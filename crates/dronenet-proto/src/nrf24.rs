//! nRF24L01 network-interface types: radio addresses, RX pipes and the
//! endpoint each data pipe is dedicated to.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Max number of bytes per transfer supported by the NRF24L01 radio.
pub const MAX_FRAME_SIZE: usize = 32;

/// Number of RX pipes on the transceiver, pipe 0 included.
pub const RX_PIPE_COUNT: u8 = 6;

/// Number of TX pipes on the transceiver.
pub const TX_PIPE_COUNT: u8 = 1;

const MAC_MASK: u64 = 0xFF_FFFF_FFFF;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("mac address {0:#x} is wider than 40 bits")]
    TooWide(u64),
    #[error("invalid mac address {0:?}")]
    Malformed(String),
    #[error("pipe {0} out of range 0..=5")]
    InvalidPipe(u8),
}

/// A 5-byte radio address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(u64);

impl MacAddress {
    pub fn new(value: u64) -> Result<Self, AddressError> {
        if value & !MAC_MASK != 0 {
            return Err(AddressError::TooWide(value));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// Replaces the least significant byte, as the radio does for pipes 1-5.
    pub fn with_low_byte(self, byte: u8) -> Self {
        Self((self.0 & !0xFF) | byte as u64)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#012X}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty() {
            return Err(AddressError::Malformed(s.to_string()));
        }
        let value =
            u64::from_str_radix(digits, 16).map_err(|_| AddressError::Malformed(s.to_string()))?;
        Self::new(value)
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// An RX pipe index. Pipe 0 carries ACKs for the TX pipe; pipes 1-5 carry data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Pipe(u8);

impl Pipe {
    pub const ZERO: Pipe = Pipe(0);

    pub fn new(index: u8) -> Result<Self, AddressError> {
        if index >= RX_PIPE_COUNT {
            return Err(AddressError::InvalidPipe(index));
        }
        Ok(Self(index))
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn is_data(self) -> bool {
        self.0 != 0
    }

    /// Pipes 1 through 5.
    pub fn data_pipes() -> impl Iterator<Item = Pipe> {
        (1..RX_PIPE_COUNT).map(Pipe)
    }

    pub fn endpoint(self) -> Option<Endpoint> {
        Endpoint::ALL.get(self.0.checked_sub(1)? as usize).copied()
    }
}

impl fmt::Display for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Service bound to a data pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    DeviceControl,
    NetworkServices,
    DataForwarding,
    ApplicationData0,
    ApplicationData1,
}

impl Endpoint {
    pub const ALL: [Endpoint; 5] = [
        Endpoint::DeviceControl,
        Endpoint::NetworkServices,
        Endpoint::DataForwarding,
        Endpoint::ApplicationData0,
        Endpoint::ApplicationData1,
    ];

    /// Low address byte of the pipe serving this endpoint. Must match the
    /// embedded firmware.
    pub fn address_modifier(self) -> u8 {
        match self {
            Endpoint::DeviceControl => 0xCA,
            Endpoint::NetworkServices => 0xC5,
            Endpoint::DataForwarding => 0x54,
            Endpoint::ApplicationData0 => 0xB3,
            Endpoint::ApplicationData1 => 0xD3,
        }
    }

    pub fn pipe(self) -> Pipe {
        let idx = Endpoint::ALL
            .iter()
            .position(|e| *e == self)
            .unwrap_or_default();
        Pipe(idx as u8 + 1)
    }
}

/// Hardware address a pipe listens on, derived from the device's base address.
pub fn pipe_address(base: MacAddress, pipe: Pipe) -> MacAddress {
    match pipe.endpoint() {
        Some(endpoint) => base.with_low_byte(endpoint.address_modifier()),
        None => base,
    }
}
