//! Core functionality shared across all dronenet components.
//!
//! Configuration loading, IPC addressing for the virtual radio, and the
//! virtual ShockBurst transceiver itself.

pub mod config;
pub mod ipc;
pub mod radio;
pub mod test_support;

pub use config::{Config, ConfigError, RadioSettings};
pub use radio::{RadioError, RadioHandle, RadioStats, ShockBurstRadio, TxOutcome};
