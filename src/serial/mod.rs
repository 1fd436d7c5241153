pub mod interface;
pub mod settings;
pub mod framer;
pub mod sender;
pub mod unified;

pub use interface::{list_ports, SerialInterface, Transport};
pub use settings::{ConnectionParams, DataBits, Parity, StopBits};
pub use framer::{hex_string, DecodePolicy, Direction, FramerConfig, LineFramer, Record, RecordMode};
pub use sender::{EncodedPayload, SendRequest};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A serial device as reported by the OS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub port_name: String,
    pub description: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Port unavailable: {0}")]
    PortUnavailable(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Write failed: {0}")]
    WriteFailure(String),

    #[error("Invalid hex data: {0}")]
    InvalidHex(String),

    #[error("Read failed: {0}")]
    ReadFailure(String),

    #[error("Reader is not running")]
    ReaderNotRunning,

    #[error("Reader did not stop within {0:?}")]
    ReaderStopTimeout(Duration),

    #[error("Reader task failed: {0}")]
    ReaderFailed(String),

    #[error("Transport was lost when the reader was aborted")]
    TransportLost,

    #[error("Command channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
