//! Reader task core types
use std::time::Duration;
use serde::{Serialize, Deserialize};
use tokio::sync::oneshot;

use crate::serial::settings::duration_ms;
use crate::serial::{ConnectionParams, SendRequest, SerialError};

/// Scheduling of the polling reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Wait between polls while a port is open
    #[serde(rename = "poll_interval_connected_ms", with = "duration_ms")]
    pub poll_interval_connected: Duration,
    /// Wait between polls while no port is open
    #[serde(rename = "poll_interval_idle_ms", with = "duration_ms")]
    pub poll_interval_idle: Duration,
    /// Wait after a failed read before polling again
    #[serde(rename = "backoff_on_error_ms", with = "duration_ms")]
    pub backoff_on_error: Duration,
    /// Upper bound for `stop()` to wait on the reader task
    #[serde(rename = "stop_timeout_ms", with = "duration_ms")]
    pub stop_timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            poll_interval_connected: Duration::from_millis(10),
            poll_interval_idle: Duration::from_millis(100),
            backoff_on_error: Duration::from_millis(1000),
            stop_timeout: Duration::from_millis(3000),
        }
    }
}

impl PollPolicy {
    /// Every interval must be positive: a zero poll interval spins the
    /// reader and a zero stop timeout aborts every `stop()`.
    pub fn validate(&self) -> Result<(), SerialError> {
        let fields = [
            ("poll_interval_connected_ms", self.poll_interval_connected),
            ("poll_interval_idle_ms", self.poll_interval_idle),
            ("backoff_on_error_ms", self.backoff_on_error),
            ("stop_timeout_ms", self.stop_timeout),
        ];
        match fields.iter().find(|(_, value)| value.is_zero()) {
            Some((name, _)) => Err(SerialError::InvalidParameters(format!("{} must be positive", name))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReaderState {
    Stopped,
    Running,
}

pub type Responder<T> = oneshot::Sender<Result<T, SerialError>>;

/// Requests serviced by the reader task, which alone owns the transport
#[derive(Debug)]
pub enum SerialCommand {
    Connect { params: ConnectionParams, responder: Responder<()> },
    Disconnect { responder: Responder<()> },
    Send { request: SendRequest, responder: Responder<usize> },
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub connected_port: Option<String>,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub text_lines: u64,
    pub hex_records: u64,
    pub forced_flushes: u64,
    pub utf8_decode_errors: u64,
    pub read_errors: u64,
    pub last_error: Option<String>,
}
