//! In-memory transport and sink helpers shared by the integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mcu_serial_term_lib::serial::unified::PollPolicy;
use mcu_serial_term_lib::serial::{ConnectionParams, Record, SerialError, Transport};
use mcu_serial_term_lib::sink::SinkEvent;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Default)]
pub struct MockState {
    pub open: bool,
    pub incoming: VecDeque<Vec<u8>>,
    pub written: Vec<u8>,
    pub open_count: usize,
    pub close_count: usize,
    pub fail_reads: usize,
    pub fail_open: bool,
    pub fail_writes: bool,
    /// Block every `bytes_available` call this long, like a wedged driver
    pub stall_reads: Option<Duration>,
    pub panic_on_write: bool,
}

/// Scripted transport. Clones share state, so a test can keep one clone
/// while the session's reader task owns the other.
#[derive(Clone, Default)]
pub struct MockTransport {
    pub state: Arc<Mutex<MockState>>,
    port: Option<String>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that is already open, as if connected before the reader started
    pub fn opened(port: &str) -> Self {
        let mock = Self { state: Arc::default(), port: Some(port.to_string()) };
        mock.state.lock().unwrap().open = true;
        mock
    }

    pub fn push_incoming(&self, bytes: &[u8]) {
        self.state.lock().unwrap().incoming.push_back(bytes.to_vec());
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn is_open_shared(&self) -> bool {
        self.state.lock().unwrap().open
    }
}

impl Transport for MockTransport {
    fn open(&mut self, params: &ConnectionParams) -> Result<(), SerialError> {
        self.close();
        params.validate()?;
        let mut state = self.state.lock().unwrap();
        if state.fail_open {
            return Err(SerialError::PortUnavailable(format!("{}: busy", params.port_name)));
        }
        state.open = true;
        state.open_count += 1;
        self.port = Some(params.port_name.clone());
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.open {
            state.open = false;
            state.close_count += 1;
        }
        self.port = None;
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    fn port_name(&self) -> Option<&str> {
        self.port.as_deref()
    }

    fn bytes_available(&mut self) -> Result<usize, SerialError> {
        let stall = self.state.lock().unwrap().stall_reads;
        if let Some(stall) = stall {
            std::thread::sleep(stall);
        }
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Ok(0);
        }
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            return Err(SerialError::ReadFailure("device reports framing error".to_string()));
        }
        Ok(state.incoming.front().map(Vec::len).unwrap_or(0))
    }

    fn read_available(&mut self) -> Result<Vec<u8>, SerialError> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Ok(Vec::new());
        }
        Ok(state.incoming.pop_front().unwrap_or_default())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        let panic_now = self.state.lock().unwrap().panic_on_write;
        if panic_now {
            panic!("driver fault while writing");
        }
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(SerialError::NotConnected);
        }
        if state.fail_writes {
            return Err(SerialError::WriteFailure("broken pipe".to_string()));
        }
        state.written.extend_from_slice(bytes);
        Ok(())
    }
}

/// Short intervals so tests finish quickly
pub fn fast_policy() -> PollPolicy {
    PollPolicy {
        poll_interval_connected: Duration::from_millis(1),
        poll_interval_idle: Duration::from_millis(5),
        backoff_on_error: Duration::from_millis(20),
        stop_timeout: Duration::from_secs(1),
    }
}

pub async fn next_event(rx: &mut UnboundedReceiver<SinkEvent>) -> SinkEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for sink event")
        .expect("sink channel closed")
}

/// Skip status events until the next record arrives
pub async fn next_record(rx: &mut UnboundedReceiver<SinkEvent>) -> Record {
    loop {
        if let SinkEvent::Record(record) = next_event(rx).await {
            return record;
        }
    }
}

/// Skip records until the next status event arrives
pub async fn next_status(rx: &mut UnboundedReceiver<SinkEvent>) -> (bool, String) {
    loop {
        if let SinkEvent::Status { connected, message } = next_event(rx).await {
            return (connected, message);
        }
    }
}
