use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use crate::serial::Record;

/// Consumer of traffic records and connection status changes.
///
/// Called from the reader task, so implementations must not block for long.
pub trait Sink: Send + Sync {
    fn on_record(&self, record: &Record);
    fn on_status(&self, connected: bool, message: &str);
}

/// Prints records to stdout as log lines
pub struct ConsoleSink {
    show_timestamps: AtomicBool,
}

impl ConsoleSink {
    pub fn new(show_timestamps: bool) -> Self {
        Self {
            show_timestamps: AtomicBool::new(show_timestamps),
        }
    }

    pub fn set_show_timestamps(&self, show: bool) {
        self.show_timestamps.store(show, Ordering::Relaxed);
    }

    pub fn show_timestamps(&self) -> bool {
        self.show_timestamps.load(Ordering::Relaxed)
    }
}

impl Sink for ConsoleSink {
    fn on_record(&self, record: &Record) {
        println!("{}", record.to_log_line(self.show_timestamps()));
    }

    fn on_status(&self, connected: bool, message: &str) {
        let marker = if connected { "*" } else { "-" };
        println!("{} {}", marker, message);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Record(Record),
    Status { connected: bool, message: String },
}

/// Forwards everything over a channel, for embedding UIs and tests
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Sink for ChannelSink {
    fn on_record(&self, record: &Record) {
        // Receiver gone means nobody is displaying anymore
        let _ = self.tx.send(SinkEvent::Record(record.clone()));
    }

    fn on_status(&self, connected: bool, message: &str) {
        let _ = self.tx.send(SinkEvent::Status {
            connected,
            message: message.to_string(),
        });
    }
}
