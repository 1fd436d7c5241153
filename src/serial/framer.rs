//! Line framing for the receive path.
//!
//! Raw chunks from the transport are decoded to text and split on `\n`.
//! Chunks that are not valid UTF-8 are rendered as hex instead.

use std::fmt::Write as _;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_LINE_LEN: usize = 4096;

/// Longest incomplete UTF-8 sequence that can trail a chunk
const MAX_UTF8_CARRY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Rx,
    Tx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordMode {
    Text,
    Hex,
}

/// One timestamped unit of traffic shown to the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: DateTime<Local>,
    pub direction: Direction,
    pub mode: RecordMode,
    pub payload: String,
}

impl Record {
    pub fn new(direction: Direction, mode: RecordMode, payload: String) -> Self {
        Self {
            timestamp: Local::now(),
            direction,
            mode,
            payload,
        }
    }

    pub fn rx_text(payload: impl Into<String>) -> Self {
        Self::new(Direction::Rx, RecordMode::Text, payload.into())
    }

    pub fn rx_hex(bytes: &[u8]) -> Self {
        Self::new(Direction::Rx, RecordMode::Hex, hex_string(bytes))
    }

    /// Render as a console log line, e.g. `[12:00:01.250] RX: OK`
    pub fn to_log_line(&self, show_timestamp: bool) -> String {
        let tag = match (self.direction, self.mode) {
            (Direction::Rx, RecordMode::Text) => "RX",
            (Direction::Rx, RecordMode::Hex) => "RX (HEX)",
            (Direction::Tx, RecordMode::Text) => "TX",
            (Direction::Tx, RecordMode::Hex) => "TX (HEX)",
        };
        let payload = match (self.direction, self.mode) {
            (Direction::Tx, RecordMode::Text) => escape_control(&self.payload),
            _ => self.payload.clone(),
        };
        if show_timestamp {
            format!("[{}] {}: {}", self.timestamp.format("%H:%M:%S%.3f"), tag, payload)
        } else {
            format!("{}: {}", tag, payload)
        }
    }
}

/// Uppercase hex bytes separated by single spaces
pub fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

/// Make line endings and other control characters visible
pub fn escape_control(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// How chunks that are not valid UTF-8 are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    /// Invalid chunks are emitted whole as a HEX record
    #[default]
    Strict,
    /// Invalid sequences become U+FFFD and always take the text path
    Lossy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramerConfig {
    pub decode_policy: DecodePolicy,
    /// Pending text is force-flushed once this many bytes arrive without a newline
    pub max_line_len: usize,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            decode_policy: DecodePolicy::Strict,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

/// Counters accumulated by the framer since the last `take_stats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    pub text_lines: u64,
    pub hex_records: u64,
    pub forced_flushes: u64,
    pub decode_errors: u64,
}

pub struct LineFramer {
    config: FramerConfig,
    pending: String,
    carry: Vec<u8>,
    stats: FramerStats,
}

impl LineFramer {
    pub fn new(config: FramerConfig) -> Self {
        let mut config = config;
        // A cut must always be able to fit one full character
        config.max_line_len = config.max_line_len.max(4);
        Self {
            config,
            pending: String::new(),
            carry: Vec::new(),
            stats: FramerStats::default(),
        }
    }

    pub fn config(&self) -> &FramerConfig {
        &self.config
    }

    /// Text received since the last newline
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Drop all buffered state. Used when the stream restarts.
    pub fn reset(&mut self) {
        if !self.pending.is_empty() || !self.carry.is_empty() {
            log::debug!(
                "Discarding {} pending chars and {} carried bytes",
                self.pending.len(),
                self.carry.len()
            );
        }
        self.pending.clear();
        self.carry.clear();
    }

    pub fn take_stats(&mut self) -> FramerStats {
        std::mem::take(&mut self.stats)
    }

    /// Consume a raw chunk and return the records it completes
    pub fn feed(&mut self, raw: &[u8]) -> Vec<Record> {
        if raw.is_empty() {
            return Vec::new();
        }

        match self.config.decode_policy {
            DecodePolicy::Strict => self.feed_strict(raw),
            DecodePolicy::Lossy => self.feed_lossy(raw),
        }
    }

    fn feed_strict(&mut self, raw: &[u8]) -> Vec<Record> {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(raw);

        match std::str::from_utf8(&bytes) {
            Ok(text) => {
                self.pending.push_str(text);
            }
            Err(e) if e.error_len().is_none() && bytes.len() - e.valid_up_to() <= MAX_UTF8_CARRY => {
                // Chunk ends inside a multi-byte character
                let valid = e.valid_up_to();
                // Safe: the prefix was just validated
                let text = std::str::from_utf8(&bytes[..valid]).unwrap_or_default();
                self.pending.push_str(text);
                self.carry = bytes[valid..].to_vec();
            }
            Err(_) => {
                // Text received before the binary chunk ends here as its own line
                let mut records = Vec::with_capacity(2);
                let pending = std::mem::take(&mut self.pending);
                self.push_text(&mut records, &pending);
                self.stats.decode_errors += 1;
                self.stats.hex_records += 1;
                records.push(Record::rx_hex(&bytes));
                return records;
            }
        }

        self.extract_lines()
    }

    fn feed_lossy(&mut self, raw: &[u8]) -> Vec<Record> {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(raw);

        // Hold back an incomplete trailing character so it is not replaced
        let split = match std::str::from_utf8(&bytes) {
            Err(e) if e.error_len().is_none() && bytes.len() - e.valid_up_to() <= MAX_UTF8_CARRY => {
                e.valid_up_to()
            }
            Err(_) => {
                self.stats.decode_errors += 1;
                bytes.len()
            }
            Ok(_) => bytes.len(),
        };

        self.carry = bytes[split..].to_vec();
        self.pending.push_str(&String::from_utf8_lossy(&bytes[..split]));

        self.extract_lines()
    }

    fn extract_lines(&mut self) -> Vec<Record> {
        let mut records = Vec::new();
        let max = self.config.max_line_len;

        loop {
            let newline = self.pending.find('\n');
            let segment = match newline {
                Some(idx) if idx < max => self.pending.drain(..=idx).collect::<String>(),
                _ if self.pending.len() >= max => {
                    let cut = floor_char_boundary(&self.pending, max);
                    self.stats.forced_flushes += 1;
                    log::warn!("No newline within {} bytes, flushing partial line", max);
                    self.pending.drain(..cut).collect()
                }
                _ => break,
            };

            self.push_text(&mut records, &segment);
        }

        records
    }

    fn push_text(&mut self, records: &mut Vec<Record>, segment: &str) {
        let trimmed = segment.trim();
        if !trimmed.is_empty() {
            self.stats.text_lines += 1;
            records.push(Record::rx_text(trimmed));
        }
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(FramerConfig::default())
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut cut = index.min(s.len());
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    if cut == 0 {
        // First character is wider than the limit; take it whole
        cut = s.chars().next().map(char::len_utf8).unwrap_or(0);
    }
    cut
}
