//! Operator input to wire bytes.

use serde::{Deserialize, Serialize};

use super::framer::{hex_string, Direction, Record, RecordMode};
use super::{Result, SerialError, Transport};
use crate::sink::Sink;

/// One send attempt as entered by the operator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub text: String,
    pub hex_mode: bool,
    pub append_cr: bool,
    pub append_lf: bool,
}

/// Bytes to write plus the form echoed back to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub bytes: Vec<u8>,
    pub display: String,
    pub mode: RecordMode,
}

impl SendRequest {
    pub fn text(text: impl Into<String>, append_cr: bool, append_lf: bool) -> Self {
        Self {
            text: text.into(),
            hex_mode: false,
            append_cr,
            append_lf,
        }
    }

    pub fn hex(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            hex_mode: true,
            ..Self::default()
        }
    }

    pub fn encode(&self) -> Result<EncodedPayload> {
        if self.hex_mode {
            let bytes = decode_hex(&self.text)?;
            return Ok(EncodedPayload {
                display: hex_string(&bytes),
                bytes,
                mode: RecordMode::Hex,
            });
        }

        let mut data = self.text.clone();
        if self.append_cr {
            data.push('\r');
        }
        if self.append_lf {
            data.push('\n');
        }
        if data.is_empty() {
            return Err(SerialError::InvalidParameters("nothing to send".to_string()));
        }

        Ok(EncodedPayload {
            bytes: data.as_bytes().to_vec(),
            display: data,
            mode: RecordMode::Text,
        })
    }
}

/// Parse operator hex such as `41 54` or `414` (read as `0414`)
pub fn decode_hex(input: &str) -> Result<Vec<u8>> {
    let mut digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.is_empty() {
        return Err(SerialError::InvalidHex("nothing to send".to_string()));
    }
    if digits.len() % 2 != 0 {
        digits.insert(0, '0');
    }
    hex::decode(&digits).map_err(|e| SerialError::InvalidHex(format!("'{}': {}", input.trim(), e)))
}

/// Encode, write and echo one request. Runs on the reader task.
pub fn send_request<T: Transport + ?Sized>(
    transport: &mut T,
    request: &SendRequest,
    sink: &dyn Sink,
) -> Result<usize> {
    let payload = request.encode()?;
    if !transport.is_open() {
        return Err(SerialError::NotConnected);
    }

    transport.write(&payload.bytes)?;
    log::debug!("Wrote {} bytes", payload.bytes.len());

    sink.on_record(&Record::new(Direction::Tx, payload.mode, payload.display));
    Ok(payload.bytes.len())
}
