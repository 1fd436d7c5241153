use std::io::{Read, Write};
use serialport::{FlowControl, SerialPort, SerialPortType};

use super::{ConnectionParams, PortInfo, Result, SerialError};

/// Byte-level access to one serial connection.
///
/// Implementations hold at most one open handle. The reader task is the
/// only owner of a transport once a session is started.
pub trait Transport: Send + 'static {
    /// Open the device, closing any handle that is already open.
    fn open(&mut self, params: &ConnectionParams) -> Result<()>;

    /// Release the handle. Calling this while closed is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn port_name(&self) -> Option<&str>;

    /// Number of bytes queued for reading, 0 when closed
    fn bytes_available(&mut self) -> Result<usize>;

    /// Read whatever is queued right now. Returns an empty buffer when
    /// nothing is ready or the transport is closed.
    fn read_available(&mut self) -> Result<Vec<u8>>;

    /// Write all bytes and flush them to the driver
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
}

/// List serial devices known to the OS, ordered by port name
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()?
        .into_iter()
        .map(|port| PortInfo {
            description: describe_port_type(&port.port_type),
            port_name: port.port_name,
        })
        .collect();
    ports.sort_by(|a, b| a.port_name.cmp(&b.port_name));
    Ok(ports)
}

fn describe_port_type(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb_info) => {
            let name = match (&usb_info.manufacturer, &usb_info.product) {
                (Some(m), Some(p)) => format!("{} {}", m, p),
                (None, Some(p)) => p.clone(),
                (Some(m), None) => m.clone(),
                (None, None) => "USB serial device".to_string(),
            };
            format!("{} ({:04X}:{:04X})", name, usb_info.vid, usb_info.pid)
        }
        SerialPortType::PciPort => "PCI serial port".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth serial port".to_string(),
        SerialPortType::Unknown => "Serial port".to_string(),
    }
}

/// Map an open error to the operator-facing taxonomy
fn open_error(port_name: &str, err: serialport::Error) -> SerialError {
    match err.kind() {
        serialport::ErrorKind::InvalidInput => {
            SerialError::InvalidParameters(format!("{}: {}", port_name, err))
        }
        _ => SerialError::PortUnavailable(format!("{}: {}", port_name, err)),
    }
}

/// `Transport` backed by the OS serial driver
pub struct SerialInterface {
    port: Option<Box<dyn SerialPort>>,
    params: Option<ConnectionParams>,
}

impl SerialInterface {
    pub fn new() -> Self {
        Self {
            port: None,
            params: None,
        }
    }

    /// Parameters of the open connection
    pub fn params(&self) -> Option<&ConnectionParams> {
        self.params.as_ref()
    }
}

impl Default for SerialInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SerialInterface {
    fn open(&mut self, params: &ConnectionParams) -> Result<()> {
        self.close();
        params.validate()?;

        let port = serialport::new(params.port_name.as_str(), params.baud_rate)
            .data_bits(params.data_bits.into())
            .stop_bits(params.stop_bits.into())
            .parity(params.parity.into())
            .flow_control(FlowControl::None)
            .timeout(params.read_timeout)
            .open()
            .map_err(|e| open_error(&params.port_name, e))?;

        self.port = Some(port);
        self.params = Some(params.clone());

        log::info!("Opened {} ({})", params.port_name, params.framing());
        Ok(())
    }

    fn close(&mut self) {
        if let Some(params) = self.params.take() {
            log::info!("Closing {}", params.port_name);
        }
        // Dropping the boxed port releases the descriptor
        self.port = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn port_name(&self) -> Option<&str> {
        self.params.as_ref().map(|p| p.port_name.as_str())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        match self.port.as_mut() {
            Some(port) => port
                .bytes_to_read()
                .map(|n| n as usize)
                .map_err(|e| SerialError::ReadFailure(e.to_string())),
            None => Ok(0),
        }
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        let available = self.bytes_available()?;
        let port = match self.port.as_mut() {
            Some(port) if available > 0 => port,
            _ => return Ok(Vec::new()),
        };

        let mut buffer = vec![0u8; available];
        match port.read(&mut buffer) {
            Ok(bytes_read) => {
                buffer.truncate(bytes_read);
                Ok(buffer)
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(Vec::new())
            }
            Err(e) => Err(SerialError::ReadFailure(e.to_string())),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(SerialError::NotConnected)?;

        port.write_all(bytes)
            .map_err(|e| SerialError::WriteFailure(e.to_string()))?;
        port.flush()
            .map_err(|e| SerialError::WriteFailure(e.to_string()))?;

        Ok(())
    }
}
