//! Interactive line-oriented shell over a `SerialSession`.

pub mod parser;

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::{AppConfig, SendDefaults};
use crate::serial::unified::SerialSession;
use crate::serial::{ConnectionParams, PortInfo, SendRequest, SerialError, Transport};
use crate::sink::ConsoleSink;
pub use parser::{parse_line, ConnectArgs, ConsoleCommand, QUICK_COMMANDS};

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("unknown command '{0}' (type 'help')")]
    UnknownCommand(String),

    #[error("missing argument: {0}")]
    MissingArg(&'static str),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("{0}")]
    Serial(#[from] SerialError),

    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether the shell keeps reading after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub const HELP: &[(&str, &str)] = &[
    ("list", "List serial ports"),
    ("connect [port|#] [baud] [bits] [stop] [N|E|O]", "Open a port (default 115200 8N1)"),
    ("disconnect", "Close the port"),
    ("send <text>", "Send text with the configured line ending"),
    ("hex <bytes>", "Send raw bytes, e.g. 'hex 41 54 0D'"),
    ("quick <AT|RST|STATUS|VER|HELP>", "Send a canned command"),
    ("cr on|off", "Append CR to text sends"),
    ("lf on|off", "Append LF to text sends"),
    ("ts on|off", "Show timestamps on received lines"),
    ("status", "Show connection and send options"),
    ("stats", "Show reader counters"),
    ("clear", "Clear the screen"),
    ("quit", "Disconnect and exit"),
];

pub struct Console<T: Transport> {
    session: SerialSession<T>,
    sink: Arc<ConsoleSink>,
    defaults: ConnectionParams,
    send: SendDefaults,
    last_ports: Vec<PortInfo>,
}

impl<T: Transport> Console<T> {
    pub fn new(session: SerialSession<T>, sink: Arc<ConsoleSink>, config: &AppConfig) -> Self {
        Self {
            session,
            sink,
            defaults: config.connection.clone(),
            send: config.send,
            last_ports: Vec::new(),
        }
    }

    pub fn session(&self) -> &SerialSession<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SerialSession<T> {
        &mut self.session
    }

    pub fn send_defaults(&self) -> SendDefaults {
        self.send
    }

    /// Remember a port listing so `connect <#>` can refer to it
    pub fn set_last_ports(&mut self, ports: Vec<PortInfo>) {
        self.last_ports = ports;
    }

    /// Read commands from stdin until `quit`, EOF or Ctrl-C
    pub async fn run(&mut self) -> Result<(), ConsoleError> {
        let mut out = std::io::stdout();
        writeln!(out, "Type 'help' for commands.")?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            out.flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    writeln!(out)?;
                    None
                }
            };
            let Some(line) = line else { break };

            match self.execute_line(&line, &mut out).await {
                Ok(Flow::Quit) => break,
                Ok(Flow::Continue) => {}
                Err(e) => writeln!(out, "error: {}", e)?,
            }
        }

        self.shutdown().await
    }

    /// Stop the reader, which also closes any open port
    pub async fn shutdown(&mut self) -> Result<(), ConsoleError> {
        self.session.stop().await?;
        Ok(())
    }

    pub async fn execute_line(&mut self, line: &str, out: &mut dyn Write) -> Result<Flow, ConsoleError> {
        let cmd = parse_line(line)?;
        self.execute(cmd, out).await
    }

    pub async fn execute(&mut self, cmd: ConsoleCommand, out: &mut dyn Write) -> Result<Flow, ConsoleError> {
        match cmd {
            ConsoleCommand::Empty => {}
            ConsoleCommand::Help => {
                for (usage, brief) in HELP {
                    writeln!(out, "  {:<48} {}", usage, brief)?;
                }
            }
            ConsoleCommand::List => {
                let ports = self.session.list_ports()?;
                print_ports(&ports, out)?;
                self.last_ports = ports;
            }
            ConsoleCommand::Connect(args) => {
                let params = self.resolve_connect(args)?;
                self.session.connect(params).await?;
            }
            ConsoleCommand::Disconnect => {
                if self.session.metrics().connected_port.is_none() {
                    writeln!(out, "Not connected")?;
                }
                self.session.disconnect().await?;
            }
            ConsoleCommand::Send(text) => {
                self.session.send(SendRequest::text(text, self.send.append_cr, self.send.append_lf)).await?;
            }
            ConsoleCommand::Quick(text) => {
                self.session.send(SendRequest::text(text, self.send.append_cr, self.send.append_lf)).await?;
            }
            ConsoleCommand::Hex(digits) => {
                self.session.send(SendRequest::hex(digits)).await?;
            }
            ConsoleCommand::SetCr(on) => {
                self.send.append_cr = on;
                writeln!(out, "CR {}", on_off(on))?;
            }
            ConsoleCommand::SetLf(on) => {
                self.send.append_lf = on;
                writeln!(out, "LF {}", on_off(on))?;
            }
            ConsoleCommand::SetTimestamps(on) => {
                self.sink.set_show_timestamps(on);
                writeln!(out, "Timestamps {}", on_off(on))?;
            }
            ConsoleCommand::Status => {
                let metrics = self.session.metrics();
                match metrics.connected_port {
                    Some(port) => writeln!(out, "Connected: {}", port)?,
                    None => writeln!(out, "Not connected")?,
                }
                writeln!(
                    out,
                    "Line ending: CR {}, LF {}; timestamps {}",
                    on_off(self.send.append_cr),
                    on_off(self.send.append_lf),
                    on_off(self.sink.show_timestamps())
                )?;
            }
            ConsoleCommand::Stats => {
                let m = self.session.metrics();
                writeln!(out, "  bytes received   {}", m.bytes_received)?;
                writeln!(out, "  bytes sent       {}", m.bytes_sent)?;
                writeln!(out, "  text lines       {}", m.text_lines)?;
                writeln!(out, "  hex records      {}", m.hex_records)?;
                writeln!(out, "  forced flushes   {}", m.forced_flushes)?;
                writeln!(out, "  decode errors    {}", m.utf8_decode_errors)?;
                writeln!(out, "  read errors      {}", m.read_errors)?;
                if let Some(err) = m.last_error {
                    writeln!(out, "  last error       {}", err)?;
                }
            }
            ConsoleCommand::Clear => {
                write!(out, "\x1B[2J\x1B[H")?;
            }
            ConsoleCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn resolve_connect(&self, args: ConnectArgs) -> Result<ConnectionParams, ConsoleError> {
        let mut params = self.defaults.clone();

        match args.target {
            Some(target) => {
                params.port_name = match target.parse::<usize>() {
                    Ok(index) if index >= 1 && index <= self.last_ports.len() => {
                        self.last_ports[index - 1].port_name.clone()
                    }
                    Ok(index) => {
                        return Err(ConsoleError::InvalidValue(format!(
                            "no port #{} in the last listing",
                            index
                        )))
                    }
                    Err(_) => target,
                };
            }
            None if params.port_name.is_empty() => {
                return Err(ConsoleError::MissingArg("port name or number from 'list'"));
            }
            None => {}
        }

        if let Some(baud) = args.baud_rate {
            params.baud_rate = baud;
        }
        if let Some(bits) = args.data_bits {
            params.data_bits = bits;
        }
        if let Some(bits) = args.stop_bits {
            params.stop_bits = bits;
        }
        if let Some(parity) = args.parity {
            params.parity = parity;
        }
        Ok(params)
    }
}

pub fn print_ports(ports: &[PortInfo], out: &mut dyn Write) -> std::io::Result<()> {
    if ports.is_empty() {
        return writeln!(out, "No serial ports found");
    }
    for (i, port) in ports.iter().enumerate() {
        writeln!(out, "{:>3}. {} - {}", i + 1, port.port_name, port.description)?;
    }
    Ok(())
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}
