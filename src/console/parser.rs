//! Command line parser for the interactive console
//!
//! The first word selects the command. `send` and `hex` take the rest of
//! the line verbatim so embedded spaces reach the device.

use crate::serial::{DataBits, Parity, StopBits};
use super::ConsoleError;

/// Canned commands understood by most MCU firmwares we talk to
pub const QUICK_COMMANDS: &[&str] = &["AT", "RST", "STATUS", "VER", "HELP"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectArgs {
    /// Port name, or a 1-based index into the last `list` output
    pub target: Option<String>,
    pub baud_rate: Option<u32>,
    pub data_bits: Option<DataBits>,
    pub stop_bits: Option<StopBits>,
    pub parity: Option<Parity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Empty,
    Help,
    List,
    Connect(ConnectArgs),
    Disconnect,
    Send(String),
    Hex(String),
    Quick(&'static str),
    SetCr(bool),
    SetLf(bool),
    SetTimestamps(bool),
    Status,
    Stats,
    Clear,
    Quit,
}

/// Split a line into its command word and the untouched remainder
pub fn split_command(line: &str) -> (&str, &str) {
    let line = line.trim();
    match line.find(char::is_whitespace) {
        Some(idx) => (&line[..idx], line[idx..].trim_start()),
        None => (line, ""),
    }
}

pub fn parse_line(line: &str) -> Result<ConsoleCommand, ConsoleError> {
    let (word, rest) = split_command(line);
    let command = word.to_ascii_lowercase();

    let cmd = match command.as_str() {
        "" => ConsoleCommand::Empty,
        "help" | "?" => ConsoleCommand::Help,
        "list" | "ls" => ConsoleCommand::List,
        "connect" | "open" => ConsoleCommand::Connect(parse_connect(rest)?),
        "disconnect" | "close" => ConsoleCommand::Disconnect,
        "send" => {
            if rest.is_empty() {
                return Err(ConsoleError::MissingArg("text to send"));
            }
            ConsoleCommand::Send(rest.to_string())
        }
        "hex" => {
            if rest.is_empty() {
                return Err(ConsoleError::MissingArg("hex bytes"));
            }
            ConsoleCommand::Hex(rest.to_string())
        }
        "quick" => {
            let name = rest.split_whitespace().next().ok_or(ConsoleError::MissingArg("quick command"))?;
            let quick = QUICK_COMMANDS
                .iter()
                .copied()
                .find(|q| q.eq_ignore_ascii_case(name))
                .ok_or_else(|| ConsoleError::InvalidValue(format!("unknown quick command '{}'", name)))?;
            ConsoleCommand::Quick(quick)
        }
        "cr" => ConsoleCommand::SetCr(parse_switch(rest)?),
        "lf" => ConsoleCommand::SetLf(parse_switch(rest)?),
        "ts" | "timestamps" => ConsoleCommand::SetTimestamps(parse_switch(rest)?),
        "status" => ConsoleCommand::Status,
        "stats" => ConsoleCommand::Stats,
        "clear" | "cls" => ConsoleCommand::Clear,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        _ => return Err(ConsoleError::UnknownCommand(word.to_string())),
    };
    Ok(cmd)
}

fn parse_switch(arg: &str) -> Result<bool, ConsoleError> {
    match arg.trim().to_ascii_lowercase().as_str() {
        "on" | "1" | "true" | "yes" => Ok(true),
        "off" | "0" | "false" | "no" => Ok(false),
        "" => Err(ConsoleError::MissingArg("on|off")),
        other => Err(ConsoleError::InvalidValue(format!("expected on|off, got '{}'", other))),
    }
}

fn parse_connect(rest: &str) -> Result<ConnectArgs, ConsoleError> {
    let mut parts = rest.split_whitespace();
    let target = parts.next().map(str::to_string);

    let baud_rate = parts
        .next()
        .map(|b| match b.parse::<u32>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(ConsoleError::InvalidValue(format!("bad baud rate '{}'", b))),
        })
        .transpose()?;
    let data_bits = parts
        .next()
        .map(|b| {
            b.parse::<u8>()
                .map_err(|_| ConsoleError::InvalidValue(format!("bad data bits '{}'", b)))
                .and_then(|v| DataBits::try_from(v).map_err(ConsoleError::from))
        })
        .transpose()?;
    let stop_bits = parts
        .next()
        .map(|b| {
            b.parse::<u8>()
                .map_err(|_| ConsoleError::InvalidValue(format!("bad stop bits '{}'", b)))
                .and_then(|v| StopBits::try_from(v).map_err(ConsoleError::from))
        })
        .transpose()?;
    let parity = parts.next().map(|p| p.parse::<Parity>()).transpose()?;

    Ok(ConnectArgs { target, baud_rate, data_bits, stop_bits, parity })
}
