use std::path::PathBuf;
use clap::Parser;

use crate::config::AppConfig;
use crate::serial::{DataBits, DecodePolicy, Parity, StopBits};

/// Terminal for talking to a microcontroller over a serial port
#[derive(Parser, Debug, Default)]
#[command(version, about)]
pub struct Cli {
    /// Serial port to open at startup
    #[arg(short, long)]
    pub port: Option<String>,

    /// Baud rate (default 115200)
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Data bits (7 or 8)
    #[arg(long, value_parser = parse_data_bits)]
    pub data_bits: Option<DataBits>,

    /// Stop bits (1 or 2)
    #[arg(long, value_parser = parse_stop_bits)]
    pub stop_bits: Option<StopBits>,

    /// Parity (N, E or O)
    #[arg(long, value_parser = parse_parity)]
    pub parity: Option<Parity>,

    /// JSON config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Append CR to text sends
    #[arg(long)]
    pub cr: bool,

    /// Do not append LF to text sends
    #[arg(long)]
    pub no_lf: bool,

    /// Decode invalid UTF-8 with replacement characters instead of showing hex
    #[arg(long)]
    pub lossy: bool,

    /// Flush received text after this many bytes without a newline
    #[arg(long)]
    pub max_line_len: Option<usize>,

    /// Hide timestamps on received lines
    #[arg(long)]
    pub no_timestamps: bool,

    /// List serial ports and exit
    #[arg(long)]
    pub list: bool,

    /// Connect, send AT and STATUS, print the replies and exit
    #[arg(long)]
    pub test: bool,

    /// More diagnostics on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Overlay command line flags on a loaded config
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = &self.port {
            config.connection.port_name = port.clone();
        }
        if let Some(baud) = self.baud {
            config.connection.baud_rate = baud;
        }
        if let Some(bits) = self.data_bits {
            config.connection.data_bits = bits;
        }
        if let Some(bits) = self.stop_bits {
            config.connection.stop_bits = bits;
        }
        if let Some(parity) = self.parity {
            config.connection.parity = parity;
        }
        if self.cr {
            config.send.append_cr = true;
        }
        if self.no_lf {
            config.send.append_lf = false;
        }
        if self.lossy {
            config.framer.decode_policy = DecodePolicy::Lossy;
        }
        if let Some(len) = self.max_line_len {
            config.framer.max_line_len = len;
        }
        if self.no_timestamps {
            config.display.show_timestamps = false;
        }
    }

    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        }
    }
}

fn parse_data_bits(s: &str) -> Result<DataBits, String> {
    let v: u8 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    DataBits::try_from(v).map_err(|e| e.to_string())
}

fn parse_stop_bits(s: &str) -> Result<StopBits, String> {
    let v: u8 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    StopBits::try_from(v).map_err(|e| e.to_string())
}

fn parse_parity(s: &str) -> Result<Parity, String> {
    s.parse().map_err(|e: crate::serial::SerialError| e.to_string())
}
