pub mod types;
pub mod reader;

pub use reader::{SerialSession, SerialSessionBuilder};
pub use types::{MetricsSnapshot, PollPolicy, ReaderState, SerialCommand};
