//! Line-based command input for lockstep

mod commands;
mod parser;

pub use commands::{Command, HELP};
pub use parser::{parse_command, ParseError};
