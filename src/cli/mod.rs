//! CLI module for shardscan.

mod commands;

pub use commands::{Cli, Commands, ConfigCommands};
