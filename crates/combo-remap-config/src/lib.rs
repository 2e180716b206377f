//! Configuration parsing for combo-remap
//!
//! This crate handles the daemon's KDL settings file. The remap policy itself
//! is fixed and lives in the daemon; only process-level knobs are configurable.
//! It also carries the control socket message types shared by the daemon and
//! the CLI.

mod error;
mod model;
mod parser;
pub mod protocol;

pub use error::ConfigError;
pub use model::*;
pub use parser::{load_config, parse_config, parse_config_str};
