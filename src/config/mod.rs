//! Configuration management for watchview.
//!
//! Supports configuration from:
//! - Command-line arguments (log settings, root path)
//! - A `.watchviewconfig` JSON file at the watched root
//! - Built-in defaults

mod settings;

pub use settings::{Config, CONFIG_FILE_NAME};
