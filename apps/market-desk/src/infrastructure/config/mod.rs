//! Configuration Module
//!
//! Environment settings for the console and the user preferences file.

mod preferences;
mod settings;

pub use preferences::Preferences;
pub use settings::{
    ConfigError, ConsoleConfig, ExecutionSettings, PaperSettings, StorageSettings, StreamSettings,
};
