//! Configuration management
//!
//! Storage locations only: the data directory holding the sled store and the
//! wallet file. Read from an optional TOML file with environment overrides.

pub mod settings;

pub use settings::{Config, GLOBAL_CONFIG};
