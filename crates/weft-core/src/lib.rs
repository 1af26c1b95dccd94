//! Weft Core - shared foundations for the Weft task scheduler
//!
//! This crate provides the resource model, configuration loading and
//! validation, and the top-level error type shared by the scheduling engine
//! and the CLI.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, Result, WeftError};
pub use types::{Resource, ResourceType};
