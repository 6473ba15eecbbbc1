//! Error handling for the railscope core
//!
//! This module defines the crate error type and a Result alias used
//! throughout the library. Per-line failures (parse errors, numeric edge
//! cases) never show up here: the pipeline degrades them to log events
//! and keeps running. Only transport, channel and configuration failures
//! are real errors.

use thiserror::Error;

/// Main error type for railscope operations
#[derive(Error, Debug)]
pub enum RailscopeError {
    /// Errors from the serial transport layer
    #[error("Serial error: {0}")]
    Serial(#[from] serialport::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result alias using [`RailscopeError`]
pub type Result<T> = std::result::Result<T, RailscopeError>;
