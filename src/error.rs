// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Error types shared by the library.

use std::io;

/// Result alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Control points are empty, out of order, or unparsable.
    #[error("invalid fan curve: {0}")]
    InvalidCurve(String),

    /// Controller or daemon parameters are unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Reading the CPU temperature failed.
    #[error("failed to read temperature: {0}")]
    SensorRead(String),

    /// Commanding the fans failed.
    #[error("fan control command failed: {0}")]
    Actuator(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
