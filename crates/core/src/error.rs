//! Error types shared by the viewer crates.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the viewer's non-GPU layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan-related errors raised outside the RHI (surface creation)
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Failed to parse config '{path}': {source}")]
    ConfigParse {
        /// Path of the offending file.
        path: PathBuf,
        /// Parser error.
        source: toml::de::Error,
    },

    /// Configuration values are inconsistent
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using the viewer's Error type.
pub type Result<T> = std::result::Result<T, Error>;
