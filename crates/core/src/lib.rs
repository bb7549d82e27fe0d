//! Core utilities for the viewer.
//!
//! This crate provides foundational types used across the viewer:
//! - Error types and result aliases
//! - Logging initialization
//! - Configuration loading
//! - Frame timing

mod config;
mod error;
mod logging;
mod timer;

pub use config::{
    ColorSpace, PresentMode, RenderConfig, SurfaceConfig, SurfaceFormat, ViewerConfig,
    WindowConfig, config_path,
};
pub use error::{Error, Result};
pub use logging::{DEFAULT_FILTER, init_logging};
pub use timer::Timer;
