//! Platform layer for the viewer.
//!
//! - Window creation via winit
//! - Vulkan surface creation for that window
//! - [`ResizeSignal`], the resize flag shared between the window callback and
//!   the presentation loop

mod resize;
mod window;

pub use resize::ResizeSignal;
pub use window::{HEADLESS_SURFACE_EXTENSIONS, Surface, Window, required_extensions};
