//! Thin Vulkan layer over `ash`.
//!
//! Each wrapper owns one Vulkan object and destroys it on drop; everything
//! created from the device holds an `Arc<Device>` so the device is released
//! last. Selection logic (queue family, surface format, present mode, image
//! count) is exposed as plain functions for testing without a GPU.

mod error;

pub mod buffer;
pub mod command;
pub mod device;
pub mod framebuffer;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{RhiError, RhiResult};

pub use ash::vk;
