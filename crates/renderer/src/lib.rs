//! Frame presentation for the viewer.
//!
//! - [`SwapchainManager`] owns the swapchain graph and rebuilds it on resize
//! - [`FrameSynchronizer`] owns the per-slot semaphores and fences
//! - [`CommandRecorder`] records one reusable command buffer per image
//! - [`PresentationLoop`] drives them through a [`FrameBackend`]
//! - [`Viewer`] is the Vulkan backend

pub mod command_recorder;
pub mod frame_synchronizer;
pub mod presentation_loop;
pub mod shaders;
pub mod swapchain_manager;
pub mod viewer;

pub use command_recorder::CommandRecorder;
pub use frame_synchronizer::{FrameCounter, FrameSynchronizer};
pub use presentation_loop::{FrameBackend, LoopState, PresentationLoop, TickOutcome};
pub use swapchain_manager::SwapchainManager;
pub use viewer::Viewer;
pub use viewer_rhi::{RhiError, RhiResult, vk};

/// Maximum number of frames that can be in flight simultaneously.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
