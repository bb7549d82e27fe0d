//! The Vulkan [`FrameBackend`]: graphics context bootstrap plus the
//! swapchain manager, command recorder and frame synchronizer.

use std::sync::Arc;

use ash::vk;
use glam::{Vec2, Vec3};
use tracing::{error, info};

use viewer_core::{ColorSpace, PresentMode, SurfaceConfig, SurfaceFormat, ViewerConfig};
use viewer_platform::{Surface, Window};
use viewer_rhi::buffer::Buffer;
use viewer_rhi::device::Device;
use viewer_rhi::instance::Instance;
use viewer_rhi::physical_device::select_physical_device;
use viewer_rhi::swapchain::SwapchainPreferences;
use viewer_rhi::vertex::Vertex;
use viewer_rhi::{RhiError, RhiResult};

use crate::command_recorder::CommandRecorder;
use crate::frame_synchronizer::FrameSynchronizer;
use crate::presentation_loop::{AcquireOutcome, FrameBackend, PresentOutcome};
use crate::shaders::ShaderSet;
use crate::swapchain_manager::SwapchainManager;

/// Application and engine name reported to the driver.
pub const APP_NAME: &str = "3D Viewer";

/// The static triangle, clockwise in Vulkan clip space.
pub const TRIANGLE: [Vertex; 3] = [
    Vertex::new(Vec2::new(0.0, -0.5), Vec3::new(1.0, 0.0, 0.0)),
    Vertex::new(Vec2::new(0.5, 0.5), Vec3::new(0.0, 1.0, 0.0)),
    Vertex::new(Vec2::new(-0.5, 0.5), Vec3::new(0.0, 0.0, 1.0)),
];

/// Maps the configured surface settings onto Vulkan enums.
pub fn swapchain_preferences(config: &SurfaceConfig) -> SwapchainPreferences {
    let format = match config.format {
        SurfaceFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        SurfaceFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        SurfaceFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        SurfaceFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
    };
    let color_space = match config.color_space {
        ColorSpace::SrgbNonlinear => vk::ColorSpaceKHR::SRGB_NONLINEAR,
        ColorSpace::ExtendedSrgbLinear => vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
    };
    let present_mode = match config.present_mode {
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
    };

    SwapchainPreferences {
        format,
        color_space,
        present_mode,
    }
}

/// Field order is drop order, the reverse of construction.
struct ViewerResources {
    synchronizer: FrameSynchronizer,
    recorder: CommandRecorder,
    swapchain: SwapchainManager,
    vertex_buffer: Buffer,
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,
}

/// Owns every Vulkan object the viewer creates.
pub struct Viewer {
    resources: Option<ViewerResources>,
    clear_color: [f32; 4],
}

impl Viewer {
    /// Bootstraps the graphics context for `window` and builds the first
    /// swapchain when the window has a non-zero size.
    ///
    /// On failure everything created so far is released in reverse order.
    pub fn new(window: &Window, config: &ViewerConfig) -> RhiResult<Self> {
        let surface_extensions = window
            .required_extensions()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let instance = Instance::new(APP_NAME, config.render.validation, &surface_extensions)?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let physical_device =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        info!("Selected GPU: {:?}", physical_device);
        let queue_family = physical_device.queue_family()?;

        let device = Device::new(&instance, &physical_device)?;

        let vertex_buffer =
            Buffer::vertex_with_data(device.clone(), "triangle", bytemuck::cast_slice(&TRIANGLE))?;

        let shaders = ShaderSet::load(device.clone(), config.render.shader_dir.as_deref())?;

        let mut swapchain = SwapchainManager::new(
            &instance,
            device.clone(),
            &surface,
            swapchain_preferences(&config.surface),
            shaders,
        );

        let mut recorder = CommandRecorder::new(device.clone(), queue_family)?;

        let (width, height) = window.framebuffer_extent();
        let built = if width > 0 && height > 0 {
            match swapchain.build(vk::Extent2D { width, height }) {
                Ok(()) => true,
                Err(e) if e.is_zero_extent() => false,
                Err(e) => return Err(e),
            }
        } else {
            false
        };

        if built {
            recorder.record_all(
                &swapchain.record_target()?,
                vertex_buffer.handle(),
                config.render.clear_color,
            )?;
        } else {
            info!("Surface has zero area; deferring swapchain creation");
        }

        let synchronizer = FrameSynchronizer::new(device.clone())?;

        info!("Viewer initialized");

        Ok(Self {
            resources: Some(ViewerResources {
                synchronizer,
                recorder,
                swapchain,
                vertex_buffer,
                device,
                surface,
                instance,
            }),
            clear_color: config.render.clear_color,
        })
    }

    fn resources(&mut self) -> RhiResult<&mut ViewerResources> {
        self.resources
            .as_mut()
            .ok_or_else(|| RhiError::InvalidHandle("Viewer has been torn down".to_string()))
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.resources.as_ref().and_then(|r| r.swapchain.extent())
    }
}

impl FrameBackend for Viewer {
    fn is_built(&self) -> bool {
        self.resources
            .as_ref()
            .is_some_and(|r| r.swapchain.is_built())
    }

    fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()> {
        self.resources()?.synchronizer.wait_idle(slot)
    }

    fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
        let resources = self.resources()?;
        let image_available = resources.synchronizer.slot(slot)?.image_available();
        resources.swapchain.acquire(image_available)
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
        let resources = self.resources()?;

        let command_buffers = [resources.recorder.command_buffer(image_index)?];
        let frame = resources.synchronizer.slot(slot)?;
        let wait_semaphores = [frame.image_available()];
        let signal_semaphores = [frame.render_finished()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];

        let fence = resources.synchronizer.signal_on_completion(slot)?;

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: The command buffer was fully recorded for the current build
        // and the fence was just reset.
        unsafe { resources.device.submit_graphics(&[submit_info], fence) }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
        let resources = self.resources()?;
        let render_finished = resources.synchronizer.slot(slot)?.render_finished();
        resources.swapchain.present(image_index, render_finished)
    }

    fn wait_device_idle(&mut self) -> RhiResult<()> {
        self.resources()?.device.wait_idle()
    }

    fn rebuild(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        let clear_color = self.clear_color;
        let resources = self.resources()?;

        // A minimized surface keeps the current build and its recordings.
        resources.swapchain.resolve_extent(extent)?;

        resources.device.wait_idle()?;
        resources.recorder.release();
        resources.swapchain.rebuild(extent)?;
        let target = resources.swapchain.record_target()?;
        resources
            .recorder
            .record_all(&target, resources.vertex_buffer.handle(), clear_color)
    }

    fn teardown(&mut self) {
        let Some(resources) = self.resources.take() else {
            return;
        };

        if let Err(e) = resources.device.wait_idle() {
            error!("Failed to wait for device idle during teardown: {}", e);
        }

        let ViewerResources {
            mut synchronizer,
            mut recorder,
            mut swapchain,
            vertex_buffer,
            device,
            surface,
            instance,
        } = resources;

        synchronizer.teardown();
        recorder.teardown();
        swapchain.teardown();
        drop(synchronizer);
        drop(recorder);
        drop(swapchain);
        drop(vertex_buffer);
        drop(device);
        drop(surface);
        drop(instance);

        info!("Viewer destroyed");
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_preferences_match_swapchain_defaults() {
        assert_eq!(
            swapchain_preferences(&SurfaceConfig::default()),
            SwapchainPreferences::default()
        );
    }

    #[test]
    fn test_preferences_map_every_option() {
        let config = SurfaceConfig {
            format: SurfaceFormat::Rgba8Srgb,
            color_space: ColorSpace::ExtendedSrgbLinear,
            present_mode: PresentMode::Mailbox,
        };
        let prefs = swapchain_preferences(&config);
        assert_eq!(prefs.format, vk::Format::R8G8B8A8_SRGB);
        assert_eq!(prefs.color_space, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT);
        assert_eq!(prefs.present_mode, vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_triangle_bytes() {
        let bytes: &[u8] = bytemuck::cast_slice(&TRIANGLE);
        assert_eq!(bytes.len(), 60);
    }

    #[test]
    fn test_triangle_is_clockwise_in_clip_space() {
        // Clip space y points down, so a clockwise on-screen triangle has a
        // positive signed area here.
        let [a, b, c] = TRIANGLE.map(|v| v.position);
        let area = (b - a).perp_dot(c - a);
        assert!(area > 0.0);
    }
}
