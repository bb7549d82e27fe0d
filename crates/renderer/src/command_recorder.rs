//! Pre-recorded per-image command buffers.
//!
//! The scene never changes, so each swapchain image gets one command buffer
//! recorded once per swapchain build and resubmitted every time that image is
//! acquired.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use viewer_rhi::command::{CommandBuffer, CommandPool};
use viewer_rhi::device::Device;
use viewer_rhi::{RhiError, RhiResult};

/// Triangle vertex count issued by every recorded draw.
pub const TRIANGLE_VERTEX_COUNT: u32 = 3;

/// Handles the recorder draws against; produced by the swapchain manager for
/// the current build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTarget {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    /// One framebuffer per swapchain image, indexed by image index.
    pub framebuffers: Vec<vk::Framebuffer>,
    pub extent: vk::Extent2D,
}

/// Shape of the last successful [`CommandRecorder::record_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedBuild {
    pub extent: vk::Extent2D,
    pub image_count: usize,
}

/// Render area covering the whole framebuffer.
pub fn full_render_area(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Owns the command pool and the per-image buffers. Not thread-safe.
pub struct CommandRecorder {
    device: Arc<Device>,
    pool: Option<CommandPool>,
    buffers: Vec<vk::CommandBuffer>,
    recorded: Option<RecordedBuild>,
}

impl CommandRecorder {
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        let pool = CommandPool::new(device.clone(), queue_family_index)?;
        Ok(Self {
            device,
            pool: Some(pool),
            buffers: Vec::new(),
            recorded: None,
        })
    }

    /// Frees the previous buffers and records one per framebuffer:
    /// begin, begin render pass (clear), bind pipeline, bind vertex buffer,
    /// draw the triangle, end render pass, end.
    ///
    /// None of the previous buffers may be pending; callers wait for device
    /// idle first.
    pub fn record_all(
        &mut self,
        target: &RecordTarget,
        vertex_buffer: vk::Buffer,
        clear_color: [f32; 4],
    ) -> RhiResult<()> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| RhiError::CommandError("Command recorder was torn down".to_string()))?;

        pool.free_command_buffers(&self.buffers);
        self.buffers.clear();
        self.recorded = None;

        self.buffers = pool.allocate_command_buffers(target.framebuffers.len() as u32)?;

        let render_area = full_render_area(target.extent);
        for (image_index, (&buffer, &framebuffer)) in
            self.buffers.iter().zip(&target.framebuffers).enumerate()
        {
            let cmd = CommandBuffer::from_handle(self.device.clone(), buffer);
            cmd.begin_reusable()?;
            cmd.begin_render_pass(target.render_pass, framebuffer, render_area, clear_color);
            cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, target.pipeline);
            cmd.bind_vertex_buffers(0, &[vertex_buffer], &[0]);
            cmd.draw(TRIANGLE_VERTEX_COUNT, 1, 0, 0);
            cmd.end_render_pass();
            cmd.end()?;
            debug!("Recorded command buffer for image {}", image_index);
        }

        self.recorded = Some(RecordedBuild {
            extent: target.extent,
            image_count: self.buffers.len(),
        });

        info!(
            "Recorded {} command buffers at {}x{}",
            self.buffers.len(),
            target.extent.width,
            target.extent.height
        );

        Ok(())
    }

    /// Recorded buffer for `image_index`.
    pub fn command_buffer(&self, image_index: u32) -> RhiResult<vk::CommandBuffer> {
        self.buffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                RhiError::CommandError(format!(
                    "No command buffer recorded for image {} ({} recorded)",
                    image_index,
                    self.buffers.len()
                ))
            })
    }

    #[inline]
    pub fn recorded(&self) -> Option<RecordedBuild> {
        self.recorded
    }

    /// Number of buffers currently recorded.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Frees the recorded buffers but keeps the pool, so nothing recorded
    /// against a build that is about to be destroyed stays reachable.
    ///
    /// The device must be idle.
    pub fn release(&mut self) {
        if let Some(pool) = self.pool.as_ref() {
            pool.free_command_buffers(&self.buffers);
        }
        self.buffers.clear();
        self.recorded = None;
    }

    /// Frees every buffer and destroys the pool. The device must be idle.
    pub fn teardown(&mut self) {
        self.release();
        self.pool = None;
    }
}
