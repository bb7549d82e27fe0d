//! Owner of everything that depends on the swapchain extent.
//!
//! One build produces, in order: swapchain (with image views), render pass,
//! pipeline layout, pipeline, one framebuffer per view. Teardown destroys the
//! same set in reverse. The whole graph is rebuilt as a unit on resize.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use viewer_platform::Surface;
use viewer_rhi::device::Device;
use viewer_rhi::framebuffer::Framebuffer;
use viewer_rhi::instance::Instance;
use viewer_rhi::pipeline::{
    CullMode, FrontFace, GraphicsPipelineBuilder, Pipeline, PipelineLayout, PrimitiveTopology,
};
use viewer_rhi::render_pass::RenderPass;
use viewer_rhi::swapchain::{
    Swapchain, SwapchainPreferences, SwapchainSupportDetails, plan_swapchain,
};
use viewer_rhi::vertex::Vertex;
use viewer_rhi::{RhiError, RhiResult};

use crate::command_recorder::RecordTarget;
use crate::presentation_loop::{AcquireOutcome, PresentOutcome};
use crate::shaders::ShaderSet;

/// One build's objects.
///
/// Field order is drop order: framebuffers, pipeline, layout, render pass,
/// then the swapchain (which destroys its views before itself).
struct SwapchainResources {
    framebuffers: Vec<Framebuffer>,
    pipeline: Pipeline,
    layout: PipelineLayout,
    render_pass: RenderPass,
    swapchain: Swapchain,
}

pub struct SwapchainManager {
    device: Arc<Device>,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    preferences: SwapchainPreferences,
    shaders: ShaderSet,
    resources: Option<SwapchainResources>,
}

impl SwapchainManager {
    /// Nothing is created until [`build`](Self::build).
    ///
    /// `surface` must outlive the manager.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: &Surface,
        preferences: SwapchainPreferences,
        shaders: ShaderSet,
    ) -> Self {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());

        Self {
            device,
            surface: surface.handle(),
            surface_loader: surface.loader().clone(),
            swapchain_loader,
            preferences,
            shaders,
            resources: None,
        }
    }

    fn query_support(&self) -> RhiResult<SwapchainSupportDetails> {
        SwapchainSupportDetails::query(
            self.device.physical_device(),
            self.surface,
            &self.surface_loader,
        )
    }

    /// The extent a build would use right now: the surface's current extent
    /// when it dictates one, otherwise `requested` clamped to its limits.
    ///
    /// Fails with [`RhiError::ZeroExtent`] while the surface has zero area.
    pub fn resolve_extent(&self, requested: vk::Extent2D) -> RhiResult<vk::Extent2D> {
        let support = self.query_support()?;
        Ok(plan_swapchain(&support, requested, &self.preferences)?.extent)
    }

    /// Creates the swapchain graph for `extent`.
    ///
    /// A zero-area surface fails with [`RhiError::ZeroExtent`] before anything
    /// is created. On any other failure the objects created so far are
    /// dropped in reverse creation order and the manager stays unbuilt.
    pub fn build(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        if self.resources.is_some() {
            return Err(RhiError::SwapchainError(
                "Swapchain already built; tear down first".to_string(),
            ));
        }

        let support = self.query_support()?;
        self.build_with(&support, extent)
    }

    fn build_with(
        &mut self,
        support: &SwapchainSupportDetails,
        extent: vk::Extent2D,
    ) -> RhiResult<()> {
        let swapchain = Swapchain::new(
            self.device.clone(),
            self.swapchain_loader.clone(),
            self.surface,
            support,
            extent,
            &self.preferences,
        )?;

        let render_pass = RenderPass::new(self.device.clone(), swapchain.format())?;
        let layout = PipelineLayout::empty(self.device.clone())?;

        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&self.shaders.vertex)
            .fragment_shader(&self.shaders.fragment)
            .vertex_binding(Vertex::binding_description())
            .vertex_attributes(&Vertex::attribute_descriptions())
            .topology(PrimitiveTopology::TriangleList)
            .cull_mode(CullMode::None)
            .front_face(FrontFace::Clockwise)
            .render_pass(&render_pass, 0)
            .extent(swapchain.extent())
            .build(self.device.clone(), &layout)?;

        let mut framebuffers = Vec::with_capacity(swapchain.image_views().len());
        for &view in swapchain.image_views() {
            framebuffers.push(Framebuffer::new(
                self.device.clone(),
                &render_pass,
                view,
                swapchain.extent(),
            )?);
        }
        debug!("Created {} framebuffers", framebuffers.len());

        info!(
            "Swapchain graph built: {}x{}, {} images",
            swapchain.extent().width,
            swapchain.extent().height,
            swapchain.image_count()
        );

        self.resources = Some(SwapchainResources {
            framebuffers,
            pipeline,
            layout,
            render_pass,
            swapchain,
        });

        Ok(())
    }

    /// Destroys framebuffers, pipeline, pipeline layout, render pass, image
    /// views and swapchain, in that order. No-op when unbuilt.
    ///
    /// The device must be idle.
    pub fn teardown(&mut self) {
        if let Some(resources) = self.resources.take() {
            let SwapchainResources {
                framebuffers,
                pipeline,
                layout,
                render_pass,
                swapchain,
            } = resources;

            drop(framebuffers);
            drop(pipeline);
            drop(layout);
            drop(render_pass);
            drop(swapchain);

            debug!("Swapchain graph torn down");
        }
    }

    /// Waits for the device, tears down, builds again at `extent`.
    ///
    /// The surface is queried first: a zero-area surface fails with
    /// [`RhiError::ZeroExtent`] and the current build is left untouched.
    pub fn rebuild(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        let support = self.query_support()?;
        plan_swapchain(&support, extent, &self.preferences)?;

        info!("Rebuilding swapchain at {}x{}", extent.width, extent.height);
        self.device.wait_idle()?;
        self.teardown();
        self.build_with(&support, extent)
    }

    fn resources(&self) -> RhiResult<&SwapchainResources> {
        self.resources
            .as_ref()
            .ok_or_else(|| RhiError::SwapchainError("Swapchain is not built".to_string()))
    }

    /// Handles the command recorder draws against for the current build.
    pub fn record_target(&self) -> RhiResult<RecordTarget> {
        let resources = self.resources()?;
        Ok(RecordTarget {
            render_pass: resources.render_pass.handle(),
            pipeline: resources.pipeline.handle(),
            framebuffers: resources.framebuffers.iter().map(Framebuffer::handle).collect(),
            extent: resources.swapchain.extent(),
        })
    }

    /// Acquires the next image, signaling `image_available`.
    pub fn acquire(&self, image_available: vk::Semaphore) -> RhiResult<AcquireOutcome> {
        match self.resources()?.swapchain.acquire_next_image(image_available) {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date during acquire");
                Ok(AcquireOutcome::OutOfDate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Presents `image_index` once `render_finished` signals.
    pub fn present(
        &self,
        image_index: u32,
        render_finished: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        let result = self.resources()?.swapchain.present(
            self.device.present_queue(),
            image_index,
            render_finished,
        );
        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => {
                debug!("Swapchain suboptimal during present");
                Ok(PresentOutcome::Suboptimal)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date during present");
                Ok(PresentOutcome::OutOfDate)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[inline]
    pub fn is_built(&self) -> bool {
        self.resources.is_some()
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.resources.as_ref().map(|r| r.swapchain.extent())
    }

    pub fn image_count(&self) -> Option<u32> {
        self.resources.as_ref().map(|r| r.swapchain.image_count())
    }

    pub fn format(&self) -> Option<vk::Format> {
        self.resources.as_ref().map(|r| r.swapchain.format())
    }
}

impl Drop for SwapchainManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<SwapchainManager>();
    }
}
