//! Swapchain creation, image acquisition and presentation.
//!
//! Selection of format, present mode, extent and image count is split into
//! pure functions ([`plan_swapchain`] and friends) so it can be tested without
//! a surface. [`Swapchain`] owns the swapchain handle and one view per image;
//! dropping it destroys the views first.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// What the surface supports for swapchain creation.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        // SAFETY: The surface and physical device come from the same instance as
        // the loader.
        let (capabilities, formats, present_modes) = unsafe {
            (
                surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?,
                surface_loader.get_physical_device_surface_formats(physical_device, surface)?,
                surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            )
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// At least one format and one present mode.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Requested presentation settings, before fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPreferences {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
}

impl Default for SwapchainPreferences {
    fn default() -> Self {
        Self {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            present_mode: vk::PresentModeKHR::FIFO,
        }
    }
}

/// Resolved creation parameters for one swapchain build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

/// Resolves every creation parameter from the surface support and the
/// preferences.
///
/// Fails with [`RhiError::ZeroExtent`] when the resolved extent has zero
/// area, which happens when a minimized surface dictates `0x0`.
pub fn plan_swapchain(
    support: &SwapchainSupportDetails,
    requested_extent: vk::Extent2D,
    preferences: &SwapchainPreferences,
) -> RhiResult<SwapchainPlan> {
    if !support.is_adequate() {
        return Err(RhiError::SwapchainError(
            "Inadequate swapchain support (no formats or present modes)".to_string(),
        ));
    }

    let surface_format = choose_surface_format(&support.formats, preferences)?;
    let present_mode = choose_present_mode(&support.present_modes, preferences.present_mode);
    let extent = choose_extent(&support.capabilities, requested_extent);
    if extent.width == 0 || extent.height == 0 {
        return Err(RhiError::ZeroExtent {
            width: extent.width,
            height: extent.height,
        });
    }
    let image_count = determine_image_count(&support.capabilities);

    Ok(SwapchainPlan {
        surface_format,
        present_mode,
        extent,
        image_count,
    })
}

/// Picks the surface format.
///
/// Order: the exact preferred pair, then any entry with the preferred format,
/// then B8G8R8A8_UNORM/SRGB_NONLINEAR, then the first reported entry.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferences: &SwapchainPreferences,
) -> RhiResult<vk::SurfaceFormatKHR> {
    if let Some(&exact) = formats
        .iter()
        .find(|f| f.format == preferences.format && f.color_space == preferences.color_space)
    {
        debug!(
            "Selected surface format {:?} / {:?}",
            exact.format, exact.color_space
        );
        return Ok(exact);
    }

    if let Some(&same_format) = formats.iter().find(|f| f.format == preferences.format) {
        warn!(
            "Color space {:?} unavailable for {:?}, using {:?}",
            preferences.color_space, preferences.format, same_format.color_space
        );
        return Ok(same_format);
    }

    if let Some(&baseline) = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    }) {
        warn!(
            "Surface format {:?} unavailable, falling back to B8G8R8A8_UNORM / SRGB_NONLINEAR",
            preferences.format
        );
        return Ok(baseline);
    }

    let first = formats.first().copied().ok_or_else(|| {
        RhiError::SwapchainError("Surface reports no formats".to_string())
    })?;
    warn!(
        "Surface format {:?} unavailable, using first reported {:?} / {:?}",
        preferences.format, first.format, first.color_space
    );
    Ok(first)
}

/// The preferred present mode when supported, FIFO otherwise.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if present_modes.contains(&preferred) {
        debug!("Selected present mode {:?}", preferred);
        return preferred;
    }

    // FIFO support is mandatory for every surface.
    warn!("Present mode {:?} unsupported, falling back to FIFO", preferred);
    vk::PresentModeKHR::FIFO
}

/// The surface's current extent when it dictates one, otherwise the requested
/// extent clamped to the surface limits.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        debug!(
            "Using current surface extent: {}x{}",
            capabilities.current_extent.width, capabilities.current_extent.height
        );
        return capabilities.current_extent;
    }

    let extent = vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{})",
        extent.width, extent.height, requested.width, requested.height
    );

    extent
}

/// `min_image_count + 1`, clamped to `max_image_count` when the surface
/// bounds it (zero means unbounded).
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

/// Swapchain plus one color view per image.
///
/// Not thread-safe; driven from the presentation thread only.
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Creates a swapchain for `surface` with EXCLUSIVE sharing, opaque
    /// composite alpha, clipping and the surface's current transform.
    ///
    /// No old swapchain is passed; callers tear the previous one down first.
    /// If view creation fails, the views created so far and the swapchain are
    /// destroyed before returning the error.
    pub fn new(
        device: Arc<Device>,
        swapchain_loader: ash::khr::swapchain::Device,
        surface: vk::SurfaceKHR,
        support: &SwapchainSupportDetails,
        requested_extent: vk::Extent2D,
        preferences: &SwapchainPreferences,
    ) -> RhiResult<Self> {
        let plan = plan_swapchain(support, requested_extent, preferences)?;

        info!(
            "Creating swapchain: {}x{}, format {:?}, color space {:?}, present mode {:?}, {} images requested",
            plan.extent.width,
            plan.extent.height,
            plan.surface_format.format,
            plan.surface_format.color_space,
            plan.present_mode,
            plan.image_count
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        // SAFETY: surface is alive and create_info borrows locals only.
        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };

        let mut this = Self {
            device,
            swapchain_loader,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format: plan.surface_format.format,
            color_space: plan.surface_format.color_space,
            extent: plan.extent,
            present_mode: plan.present_mode,
        };

        // SAFETY: The swapchain was just created by this loader.
        this.images = unsafe { this.swapchain_loader.get_swapchain_images(this.swapchain)? };
        info!("Swapchain created with {} images", this.images.len());

        // Pushed one at a time so Drop cleans up a partial set.
        for i in 0..this.images.len() {
            let view = create_image_view(&this.device, this.images[i], this.format)
                .map_err(|e| {
                    RhiError::SwapchainError(format!("Failed to create image view {}: {}", i, e))
                })?;
            this.image_views.push(view);
        }
        debug!("Created {} image views", this.image_views.len());

        Ok(this)
    }

    /// Acquires the next image, blocking without timeout.
    ///
    /// Returns `(image_index, suboptimal)`. `ERROR_OUT_OF_DATE_KHR` is passed
    /// through for the caller to rebuild.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        // SAFETY: The semaphore is unsignaled with no pending signal; the frame
        // synchronizer guarantees its slot's previous use has completed.
        unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Queues `image_index` for presentation once `wait_semaphore` signals.
    ///
    /// Returns `true` when the swapchain is suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        // SAFETY: image_index was acquired from this swapchain and the queue
        // belongs to the same device.
        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        for &view in &self.image_views {
            // SAFETY: Views were created from this device and nothing in flight
            // references them (callers wait for idle before teardown).
            unsafe { self.device.handle().destroy_image_view(view, None) };
        }
        self.image_views.clear();

        // SAFETY: The swapchain was created by this loader; its images are
        // released together with it.
        unsafe {
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }

        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

/// 2D color view with identity swizzle and a single mip level and layer.
fn create_image_view(device: &Device, image: vk::Image, format: vk::Format) -> RhiResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    // SAFETY: image belongs to a live swapchain on this device.
    let view = unsafe { device.handle().create_image_view(&create_info, None)? };
    Ok(view)
}
