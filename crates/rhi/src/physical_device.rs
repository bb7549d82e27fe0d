//! Physical device (GPU) selection.
//!
//! A device is suitable when one queue family supports both graphics and
//! presentation to the window surface, the swapchain extension is available,
//! and the surface reports at least one format and present mode. Among the
//! suitable devices discrete GPUs win.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::DEVICE_EXTENSIONS;
use crate::error::{RhiError, RhiResult};
use crate::swapchain::SwapchainSupportDetails;

/// The queue family serving both graphics and presentation.
///
/// Both fields hold the same index once selection succeeds; the viewer never
/// shares resources across families.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    fn unified(index: u32) -> Self {
        Self {
            graphics_family: Some(index),
            present_family: Some(index),
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// The single family index, if graphics and present agree.
    pub fn unified_family(&self) -> Option<u32> {
        match (self.graphics_family, self.present_family) {
            (Some(g), Some(p)) if g == p => Some(g),
            _ => None,
        }
    }
}

/// What selection needs to know about one queue family.
#[derive(Clone, Copy, Debug)]
pub struct QueueFamilyCandidate {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    pub supports_present: bool,
}

#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Total device-local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }

    /// The family used for the graphics and present queue.
    pub fn queue_family(&self) -> RhiResult<u32> {
        self.queue_families
            .unified_family()
            .ok_or(RhiError::NoSuitableGpu)
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Selects the best physical device able to render to `surface`.
///
/// Returns [`RhiError::NoSuitableGpu`] when no device qualifies.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    // SAFETY: instance is a live Vulkan instance.
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let mut best: Option<(PhysicalDeviceInfo, u32)> = None;

    for device in devices {
        let Some(info) = check_device_suitability(instance, device, surface, surface_loader)?
        else {
            continue;
        };
        let score = rate_device_type(info.properties.device_type);
        debug!(
            "GPU '{}' ({}) - score {}",
            info.device_name(),
            info.device_type_name(),
            score
        );
        if best.as_ref().is_none_or(|(_, best_score)| score > *best_score) {
            best = Some((info, score));
        }
    }

    let Some((selected, _)) = best else {
        warn!("No GPU offers a combined graphics/present queue with swapchain support");
        return Err(RhiError::NoSuitableGpu);
    };

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, {} MiB local memory",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        selected.device_local_memory() / (1024 * 1024)
    );

    Ok(selected)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<Option<PhysicalDeviceInfo>> {
    // SAFETY: device was enumerated from this instance.
    let (properties, memory_properties, family_properties, extensions) = unsafe {
        (
            instance.get_physical_device_properties(device),
            instance.get_physical_device_memory_properties(device),
            instance.get_physical_device_queue_family_properties(device),
            instance.enumerate_device_extension_properties(device)?,
        )
    };

    let device_name = properties
        .device_name_as_c_str()
        .ok()
        .and_then(|name| name.to_str().ok())
        .unwrap_or("Unknown");

    let mut candidates = Vec::with_capacity(family_properties.len());
    for (i, family) in family_properties.iter().enumerate() {
        // SAFETY: i indexes a queue family reported for this device.
        let supports_present = unsafe {
            surface_loader.get_physical_device_surface_support(device, i as u32, surface)?
        };
        candidates.push(QueueFamilyCandidate {
            flags: family.queue_flags,
            queue_count: family.queue_count,
            supports_present,
        });
    }

    let Some(family) = pick_queue_family(&candidates) else {
        debug!(
            "GPU '{}' skipped: no queue family supports both graphics and present",
            device_name
        );
        return Ok(None);
    };

    if !supports_extensions(&extensions, DEVICE_EXTENSIONS) {
        debug!("GPU '{}' skipped: VK_KHR_swapchain not supported", device_name);
        return Ok(None);
    }

    let support = SwapchainSupportDetails::query(device, surface, surface_loader)?;
    if !support.is_adequate() {
        debug!(
            "GPU '{}' skipped: surface reports no formats or present modes",
            device_name
        );
        return Ok(None);
    }

    Ok(Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families: QueueFamilyIndices::unified(family),
    }))
}

/// First queue family with at least one queue that supports graphics and
/// can present to the surface.
pub fn pick_queue_family(candidates: &[QueueFamilyCandidate]) -> Option<u32> {
    candidates
        .iter()
        .position(|c| {
            c.queue_count > 0 && c.flags.contains(vk::QueueFlags::GRAPHICS) && c.supports_present
        })
        .map(|i| i as u32)
}

/// Whether every name in `required` appears in `available`.
pub fn supports_extensions(available: &[vk::ExtensionProperties], required: &[&CStr]) -> bool {
    required.iter().all(|&wanted| {
        available
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == wanted))
    })
}

/// Preference order for device types; discrete GPUs first.
pub fn rate_device_type(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 10,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, supports_present: bool) -> QueueFamilyCandidate {
        QueueFamilyCandidate {
            flags,
            queue_count: 1,
            supports_present,
        }
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, src) in props.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = *src as std::ffi::c_char;
        }
        props
    }

    #[test]
    fn test_queue_family_indices_default_incomplete() {
        let indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        assert_eq!(indices.unified_family(), None);
    }

    #[test]
    fn test_unified_family() {
        let indices = QueueFamilyIndices::unified(2);
        assert!(indices.is_complete());
        assert_eq!(indices.unified_family(), Some(2));
    }

    #[test]
    fn test_split_families_are_not_unified() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(1),
        };
        assert!(indices.is_complete());
        assert_eq!(indices.unified_family(), None);
    }

    #[test]
    fn test_pick_family_needs_graphics_and_present_together() {
        let candidates = [
            family(vk::QueueFlags::GRAPHICS, false),
            family(vk::QueueFlags::TRANSFER, true),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
        ];
        assert_eq!(pick_queue_family(&candidates), Some(2));
    }

    #[test]
    fn test_pick_family_rejects_split_support() {
        let candidates = [
            family(vk::QueueFlags::GRAPHICS, false),
            family(vk::QueueFlags::COMPUTE, true),
        ];
        assert_eq!(pick_queue_family(&candidates), None);
    }

    #[test]
    fn test_pick_family_skips_empty_family() {
        let mut empty = family(vk::QueueFlags::GRAPHICS, true);
        empty.queue_count = 0;
        let candidates = [empty, family(vk::QueueFlags::GRAPHICS, true)];
        assert_eq!(pick_queue_family(&candidates), Some(1));
    }

    #[test]
    fn test_supports_swapchain_extension() {
        let available = [
            extension(c"VK_KHR_maintenance1"),
            extension(ash::khr::swapchain::NAME),
        ];
        assert!(supports_extensions(&available, DEVICE_EXTENSIONS));
        assert!(!supports_extensions(&available[..1], DEVICE_EXTENSIONS));
    }

    #[test]
    fn test_discrete_preferred() {
        assert!(
            rate_device_type(vk::PhysicalDeviceType::DISCRETE_GPU)
                > rate_device_type(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            rate_device_type(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > rate_device_type(vk::PhysicalDeviceType::CPU)
        );
    }
}
