//! Runs the real swapchain manager, command recorder and vertex buffer
//! against a headless surface. Skips when no Vulkan driver or no
//! `VK_EXT_headless_surface` is available.

use std::sync::Arc;

use viewer_platform::{HEADLESS_SURFACE_EXTENSIONS, Surface};
use viewer_renderer::command_recorder::RecordedBuild;
use viewer_renderer::shaders::ShaderSet;
use viewer_renderer::viewer::{APP_NAME, TRIANGLE};
use viewer_renderer::{CommandRecorder, RhiError, SwapchainManager, vk};
use viewer_rhi::buffer::Buffer;
use viewer_rhi::device::Device;
use viewer_rhi::instance::Instance;
use viewer_rhi::physical_device::select_physical_device;
use viewer_rhi::swapchain::SwapchainPreferences;

const CLEAR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Field order is drop order: device, surface, instance.
struct Headless {
    device: Arc<Device>,
    queue_family: u32,
    surface: Surface,
    instance: Instance,
}

fn headless() -> Option<Headless> {
    let extensions = HEADLESS_SURFACE_EXTENSIONS.map(|name| name.as_ptr());
    let instance = match Instance::new(APP_NAME, false, &extensions) {
        Ok(instance) => instance,
        Err(e) if e.is_unavailable() => {
            eprintln!("Skipping test: Vulkan not available ({e})");
            return None;
        }
        Err(e) => panic!("Unexpected error: {:?}", e),
    };

    let surface = match Surface::headless(instance.entry(), instance.handle()) {
        Ok(surface) => surface,
        Err(e) => {
            eprintln!("Skipping test: headless surface not available ({e})");
            return None;
        }
    };

    let physical_device =
        match select_physical_device(instance.handle(), surface.handle(), surface.loader()) {
            Ok(info) => info,
            Err(e) if e.is_unavailable() => {
                eprintln!("Skipping test: no GPU can present headless ({e})");
                return None;
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        };

    let queue_family = physical_device.queue_family().unwrap();
    let device = Device::new(&instance, &physical_device).unwrap();

    Some(Headless {
        device,
        queue_family,
        surface,
        instance,
    })
}

fn manager(gpu: &Headless) -> SwapchainManager {
    let shaders = ShaderSet::load(gpu.device.clone(), None).unwrap();
    SwapchainManager::new(
        &gpu.instance,
        gpu.device.clone(),
        &gpu.surface,
        SwapchainPreferences::default(),
        shaders,
    )
}

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

#[test]
fn test_manager_build_teardown_rebuild() {
    let Some(gpu) = headless() else { return };
    let mut manager = manager(&gpu);

    assert!(!manager.is_built());
    assert!(manager.record_target().is_err());

    let expected = manager.resolve_extent(extent(640, 480)).unwrap();
    manager.build(extent(640, 480)).unwrap();
    assert!(manager.is_built());
    assert_eq!(manager.extent(), Some(expected));

    let image_count = manager.image_count().unwrap();
    assert!(image_count > 0);
    let target = manager.record_target().unwrap();
    assert_eq!(target.framebuffers.len(), image_count as usize);
    assert_eq!(target.extent, expected);

    assert!(matches!(
        manager.build(extent(640, 480)),
        Err(RhiError::SwapchainError(_))
    ));

    manager.teardown();
    assert!(!manager.is_built());
    assert_eq!(manager.extent(), None);
    assert_eq!(manager.image_count(), None);
    assert!(manager.record_target().is_err());
    manager.teardown();

    for i in 0..20 {
        let requested = if i % 2 == 0 {
            extent(800, 600)
        } else {
            extent(640, 480)
        };
        let expected = manager.resolve_extent(requested).unwrap();

        manager.rebuild(requested).unwrap();

        let target = manager.record_target().unwrap();
        assert_eq!(target.extent, expected);
        assert_eq!(
            target.framebuffers.len(),
            manager.image_count().unwrap() as usize
        );
        assert!(
            target
                .framebuffers
                .iter()
                .all(|&fb| fb != vk::Framebuffer::null())
        );
    }
}

#[test]
fn test_recorder_follows_each_build() {
    let Some(gpu) = headless() else { return };
    let mut manager = manager(&gpu);
    manager.build(extent(640, 480)).unwrap();

    let vertex_buffer = Buffer::vertex_with_data(
        gpu.device.clone(),
        "triangle",
        bytemuck::cast_slice(&TRIANGLE),
    )
    .unwrap();
    let mut recorder = CommandRecorder::new(gpu.device.clone(), gpu.queue_family).unwrap();
    assert!(recorder.is_empty());
    assert_eq!(recorder.recorded(), None);

    let first = manager.record_target().unwrap();
    recorder
        .record_all(&first, vertex_buffer.handle(), CLEAR)
        .unwrap();
    assert_eq!(
        recorder.recorded(),
        Some(RecordedBuild {
            extent: first.extent,
            image_count: first.framebuffers.len(),
        })
    );
    assert_eq!(recorder.len(), first.framebuffers.len());
    assert!(
        recorder
            .command_buffer(first.framebuffers.len() as u32)
            .is_err()
    );

    // Released before the build they point at goes away.
    gpu.device.wait_idle().unwrap();
    recorder.release();
    assert_eq!(recorder.recorded(), None);
    assert!(recorder.command_buffer(0).is_err());

    manager.rebuild(extent(800, 600)).unwrap();
    let second = manager.record_target().unwrap();
    assert_ne!(first.extent, second.extent);

    recorder
        .record_all(&second, vertex_buffer.handle(), CLEAR)
        .unwrap();
    assert_eq!(recorder.recorded().unwrap().extent, second.extent);
    assert_eq!(recorder.len(), second.framebuffers.len());

    // Re-recording over a live set replaces it.
    recorder
        .record_all(&second, vertex_buffer.handle(), CLEAR)
        .unwrap();
    assert_eq!(recorder.len(), second.framebuffers.len());
    assert!(recorder.command_buffer(0).is_ok());

    recorder.teardown();
    assert!(recorder.is_empty());
    assert_eq!(recorder.recorded(), None);
    assert!(matches!(
        recorder.record_all(&second, vertex_buffer.handle(), CLEAR),
        Err(RhiError::CommandError(_))
    ));
}

#[test]
fn test_vertex_buffer_bounds() {
    let Some(gpu) = headless() else { return };

    let bytes: &[u8] = bytemuck::cast_slice(&TRIANGLE);
    let buffer = Buffer::vertex_with_data(gpu.device.clone(), "triangle", bytes).unwrap();
    assert_eq!(buffer.size(), bytes.len() as vk::DeviceSize);
    assert_ne!(buffer.handle(), vk::Buffer::null());

    assert!(buffer.write_data(0, &[]).is_ok());
    assert!(buffer.write_data(56, &[0u8; 4]).is_ok());
    assert!(matches!(
        buffer.write_data(56, &[0u8; 8]),
        Err(RhiError::InvalidHandle(_))
    ));

    assert!(Buffer::vertex_with_data(gpu.device.clone(), "empty", &[]).is_err());
}
