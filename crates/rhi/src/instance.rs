//! Vulkan instance creation, validation layer and debug messenger.
//!
//! # Example
//!
//! ```no_run
//! use viewer_rhi::instance::Instance;
//!
//! // Headless instance: no surface extensions requested.
//! let instance = Instance::new("3D Viewer", cfg!(debug_assertions), &[])
//!     .expect("Failed to create Vulkan instance");
//! let _vk_instance = instance.handle();
//! ```

use std::ffi::{CStr, CString, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::{RhiError, RhiResult};

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Version reported for both the application and the engine.
const VIEWER_VERSION: u32 = vk::make_api_version(0, 1, 0, 0);

/// Vulkan instance with an optional validation layer.
///
/// The debug messenger, when present, is destroyed before the instance.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a Vulkan 1.1 instance.
    ///
    /// `surface_extensions` are the extensions the windowing system needs
    /// (see `viewer_platform::Window::required_extensions`). Validation is
    /// silently skipped when the Khronos layer is not installed.
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        surface_extensions: &[*const c_char],
    ) -> RhiResult<Self> {
        // SAFETY: Loading the Vulkan library has no preconditions beyond the
        // library itself being well-behaved.
        let entry = unsafe { Entry::load()? };

        let validation_available =
            enable_validation && Self::is_validation_layer_available(&entry)?;
        if enable_validation && !validation_available {
            warn!("Validation layer requested but not available, proceeding without it");
        }

        let name = CString::new(app_name)
            .map_err(|_| RhiError::InvalidHandle(format!("Invalid application name: {app_name:?}")))?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&name)
            .application_version(VIEWER_VERSION)
            .engine_name(&name)
            .engine_version(VIEWER_VERSION)
            .api_version(vk::API_VERSION_1_1);

        let extensions = instance_extensions(surface_extensions, validation_available);

        let layers = if validation_available {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        // SAFETY: Every pointer in create_info borrows locals alive for the call.
        let instance = unsafe { entry.create_instance(&create_info, None)? };

        info!(
            "Vulkan instance created (API 1.1, {} extension(s))",
            extensions.len()
        );

        let (debug_utils, debug_messenger) = if validation_available {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => {
                    info!("Validation layers enabled");
                    (Some(debug_utils), Some(messenger))
                }
                Err(e) => {
                    // SAFETY: Nothing else has been created from this instance yet.
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
        // SAFETY: entry is a loaded Vulkan entry point.
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };

        let found = available_layers.iter().any(|layer| {
            layer
                .layer_name_as_c_str()
                .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
        });

        Ok(found)
    }

    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> RhiResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        // SAFETY: The loader was created from a live instance.
        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };

        Ok(messenger)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        // SAFETY: All child objects (surface, device) are dropped by their owners
        // before the instance; the messenger goes first.
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Extension list for instance creation: the windowing extensions, plus
/// debug utils when validation is active. Duplicates are dropped.
pub fn instance_extensions(
    surface_extensions: &[*const c_char],
    with_debug_utils: bool,
) -> Vec<*const c_char> {
    let mut extensions: Vec<*const c_char> = Vec::with_capacity(surface_extensions.len() + 1);

    for &ext in surface_extensions {
        // SAFETY: Callers pass pointers to static, null-terminated extension names.
        let name = unsafe { CStr::from_ptr(ext) };
        let seen = extensions
            .iter()
            // SAFETY: Same provenance as above.
            .any(|&other| unsafe { CStr::from_ptr(other) } == name);
        if !seen {
            extensions.push(ext);
        }
    }

    if with_debug_utils {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    debug!("Instance extensions: {}", extensions.len());
    extensions
}

/// Forwards validation messages to `tracing`.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    // SAFETY: The driver passes a valid callback data struct for the duration
    // of the call.
    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        // SAFETY: p_message is a null-terminated string owned by the driver.
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            error!("[Vulkan {}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            warn!("[Vulkan {}] {}", type_str, message);
        }
        _ => {
            debug!("[Vulkan {}] {}", type_str, message);
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_creation_without_validation() {
        match Instance::new("3D Viewer", false, &[]) {
            Ok(instance) => assert!(!instance.has_validation()),
            Err(e) if e.is_unavailable() => {
                eprintln!("Skipping test: Vulkan not available ({e})");
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    #[test]
    fn test_instance_creation_with_validation() {
        match Instance::new("3D Viewer", true, &[]) {
            Ok(instance) => {
                if instance.has_validation() {
                    assert!(instance.debug_utils.is_some());
                }
            }
            Err(e) if e.is_unavailable() => {
                eprintln!("Skipping test: Vulkan not available ({e})");
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    #[test]
    fn test_instance_extensions_dedup() {
        let surface = ash::khr::surface::NAME.as_ptr();
        let xlib = ash::khr::xlib_surface::NAME.as_ptr();

        let extensions = instance_extensions(&[surface, xlib, surface], false);
        assert_eq!(extensions.len(), 2);
    }

    #[test]
    fn test_instance_extensions_debug_utils_appended() {
        let surface = ash::khr::surface::NAME.as_ptr();

        let extensions = instance_extensions(&[surface], true);
        assert_eq!(extensions.len(), 2);
        // SAFETY: Pointer comes from ash's static extension name.
        let last = unsafe { CStr::from_ptr(extensions[1]) };
        assert_eq!(last, ash::ext::debug_utils::NAME);
    }

    #[test]
    fn test_instance_extensions_empty() {
        assert!(instance_extensions(&[], false).is_empty());
    }

    #[test]
    fn test_interior_nul_in_app_name_rejected() {
        match Instance::new("bad\0name", false, &[]) {
            Err(RhiError::InvalidHandle(_)) => {}
            Err(e) if e.is_unavailable() => {}
            Err(e) => panic!("Unexpected error: {:?}", e),
            Ok(_) => panic!("Interior NUL must be rejected"),
        }
    }
}
