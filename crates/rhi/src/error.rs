//! RHI error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load the Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// A thread panicked while holding the allocator lock.
    #[error("Allocator lock poisoned")]
    AllocatorPoisoned,

    #[error("No suitable GPU found")]
    NoSuitableGpu,

    #[error("Shader error: {0}")]
    ShaderError(String),

    #[error("Surface error: {0}")]
    SurfaceError(String),

    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// The surface resolves to a zero-area extent (typically minimized).
    #[error("Surface extent has zero area: {width}x{height}")]
    ZeroExtent { width: u32, height: u32 },

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// Command buffer recording or submission error
    #[error("Command error: {0}")]
    CommandError(String),
}

impl RhiError {
    /// Errors meaning "no usable Vulkan on this machine" rather than misuse.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RhiError::LoadingError(_)
                | RhiError::NoSuitableGpu
                | RhiError::VulkanError(
                    ash::vk::Result::ERROR_INCOMPATIBLE_DRIVER
                        | ash::vk::Result::ERROR_INITIALIZATION_FAILED
                        | ash::vk::Result::ERROR_EXTENSION_NOT_PRESENT
                )
        )
    }

    /// Whether this error means "wait for the surface to grow" rather than a
    /// failure.
    #[inline]
    pub fn is_zero_extent(&self) -> bool {
        matches!(self, RhiError::ZeroExtent { .. })
    }
}

pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn test_vk_result_converts() {
        let err: RhiError = vk::Result::ERROR_OUT_OF_DATE_KHR.into();
        assert!(matches!(
            err,
            RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DATE_KHR)
        ));
    }

    #[test]
    fn test_unavailable_classification() {
        assert!(RhiError::NoSuitableGpu.is_unavailable());
        assert!(RhiError::VulkanError(vk::Result::ERROR_INCOMPATIBLE_DRIVER).is_unavailable());
        assert!(!RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST).is_unavailable());
        assert!(!RhiError::AllocatorPoisoned.is_unavailable());
    }

    #[test]
    fn test_zero_extent_is_not_unavailable() {
        let err = RhiError::ZeroExtent {
            width: 0,
            height: 0,
        };
        assert!(err.is_zero_extent());
        assert!(!err.is_unavailable());
        assert!(!RhiError::SwapchainError("x".to_string()).is_zero_extent());
    }
}
