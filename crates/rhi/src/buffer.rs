//! Buffers backed by gpu-allocator memory.
//!
//! The viewer only needs host-visible vertex data written once at startup,
//! so buffers are created in `CpuToGpu` memory and written through the
//! persistent mapping gpu-allocator provides.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Buffer plus its allocation. Not thread-safe.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    name: &'static str,
}

impl Buffer {
    /// Creates an exclusive buffer of `size` bytes and binds fresh memory
    /// from `location`.
    pub fn new(
        device: Arc<Device>,
        name: &'static str,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        size: vk::DeviceSize,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: The device is alive and buffer_info is fully initialized.
        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };

        // From here on Drop releases whatever has been created.
        let mut this = Self {
            device,
            buffer,
            allocation: None,
            size,
            name,
        };

        // SAFETY: buffer was just created on this device.
        let requirements = unsafe {
            this.device
                .handle()
                .get_buffer_memory_requirements(this.buffer)
        };

        let allocation = this.device.lock_allocator()?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        // SAFETY: The memory handle is only used to bind this buffer while the
        // allocation is kept alive in `this`.
        let memory = unsafe { allocation.memory() };
        let offset = allocation.offset();
        this.allocation = Some(allocation);

        // SAFETY: The allocation satisfies the buffer's requirements and is not
        // bound to anything else.
        unsafe {
            this.device
                .handle()
                .bind_buffer_memory(this.buffer, memory, offset)?;
        }

        debug!("Created {} buffer: {} bytes", name, size);

        Ok(this)
    }

    /// Host-visible vertex buffer initialized with `data`.
    pub fn vertex_with_data(device: Arc<Device>, name: &'static str, data: &[u8]) -> RhiResult<Self> {
        let buffer = Self::new(
            device,
            name,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            MemoryLocation::CpuToGpu,
            data.len() as vk::DeviceSize,
        )?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    /// Copies `data` into the mapped memory at `offset`.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidHandle(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                self.size
            )));
        }

        let allocation = self.allocation.as_ref().ok_or_else(|| {
            RhiError::InvalidHandle("Buffer allocation is not available".to_string())
        })?;

        let mapped_ptr = allocation
            .mapped_ptr()
            .ok_or_else(|| RhiError::InvalidHandle("Buffer memory is not mapped".to_string()))?;

        // SAFETY: The range [offset, end) was bounds-checked against the
        // allocation size and the mapping stays valid while the allocation lives.
        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.lock_allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free {} buffer allocation: {:?}", self.name, e);
                    }
                }
                Err(e) => error!("Leaking {} buffer allocation: {}", self.name, e),
            }
        }

        // SAFETY: No pending command buffer references the buffer; the owner
        // waits for device idle first.
        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }
        debug!("Destroyed {} buffer", self.name);
    }
}
