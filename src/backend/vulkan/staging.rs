//! Transient host-visible buffers used to reach device-local memory.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use super::{allocation_error, vk_error};
use crate::error::{BackendError, BackendResult};

/// A filled staging buffer. Destroyed and freed on drop, so it lives exactly
/// as long as the copy that reads from it.
pub(super) struct StagingBuffer<'a> {
    device: &'a ash::Device,
    allocator: &'a Mutex<Allocator>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
}

impl<'a> StagingBuffer<'a> {
    pub(super) fn with_data(
        device: &'a ash::Device,
        allocator: &'a Mutex<Allocator>,
        data: &[u8],
    ) -> BackendResult<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(data.len() as vk::DeviceSize)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }
            .map_err(|e| vk_error(e, BackendError::BufferCreationFailed, "staging buffer"))?;

        // From here on `Drop` owns cleanup of whatever was created.
        let mut staging = Self {
            device,
            allocator,
            buffer,
            allocation: None,
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let allocation = allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: "staging",
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(allocation_error)?;

        let allocation = staging.allocation.insert(allocation);
        unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
            .map_err(|e| vk_error(e, BackendError::BufferCreationFailed, "staging memory bind"))?;

        let mapped = allocation.mapped_slice_mut().ok_or_else(|| {
            BackendError::InvalidState("staging allocation is not host-mapped".into())
        })?;
        mapped[..data.len()].copy_from_slice(data);

        log::trace!("Vulkan: staging buffer filled ({} bytes)", data.len());
        Ok(staging)
    }

    pub(super) fn buffer(&self) -> vk::Buffer {
        self.buffer
    }
}

impl Drop for StagingBuffer<'_> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.allocator.lock().free(allocation) {
                log::error!("Failed to free staging allocation: {}", e);
            }
        }
        log::trace!("Vulkan: staging buffer released");
    }
}
