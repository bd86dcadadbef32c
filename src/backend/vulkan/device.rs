//! Headless instance, device and allocator setup.

use std::ffi::CStr;

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};

use crate::error::BackendError;

/// No surface is created, so 1.2 is enough everywhere including MoltenVK.
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

pub(super) fn create_instance(entry: &ash::Entry) -> Result<ash::Instance, BackendError> {
    let app_info = vk::ApplicationInfo::default()
        .application_name(c"gfx-lifecycle")
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"gfx-lifecycle")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    #[allow(unused_mut)]
    let mut extensions: Vec<*const std::ffi::c_char> = Vec::new();
    #[allow(unused_mut)]
    let mut create_flags = vk::InstanceCreateFlags::empty();

    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions);

    unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })
}

/// Pick a GPU, preferring discrete over integrated.
pub(super) fn select_physical_device(
    instance: &ash::Instance,
) -> Result<vk::PhysicalDevice, BackendError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        BackendError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        ))
    })?;

    let mut best = None;
    let mut best_score = 0;
    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let score = match properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            _ => 1,
        };

        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!(
            "Found GPU: {:?} (type: {:?}, score: {})",
            name,
            properties.device_type,
            score
        );

        if score > best_score {
            best_score = score;
            best = Some(device);
        }
    }

    best.ok_or_else(|| BackendError::InitializationFailed("No Vulkan-capable GPU found".into()))
}

pub(super) fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<u32, BackendError> {
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .and_then(|index| u32::try_from(index).ok())
        .ok_or_else(|| BackendError::InitializationFailed("No graphics queue family found".into()))
}

pub(super) fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<ash::Device, BackendError> {
    let priorities = [1.0f32];
    let queue_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(&priorities)];

    let create_info = vk::DeviceCreateInfo::default().queue_create_infos(&queue_infos);

    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
    })
}

/// Command pool for one-shot transfer submissions.
pub(super) fn create_command_pool(
    device: &ash::Device,
    queue_family: u32,
) -> Result<vk::CommandPool, BackendError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to create command pool: {:?}", e))
    })
}

pub(super) fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
) -> Result<Allocator, BackendError> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device,
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
    })
}
