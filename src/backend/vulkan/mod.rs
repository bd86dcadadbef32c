//! Vulkan backend built on `ash` and `gpu-allocator`.
//!
//! The backend is headless: it owns an instance, a device with one graphics
//! queue, and a command pool for one-shot transfers. Device-local buffers and
//! every texture are filled through [`staging::StagingBuffer`] followed by a
//! queue-side copy that completes before the call returns.
//!
//! Draws are recorded into a command buffer supplied by the caller with
//! [`VulkanBackend::set_recording_command_buffer`].

mod device;
mod staging;

use std::collections::HashMap;
use std::mem::ManuallyDrop;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::{AllocationError, MemoryLocation};
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::backend::traits::GpuBackend;
use crate::backend::types::*;
use crate::config::{BufferUsage, MemoryProperties};
use crate::error::{BackendError, BackendResult};
use crate::mesh::VertexLayout;
use crate::uniform::UniformValue;

use staging::StagingBuffer;

struct VkBuffer {
    raw: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
}

struct VkTexture {
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    desc: TextureDescriptor,
    layout: vk::ImageLayout,
}

struct VkProgram {
    vertex: vk::ShaderModule,
    fragment: vk::ShaderModule,
    /// CPU-side values, pushed by whoever builds the pipeline for this program.
    uniforms: IndexMap<String, UniformValue>,
}

#[derive(Debug, Clone, Copy, Default)]
struct VkVertexArray {
    bindings: Option<(BufferId, BufferId)>,
}

/// Vulkan implementation of [`GpuBackend`].
pub struct VulkanBackend {
    _entry: ash::Entry,
    instance: ash::Instance,
    device: ash::Device,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    /// Dropped by hand before the device is destroyed.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    ids: IdAllocator,
    buffers: HashMap<BufferId, VkBuffer>,
    textures: HashMap<TextureId, VkTexture>,
    programs: HashMap<ProgramId, VkProgram>,
    vertex_arrays: HashMap<VertexArrayId, VkVertexArray>,
    bound_vao: Option<VertexArrayId>,
    recording: Option<vk::CommandBuffer>,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("buffers", &self.buffers.len())
            .field("textures", &self.textures.len())
            .field("programs", &self.programs.len())
            .field("vertex_arrays", &self.vertex_arrays.len())
            .field("bound_vao", &self.bound_vao)
            .finish_non_exhaustive()
    }
}

fn vk_error(
    err: vk::Result,
    wrap: impl FnOnce(String) -> BackendError,
    what: &str,
) -> BackendError {
    match err {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            BackendError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        other => wrap(format!("{what}: {other:?}")),
    }
}

fn allocation_error(err: AllocationError) -> BackendError {
    match err {
        AllocationError::OutOfMemory => BackendError::OutOfMemory,
        other => BackendError::BufferCreationFailed(format!("allocation failed: {other}")),
    }
}

fn unknown<I: ResourceId>(id: I) -> BackendError {
    BackendError::UnknownHandle {
        kind: I::KIND,
        id: id.raw(),
    }
}

fn memory_location(memory: MemoryProperties) -> MemoryLocation {
    if memory.is_host_writable() {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

fn buffer_usage_flags(usage: BufferUsage, memory: MemoryProperties) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    // Device-local buffers can only be filled by a transfer.
    if usage.contains(BufferUsage::COPY_DST) || !memory.is_host_writable() {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

fn texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8 => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::R8 => vk::Format::R8_UNORM,
    }
}

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

impl VulkanBackend {
    /// Load the Vulkan loader and bring up a headless device.
    pub fn new() -> BackendResult<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            BackendError::InitializationFailed(format!("Failed to load Vulkan: {}", e))
        })?;

        let instance = device::create_instance(&entry)?;
        match Self::with_instance(entry, instance.clone()) {
            Ok(backend) => Ok(backend),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                Err(e)
            }
        }
    }

    fn with_instance(entry: ash::Entry, instance: ash::Instance) -> BackendResult<Self> {
        let physical_device = device::select_physical_device(&instance)?;
        let queue_family = device::find_graphics_queue_family(&instance, physical_device)?;
        let device = device::create_logical_device(&instance, physical_device, queue_family)?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let command_pool = match device::create_command_pool(&device, queue_family) {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };
        let allocator =
            match device::create_allocator(&instance, physical_device, device.clone()) {
                Ok(allocator) => allocator,
                Err(e) => {
                    unsafe {
                        device.destroy_command_pool(command_pool, None);
                        device.destroy_device(None);
                    }
                    return Err(e);
                }
            };

        log::info!("Vulkan backend initialized (queue family {})", queue_family);

        Ok(Self {
            _entry: entry,
            instance,
            device,
            queue,
            command_pool,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            ids: IdAllocator::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            programs: HashMap::new(),
            vertex_arrays: HashMap::new(),
            bound_vao: None,
            recording: None,
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Native buffer behind `id`, for binding outside this crate.
    pub fn raw_buffer(&self, id: BufferId) -> Option<vk::Buffer> {
        self.buffers.get(&id).map(|b| b.raw)
    }

    pub fn raw_image_view(&self, id: TextureId) -> Option<vk::ImageView> {
        self.textures.get(&id).map(|t| t.view)
    }

    /// Vertex and fragment modules of a program.
    pub fn shader_modules(&self, id: ProgramId) -> Option<(vk::ShaderModule, vk::ShaderModule)> {
        self.programs.get(&id).map(|p| (p.vertex, p.fragment))
    }

    /// Uniform values of a program packed in the order they were first set.
    pub fn uniform_block(&self, id: ProgramId) -> Option<Vec<u8>> {
        self.programs
            .get(&id)
            .map(|p| p.uniforms.values().flat_map(|v| v.to_bytes()).collect())
    }

    /// Command buffer that [`GpuBackend::draw_indexed`] records into.
    ///
    /// # Safety
    ///
    /// `cmd` must come from this device and be in the recording state for as
    /// long as it is set, and already have a compatible graphics pipeline bound
    /// before a draw is issued.
    pub unsafe fn set_recording_command_buffer(&mut self, cmd: Option<vk::CommandBuffer>) {
        self.recording = cmd;
    }

    /// Record `record` into a fresh command buffer, submit it and wait for the
    /// queue to drain.
    fn submit_once(&self, record: impl FnOnce(vk::CommandBuffer)) -> BackendResult<()> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmds = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| vk_error(e, BackendError::InvalidState, "allocate command buffer"))?;
        let cmd = cmds[0];

        let result = (|| {
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
                .map_err(|e| vk_error(e, BackendError::InvalidState, "begin command buffer"))?;

            record(cmd);

            unsafe { self.device.end_command_buffer(cmd) }
                .map_err(|e| vk_error(e, BackendError::InvalidState, "end command buffer"))?;

            let submit = vk::SubmitInfo::default().command_buffers(&cmds);
            unsafe {
                self.device
                    .queue_submit(self.queue, &[submit], vk::Fence::null())
                    .map_err(|e| vk_error(e, BackendError::InvalidState, "queue submit"))?;
                self.device
                    .queue_wait_idle(self.queue)
                    .map_err(|e| vk_error(e, BackendError::InvalidState, "queue wait"))
            }
        })();

        unsafe { self.device.free_command_buffers(self.command_pool, &cmds) };
        result
    }

    fn free_allocation(&self, allocation: Option<Allocation>, what: &str) {
        if let Some(allocation) = allocation {
            if let Err(e) = self.allocator.lock().free(allocation) {
                log::error!("Failed to free {} memory: {}", what, e);
            }
        }
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> BackendResult<Allocation> {
        self.allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(allocation_error)
    }
}

impl GpuBackend for VulkanBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Vulkan
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferId> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size.max(1))
            .usage(buffer_usage_flags(desc.usage, desc.memory))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| vk_error(e, BackendError::BufferCreationFailed, &desc.label))?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(raw) };
        let allocation =
            match self.allocate(&desc.label, requirements, memory_location(desc.memory), true) {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { self.device.destroy_buffer(raw, None) };
                    return Err(e);
                }
            };
        if let Err(e) =
            unsafe { self.device.bind_buffer_memory(raw, allocation.memory(), allocation.offset()) }
        {
            unsafe { self.device.destroy_buffer(raw, None) };
            self.free_allocation(Some(allocation), "buffer");
            return Err(vk_error(e, BackendError::BufferCreationFailed, "bind memory"));
        }

        let id = BufferId(self.ids.next());
        log::trace!(
            "Vulkan: create_buffer {} '{}' ({} bytes, {:?})",
            id,
            desc.label,
            desc.size,
            memory_location(desc.memory)
        );
        self.buffers.insert(
            id,
            VkBuffer {
                raw,
                allocation: Some(allocation),
                size: desc.size,
            },
        );
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> BackendResult<()> {
        let target = self.buffers.get_mut(&buffer).ok_or(unknown(buffer))?;
        let size = target.size;
        let mapped = target
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or_else(|| {
                BackendError::InvalidState(format!("{buffer} is not host-visible"))
            })?;

        let start = usize::try_from(offset)
            .map_err(|_| BackendError::InvalidState(format!("offset {offset} out of range")))?;
        let end = start
            .checked_add(data.len())
            .filter(|&end| end as u64 <= size)
            .ok_or_else(|| {
                BackendError::InvalidState(format!(
                    "write of {} bytes at {} overruns {} ({} bytes)",
                    data.len(),
                    offset,
                    buffer,
                    size
                ))
            })?;

        mapped[start..end].copy_from_slice(data);
        log::trace!("Vulkan: write_buffer {} ({} bytes at {})", buffer, data.len(), offset);
        Ok(())
    }

    fn write_buffer_staged(
        &mut self,
        buffer: BufferId,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        let target = self.buffers.get(&buffer).ok_or(unknown(buffer))?;
        if offset.saturating_add(data.len() as u64) > target.size {
            return Err(BackendError::InvalidState(format!(
                "staged write of {} bytes at {} overruns {} ({} bytes)",
                data.len(),
                offset,
                buffer,
                target.size
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        let dst = target.raw;

        let staging = StagingBuffer::with_data(&self.device, &self.allocator, data)?;
        let region = vk::BufferCopy::default()
            .src_offset(0)
            .dst_offset(offset)
            .size(data.len() as vk::DeviceSize);
        self.submit_once(|cmd| unsafe {
            self.device
                .cmd_copy_buffer(cmd, staging.buffer(), dst, &[region]);
        })?;
        drop(staging);

        log::trace!(
            "Vulkan: write_buffer_staged {} ({} bytes at {})",
            buffer,
            data.len(),
            offset
        );
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) -> BackendResult<()> {
        let target = self.buffers.remove(&buffer).ok_or(unknown(buffer))?;
        unsafe { self.device.destroy_buffer(target.raw, None) };
        self.free_allocation(target.allocation, "buffer");
        log::trace!("Vulkan: destroy_buffer {}", buffer);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureId> {
        let format = texture_format(desc.format);
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| vk_error(e, BackendError::TextureCreationFailed, &desc.label))?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation =
            match self.allocate(&desc.label, requirements, MemoryLocation::GpuOnly, false) {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { self.device.destroy_image(image, None) };
                    return Err(e);
                }
            };
        if let Err(e) =
            unsafe { self.device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
        {
            unsafe { self.device.destroy_image(image, None) };
            self.free_allocation(Some(allocation), "texture");
            return Err(vk_error(e, BackendError::TextureCreationFailed, "bind memory"));
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(COLOR_RANGE);
        let view = match unsafe { self.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                self.free_allocation(Some(allocation), "texture");
                return Err(vk_error(e, BackendError::TextureCreationFailed, "image view"));
            }
        };

        let id = TextureId(self.ids.next());
        log::trace!(
            "Vulkan: create_texture {} '{}' ({}x{} {:?})",
            id,
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        self.textures.insert(
            id,
            VkTexture {
                image,
                view,
                allocation: Some(allocation),
                desc: desc.clone(),
                layout: vk::ImageLayout::UNDEFINED,
            },
        );
        Ok(id)
    }

    fn write_texture(&mut self, texture: TextureId, data: &[u8]) -> BackendResult<()> {
        let target = self.textures.get(&texture).ok_or(unknown(texture))?;
        if data.len() as u64 != target.desc.byte_size() {
            return Err(BackendError::InvalidState(format!(
                "{} expects {} bytes, got {}",
                texture,
                target.desc.byte_size(),
                data.len()
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        let image = target.image;
        let old_layout = target.layout;
        let extent = vk::Extent3D {
            width: target.desc.width,
            height: target.desc.height,
            depth: 1,
        };

        let staging = StagingBuffer::with_data(&self.device, &self.allocator, data)?;
        self.submit_once(|cmd| unsafe {
            let to_transfer = vk::ImageMemoryBarrier::default()
                .old_layout(old_layout)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(COLOR_RANGE)
                .src_access_mask(vk::AccessFlags::SHADER_READ)
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE | vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );

            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(extent);
            self.device.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer(),
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            let to_shader = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(COLOR_RANGE)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ);
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_shader],
            );
        })?;
        drop(staging);

        if let Some(target) = self.textures.get_mut(&texture) {
            target.layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        }
        log::trace!("Vulkan: write_texture {} ({} bytes)", texture, data.len());
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) -> BackendResult<()> {
        let target = self.textures.remove(&texture).ok_or(unknown(texture))?;
        unsafe {
            self.device.destroy_image_view(target.view, None);
            self.device.destroy_image(target.image, None);
        }
        self.free_allocation(target.allocation, "texture");
        log::trace!("Vulkan: destroy_texture {}", texture);
        Ok(())
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramId> {
        let ShaderSource::SpirV { vertex, fragment } = &desc.source else {
            return Err(BackendError::ShaderCreationFailed(format!(
                "program '{}' is not SPIR-V",
                desc.label
            )));
        };

        let create_module = |code: &[u32], stage: &str| {
            let info = vk::ShaderModuleCreateInfo::default().code(code);
            unsafe { self.device.create_shader_module(&info, None) }.map_err(|e| {
                vk_error(
                    e,
                    BackendError::ShaderCreationFailed,
                    &format!("{} stage of '{}'", stage, desc.label),
                )
            })
        };

        let vertex = create_module(vertex, "vertex")?;
        let fragment = match create_module(fragment, "fragment") {
            Ok(module) => module,
            Err(e) => {
                unsafe { self.device.destroy_shader_module(vertex, None) };
                return Err(e);
            }
        };

        let id = ProgramId(self.ids.next());
        log::trace!("Vulkan: create_program {} '{}'", id, desc.label);
        self.programs.insert(
            id,
            VkProgram {
                vertex,
                fragment,
                uniforms: IndexMap::new(),
            },
        );
        Ok(id)
    }

    fn set_uniform(
        &mut self,
        program: ProgramId,
        name: &str,
        value: &UniformValue,
    ) -> BackendResult<()> {
        let target = self.programs.get_mut(&program).ok_or(unknown(program))?;
        if let Some(previous) = target.uniforms.get(name) {
            if previous.type_name() != value.type_name() {
                return Err(BackendError::InvalidState(format!(
                    "uniform '{}' of {} is {}, not {}",
                    name,
                    program,
                    previous.type_name(),
                    value.type_name()
                )));
            }
        }
        target.uniforms.insert(name.to_string(), *value);
        log::trace!("Vulkan: set_uniform {} {} ({})", program, name, value.type_name());
        Ok(())
    }

    fn destroy_program(&mut self, program: ProgramId) -> BackendResult<()> {
        let target = self.programs.remove(&program).ok_or(unknown(program))?;
        unsafe {
            self.device.destroy_shader_module(target.vertex, None);
            self.device.destroy_shader_module(target.fragment, None);
        }
        log::trace!("Vulkan: destroy_program {}", program);
        Ok(())
    }

    fn create_vertex_array(&mut self, label: &str) -> BackendResult<VertexArrayId> {
        let id = VertexArrayId(self.ids.next());
        log::trace!("Vulkan: create_vertex_array {} '{}'", id, label);
        self.vertex_arrays.insert(id, VkVertexArray::default());
        Ok(id)
    }

    fn configure_vertex_array(
        &mut self,
        vao: VertexArrayId,
        vbo: BufferId,
        ebo: BufferId,
        _layout: &VertexLayout,
    ) -> BackendResult<()> {
        for buffer in [vbo, ebo] {
            if !self.buffers.contains_key(&buffer) {
                return Err(unknown(buffer));
            }
        }
        let target = self.vertex_arrays.get_mut(&vao).ok_or(unknown(vao))?;
        target.bindings = Some((vbo, ebo));
        log::trace!("Vulkan: configure_vertex_array {} (vbo {}, ebo {})", vao, vbo, ebo);
        Ok(())
    }

    fn bind_vertex_array(&mut self, vao: Option<VertexArrayId>) -> BackendResult<()> {
        if let Some(id) = vao {
            if !self.vertex_arrays.contains_key(&id) {
                return Err(unknown(id));
            }
        }
        self.bound_vao = vao;
        Ok(())
    }

    fn bound_vertex_array(&self) -> Option<VertexArrayId> {
        self.bound_vao
    }

    fn destroy_vertex_array(&mut self, vao: VertexArrayId) -> BackendResult<()> {
        self.vertex_arrays.remove(&vao).ok_or(unknown(vao))?;
        if self.bound_vao == Some(vao) {
            self.bound_vao = None;
        }
        log::trace!("Vulkan: destroy_vertex_array {}", vao);
        Ok(())
    }

    fn draw_indexed(&mut self, index_count: u32) -> BackendResult<()> {
        let vao = self
            .bound_vao
            .ok_or_else(|| BackendError::InvalidState("draw with no vertex array bound".into()))?;
        let (vbo, ebo) = self
            .vertex_arrays
            .get(&vao)
            .and_then(|v| v.bindings)
            .ok_or_else(|| BackendError::InvalidState(format!("{vao} has no buffers attached")))?;
        let cmd = self.recording.ok_or_else(|| {
            BackendError::InvalidState("no command buffer is recording".into())
        })?;
        let vbo_raw = self.buffers.get(&vbo).ok_or(unknown(vbo))?.raw;
        let ebo_raw = self.buffers.get(&ebo).ok_or(unknown(ebo))?.raw;

        unsafe {
            self.device
                .cmd_bind_vertex_buffers(cmd, 0, &[vbo_raw], &[0]);
            self.device
                .cmd_bind_index_buffer(cmd, ebo_raw, 0, vk::IndexType::UINT32);
            self.device.cmd_draw_indexed(cmd, index_count, 1, 0, 0, 0);
        }
        log::trace!("Vulkan: draw_indexed {} ({} indices)", vao, index_count);
        Ok(())
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }

        let leaked = self.buffers.len() + self.textures.len() + self.programs.len();
        if leaked > 0 {
            log::warn!("Vulkan backend dropped with {} live objects; destroying them", leaked);
        }

        for (_, buffer) in std::mem::take(&mut self.buffers) {
            unsafe { self.device.destroy_buffer(buffer.raw, None) };
            self.free_allocation(buffer.allocation, "buffer");
        }
        for (_, texture) in std::mem::take(&mut self.textures) {
            unsafe {
                self.device.destroy_image_view(texture.view, None);
                self.device.destroy_image(texture.image, None);
            }
            self.free_allocation(texture.allocation, "texture");
        }
        for (_, program) in std::mem::take(&mut self.programs) {
            unsafe {
                self.device.destroy_shader_module(program.vertex, None);
                self.device.destroy_shader_module(program.fragment, None);
            }
        }

        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            // The allocator frees its memory blocks through the device.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_location_from_properties() {
        assert_eq!(
            memory_location(MemoryProperties::DEVICE_LOCAL),
            MemoryLocation::GpuOnly
        );
        assert_eq!(
            memory_location(MemoryProperties::HOST_SHARED),
            MemoryLocation::CpuToGpu
        );
    }

    #[test]
    fn test_device_local_buffers_accept_transfers() {
        let flags = buffer_usage_flags(BufferUsage::VERTEX, MemoryProperties::DEVICE_LOCAL);
        assert!(flags.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(flags.contains(vk::BufferUsageFlags::TRANSFER_DST));

        let flags = buffer_usage_flags(BufferUsage::INDEX, MemoryProperties::HOST_SHARED);
        assert_eq!(flags, vk::BufferUsageFlags::INDEX_BUFFER);
    }

    #[test]
    fn test_vk_error_mapping() {
        assert_eq!(
            vk_error(
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                BackendError::BufferCreationFailed,
                "vbo"
            ),
            BackendError::OutOfMemory
        );
        assert_eq!(
            vk_error(vk::Result::ERROR_DEVICE_LOST, BackendError::InvalidState, "submit"),
            BackendError::DeviceLost
        );
        assert!(matches!(
            vk_error(vk::Result::ERROR_UNKNOWN, BackendError::BufferCreationFailed, "vbo"),
            BackendError::BufferCreationFailed(msg) if msg.starts_with("vbo")
        ));
    }
}
