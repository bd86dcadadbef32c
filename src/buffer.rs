//! Backend-agnostic GPU buffer.
//!
//! OpenGL buffers, and Vulkan buffers in host-visible memory, are written in
//! place. Vulkan buffers in device-local memory are not CPU-writable and go
//! through a transient staging buffer plus a GPU-side copy.

use std::io::Read;

use bytemuck::Pod;

use crate::backend::{BackendKind, BufferDescriptor, BufferId, GpuBackend, UploadPath};
use crate::config::{BufferUsage, MemoryProperties, StorageMode};
use crate::diagnostics::Diagnostics;
use crate::error::{checked_cast, BackendResult, LifecycleError, Result};
use crate::resource::{ensure_backend, log_created, GpuResource, ResourceHandle};

#[derive(Debug)]
pub struct BufferObject {
    handle: ResourceHandle<BufferId>,
    backend: BackendKind,
    size: u64,
    usage: BufferUsage,
    storage: StorageMode,
    memory: MemoryProperties,
}

impl BufferObject {
    /// Allocate a buffer of `desc.size` bytes. On Vulkan the memory is
    /// allocated and bound 1:1 with the buffer.
    pub fn create(
        backend: &mut dyn GpuBackend,
        desc: &BufferDescriptor,
        diag: &Diagnostics,
    ) -> Result<Self> {
        let id = backend.create_buffer(desc)?;
        log_created(diag, &desc.label, id);
        Ok(Self {
            handle: ResourceHandle::new(id, desc.label.clone()),
            backend: backend.kind(),
            size: desc.size,
            usage: desc.usage,
            storage: desc.storage,
            memory: desc.memory,
        })
    }

    /// Create a buffer holding everything `reader` yields.
    ///
    /// The buffer is at least `desc.size` bytes and grows to fit the stream.
    pub fn create_from_stream<R: Read>(
        backend: &mut dyn GpuBackend,
        desc: &BufferDescriptor,
        reader: &mut R,
        diag: &Diagnostics,
    ) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;

        let len: u64 = checked_cast(bytes.len(), "u64")?;
        let mut desc = desc.clone();
        desc.size = desc.size.max(len);

        let buffer = Self::create(backend, &desc, diag)?;
        buffer.copy(backend, &bytes, 0)?;
        Ok(buffer)
    }

    /// How [`copy`](Self::copy) reaches this buffer.
    pub fn upload_path(&self) -> UploadPath {
        match self.backend {
            BackendKind::Gl => UploadPath::Direct,
            BackendKind::Vulkan if self.memory.is_host_writable() => UploadPath::Direct,
            BackendKind::Vulkan => UploadPath::Staged,
        }
    }

    /// Write `data` at byte `offset`.
    ///
    /// Fails with `IllegalState` when the active backend is not the one the
    /// buffer was created for, and with `OutOfRange`/`Overflow` instead of
    /// truncating when the write does not fit.
    pub fn copy<T: Pod>(&self, backend: &mut dyn GpuBackend, data: &[T], offset: u64) -> Result<()> {
        let id = self.handle.ensure_alive()?;
        ensure_backend(self.backend, backend, self.handle.label())?;

        let bytes: &[u8] = bytemuck::cast_slice(data);
        let len: u64 = checked_cast(bytes.len(), "u64")?;
        let end = offset.checked_add(len).ok_or(LifecycleError::Overflow {
            value: u128::from(offset) + u128::from(len),
            target: "u64",
        })?;
        if end > self.size {
            return Err(LifecycleError::OutOfRange {
                label: self.handle.label().to_string(),
                offset,
                len,
                size: self.size,
            });
        }
        if bytes.is_empty() {
            return Ok(());
        }

        match self.upload_path() {
            UploadPath::Direct => backend.write_buffer(id, offset, bytes)?,
            UploadPath::Staged => backend.write_buffer_staged(id, offset, bytes)?,
        }
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn storage(&self) -> StorageMode {
        self.storage
    }

    pub fn memory(&self) -> MemoryProperties {
        self.memory
    }
}

impl GpuResource for BufferObject {
    type Id = BufferId;

    fn handle(&self) -> &ResourceHandle<BufferId> {
        &self.handle
    }

    fn handle_mut(&mut self) -> &mut ResourceHandle<BufferId> {
        &mut self.handle
    }

    fn release(&mut self, backend: &mut dyn GpuBackend) -> BackendResult<()> {
        backend.destroy_buffer(self.handle.id())
    }
}
