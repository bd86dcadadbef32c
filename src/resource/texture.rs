use std::io::Read;

use super::{ensure_backend, log_created, GpuResource, ResourceHandle};
use crate::backend::{BackendKind, GpuBackend, TextureDescriptor, TextureId};
use crate::diagnostics::Diagnostics;
use crate::error::{checked_cast, BackendResult, LifecycleError, Result};

/// A 2D texture.
#[derive(Debug)]
pub struct Texture {
    handle: ResourceHandle<TextureId>,
    backend: BackendKind,
    desc: TextureDescriptor,
}

impl Texture {
    pub fn create(
        backend: &mut dyn GpuBackend,
        desc: TextureDescriptor,
        diag: &Diagnostics,
    ) -> Result<Self> {
        let id = backend.create_texture(&desc)?;
        log_created(diag, &desc.label, id);
        Ok(Self {
            handle: ResourceHandle::new(id, desc.label.clone()),
            backend: backend.kind(),
            desc,
        })
    }

    /// Create a texture and fill it with exactly one full image read from `reader`.
    pub fn create_from_stream<R: Read>(
        backend: &mut dyn GpuBackend,
        desc: TextureDescriptor,
        reader: &mut R,
        diag: &Diagnostics,
    ) -> Result<Self> {
        let len: usize = checked_cast(desc.byte_size(), "usize")?;
        let mut pixels = vec![0; len];
        reader.read_exact(&mut pixels)?;

        let texture = Self::create(backend, desc, diag)?;
        texture.upload(backend, &pixels)?;
        Ok(texture)
    }

    /// Replace the full image.
    pub fn upload(&self, backend: &mut dyn GpuBackend, pixels: &[u8]) -> Result<()> {
        let id = self.handle.ensure_alive()?;
        ensure_backend(self.backend, backend, self.handle.label())?;

        let expected = self.desc.byte_size();
        let len = checked_cast::<usize, u64>(pixels.len(), "u64")?;
        if len != expected {
            return Err(LifecycleError::OutOfRange {
                label: self.desc.label.clone(),
                offset: 0,
                len,
                size: expected,
            });
        }
        backend.write_texture(id, pixels)?;
        Ok(())
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.desc
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }
}

impl GpuResource for Texture {
    type Id = TextureId;

    fn handle(&self) -> &ResourceHandle<TextureId> {
        &self.handle
    }

    fn handle_mut(&mut self) -> &mut ResourceHandle<TextureId> {
        &mut self.handle
    }

    fn release(&mut self, backend: &mut dyn GpuBackend) -> BackendResult<()> {
        backend.destroy_texture(self.handle.id())
    }
}
