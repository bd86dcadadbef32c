use super::{ensure_backend, log_created, GpuResource, ResourceHandle};
use crate::backend::{BackendKind, GpuBackend, ProgramDescriptor, ProgramId};
use crate::diagnostics::Diagnostics;
use crate::error::{BackendResult, Result};
use crate::uniform::UniformValue;

/// A linked vertex + fragment shader program.
#[derive(Debug)]
pub struct ShaderProgram {
    handle: ResourceHandle<ProgramId>,
    backend: BackendKind,
}

impl ShaderProgram {
    /// Compile and link. Sources written for another backend are rejected
    /// before the driver sees them.
    pub fn create(
        backend: &mut dyn GpuBackend,
        desc: &ProgramDescriptor,
        diag: &Diagnostics,
    ) -> Result<Self> {
        ensure_backend(desc.source.backend(), backend, &desc.label)?;
        let id = backend.create_program(desc)?;
        log_created(diag, &desc.label, id);
        Ok(Self {
            handle: ResourceHandle::new(id, desc.label.clone()),
            backend: backend.kind(),
        })
    }

    pub fn set_uniform(
        &self,
        backend: &mut dyn GpuBackend,
        name: &str,
        value: impl Into<UniformValue>,
    ) -> Result<()> {
        let id = self.handle.ensure_alive()?;
        ensure_backend(self.backend, backend, self.handle.label())?;
        backend.set_uniform(id, name, &value.into())?;
        Ok(())
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }
}

impl GpuResource for ShaderProgram {
    type Id = ProgramId;

    fn handle(&self) -> &ResourceHandle<ProgramId> {
        &self.handle
    }

    fn handle_mut(&mut self) -> &mut ResourceHandle<ProgramId> {
        &mut self.handle
    }

    fn release(&mut self, backend: &mut dyn GpuBackend) -> BackendResult<()> {
        backend.destroy_program(self.handle.id())
    }
}
