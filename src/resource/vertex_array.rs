use super::{ensure_backend, log_created, GpuResource, ResourceHandle};
use crate::backend::{BackendKind, BufferId, GpuBackend, VertexArrayId};
use crate::diagnostics::Diagnostics;
use crate::error::{BackendResult, Result};
use crate::mesh::VertexLayout;

/// Vertex array object tying a vertex buffer, an index buffer and a layout
/// together.
#[derive(Debug)]
pub struct VertexArray {
    handle: ResourceHandle<VertexArrayId>,
    backend: BackendKind,
    buffers: Option<(BufferId, BufferId)>,
}

impl VertexArray {
    pub fn create(backend: &mut dyn GpuBackend, label: &str, diag: &Diagnostics) -> Result<Self> {
        let id = backend.create_vertex_array(label)?;
        log_created(diag, label, id);
        Ok(Self {
            handle: ResourceHandle::new(id, label),
            backend: backend.kind(),
            buffers: None,
        })
    }

    /// Point the array at `vbo`/`ebo`. May be called again when the buffers
    /// are replaced; the array itself keeps its id.
    pub fn attach(
        &mut self,
        backend: &mut dyn GpuBackend,
        vbo: BufferId,
        ebo: BufferId,
        layout: &VertexLayout,
    ) -> Result<()> {
        let id = self.handle.ensure_alive()?;
        ensure_backend(self.backend, backend, self.handle.label())?;
        backend.configure_vertex_array(id, vbo, ebo, layout)?;
        self.buffers = Some((vbo, ebo));
        Ok(())
    }

    pub fn bind(&self, backend: &mut dyn GpuBackend) -> Result<()> {
        let id = self.handle.ensure_alive()?;
        ensure_backend(self.backend, backend, self.handle.label())?;
        backend.bind_vertex_array(Some(id))?;
        Ok(())
    }

    pub fn is_bound(&self, backend: &dyn GpuBackend) -> bool {
        !self.handle.is_destroyed() && backend.bound_vertex_array() == Some(self.handle.id())
    }

    /// `(vertex buffer, index buffer)` once attached.
    pub fn buffers(&self) -> Option<(BufferId, BufferId)> {
        self.buffers
    }
}

impl GpuResource for VertexArray {
    type Id = VertexArrayId;

    fn handle(&self) -> &ResourceHandle<VertexArrayId> {
        &self.handle
    }

    fn handle_mut(&mut self) -> &mut ResourceHandle<VertexArrayId> {
        &mut self.handle
    }

    fn release(&mut self, backend: &mut dyn GpuBackend) -> BackendResult<()> {
        backend.destroy_vertex_array(self.handle.id())
    }
}
