//! Core backend abstraction trait
//!
//! The OpenGL and Vulkan backends, and the in-memory dummy, implement the same
//! contract. The trait is object safe so a context can hold `Box<dyn GpuBackend>`.

use crate::backend::types::*;
use crate::error::BackendResult;
use crate::mesh::VertexLayout;
use crate::uniform::UniformValue;

/// Main graphics backend trait
pub trait GpuBackend {
    fn kind(&self) -> BackendKind;

    /// Human-readable backend name, used in diagnostics.
    fn name(&self) -> &str {
        self.kind().name()
    }

    // Buffers

    /// Create a buffer; Vulkan also allocates and binds its memory.
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferId>;

    /// Write bytes straight into a buffer at `offset`.
    ///
    /// Only valid for client-writable storage: every OpenGL buffer, and Vulkan
    /// buffers allocated with host-visible memory.
    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> BackendResult<()>;

    /// Write bytes through a transient staging buffer and a GPU-side copy.
    fn write_buffer_staged(
        &mut self,
        buffer: BufferId,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()>;

    fn destroy_buffer(&mut self, buffer: BufferId) -> BackendResult<()>;

    // Textures

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureId>;

    /// Replace the full contents of a texture.
    fn write_texture(&mut self, texture: TextureId, data: &[u8]) -> BackendResult<()>;

    fn destroy_texture(&mut self, texture: TextureId) -> BackendResult<()>;

    // Shader programs

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramId>;

    fn set_uniform(
        &mut self,
        program: ProgramId,
        name: &str,
        value: &UniformValue,
    ) -> BackendResult<()>;

    fn destroy_program(&mut self, program: ProgramId) -> BackendResult<()>;

    // Vertex arrays

    fn create_vertex_array(&mut self, label: &str) -> BackendResult<VertexArrayId>;

    /// Point a vertex array at its vertex and index buffers.
    fn configure_vertex_array(
        &mut self,
        vao: VertexArrayId,
        vbo: BufferId,
        ebo: BufferId,
        layout: &VertexLayout,
    ) -> BackendResult<()>;

    fn bind_vertex_array(&mut self, vao: Option<VertexArrayId>) -> BackendResult<()>;

    /// The vertex array draws currently read from.
    fn bound_vertex_array(&self) -> Option<VertexArrayId>;

    fn destroy_vertex_array(&mut self, vao: VertexArrayId) -> BackendResult<()>;

    // Drawing

    /// Indexed triangle draw of `index_count` `u32` indices from the bound vertex array.
    fn draw_indexed(&mut self, index_count: u32) -> BackendResult<()>;
}

impl<B: GpuBackend + ?Sized> GpuBackend for Box<B> {
    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferId> {
        (**self).create_buffer(desc)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> BackendResult<()> {
        (**self).write_buffer(buffer, offset, data)
    }

    fn write_buffer_staged(
        &mut self,
        buffer: BufferId,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        (**self).write_buffer_staged(buffer, offset, data)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) -> BackendResult<()> {
        (**self).destroy_buffer(buffer)
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureId> {
        (**self).create_texture(desc)
    }

    fn write_texture(&mut self, texture: TextureId, data: &[u8]) -> BackendResult<()> {
        (**self).write_texture(texture, data)
    }

    fn destroy_texture(&mut self, texture: TextureId) -> BackendResult<()> {
        (**self).destroy_texture(texture)
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramId> {
        (**self).create_program(desc)
    }

    fn set_uniform(
        &mut self,
        program: ProgramId,
        name: &str,
        value: &UniformValue,
    ) -> BackendResult<()> {
        (**self).set_uniform(program, name, value)
    }

    fn destroy_program(&mut self, program: ProgramId) -> BackendResult<()> {
        (**self).destroy_program(program)
    }

    fn create_vertex_array(&mut self, label: &str) -> BackendResult<VertexArrayId> {
        (**self).create_vertex_array(label)
    }

    fn configure_vertex_array(
        &mut self,
        vao: VertexArrayId,
        vbo: BufferId,
        ebo: BufferId,
        layout: &VertexLayout,
    ) -> BackendResult<()> {
        (**self).configure_vertex_array(vao, vbo, ebo, layout)
    }

    fn bind_vertex_array(&mut self, vao: Option<VertexArrayId>) -> BackendResult<()> {
        (**self).bind_vertex_array(vao)
    }

    fn bound_vertex_array(&self) -> Option<VertexArrayId> {
        (**self).bound_vertex_array()
    }

    fn destroy_vertex_array(&mut self, vao: VertexArrayId) -> BackendResult<()> {
        (**self).destroy_vertex_array(vao)
    }

    fn draw_indexed(&mut self, index_count: u32) -> BackendResult<()> {
        (**self).draw_indexed(index_count)
    }
}
