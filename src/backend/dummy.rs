//! Dummy GPU backend for testing and development.
//!
//! No GPU work happens. Buffer contents are kept in host memory and every
//! call is appended to a [`BackendCall`] log, so tests can read back what was
//! uploaded and count teardown calls. The backend impersonates either
//! [`BackendKind`], including the rules that kind enforces: a Vulkan dummy
//! refuses direct writes into device-local memory, an OpenGL dummy has no
//! staging path.
//!
//! Native failures can be scheduled with [`DummyBackend::fail_after`].

use std::collections::HashMap;

use super::types::*;
use super::GpuBackend;
use crate::error::{BackendError, BackendResult};
use crate::mesh::VertexLayout;
use crate::uniform::UniformValue;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    CreateBuffer { id: BufferId, size: u64 },
    WriteBuffer { id: BufferId, offset: u64, len: u64 },
    CreateStaging { size: u64 },
    CopyStaging { dst: BufferId, offset: u64, len: u64 },
    ReleaseStaging,
    DestroyBuffer(BufferId),
    CreateTexture(TextureId),
    WriteTexture { id: TextureId, len: u64 },
    DestroyTexture(TextureId),
    CreateProgram(ProgramId),
    SetUniform { program: ProgramId, name: String },
    DestroyProgram(ProgramId),
    CreateVertexArray(VertexArrayId),
    ConfigureVertexArray { vao: VertexArrayId, vbo: BufferId, ebo: BufferId },
    BindVertexArray(Option<VertexArrayId>),
    DestroyVertexArray(VertexArrayId),
    DrawIndexed { vao: VertexArrayId, count: u32 },
}

impl BackendCall {
    /// Whether this call tears down a native object.
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            BackendCall::DestroyBuffer(_)
                | BackendCall::DestroyTexture(_)
                | BackendCall::DestroyProgram(_)
                | BackendCall::DestroyVertexArray(_)
        )
    }
}

/// A dummy call that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    CreateBuffer,
    DestroyBuffer,
    ConfigureVertexArray,
}

#[derive(Debug)]
struct DummyBuffer {
    contents: Vec<u8>,
    memory: crate::config::MemoryProperties,
}

#[derive(Debug)]
struct DummyVertexArray {
    buffers: Option<(BufferId, BufferId)>,
    stride: usize,
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    kind: BackendKind,
    buffers: HashMap<BufferId, DummyBuffer>,
    textures: HashMap<TextureId, Vec<u8>>,
    programs: HashMap<ProgramId, HashMap<String, UniformValue>>,
    vertex_arrays: HashMap<VertexArrayId, DummyVertexArray>,
    bound_vao: Option<VertexArrayId>,
    next_buffer_id: IdAllocator,
    next_texture_id: IdAllocator,
    next_program_id: IdAllocator,
    next_vao_id: IdAllocator,
    calls: Vec<BackendCall>,
    faults: Vec<(FailPoint, usize)>,
}

impl DummyBackend {
    /// Create a dummy that behaves like `kind`.
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            programs: HashMap::new(),
            vertex_arrays: HashMap::new(),
            bound_vao: None,
            next_buffer_id: IdAllocator::new(),
            next_texture_id: IdAllocator::new(),
            next_program_id: IdAllocator::new(),
            next_vao_id: IdAllocator::new(),
            calls: Vec::new(),
            faults: Vec::new(),
        }
    }

    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Make the call at `point` fail once, after `successes` more calls
    /// there have gone through.
    pub fn fail_after(&mut self, point: FailPoint, successes: usize) {
        self.faults.push((point, successes));
    }

    fn injected(&mut self, point: FailPoint) -> BackendResult<()> {
        let Some(position) = self.faults.iter().position(|(p, _)| *p == point) else {
            return Ok(());
        };
        let remaining = &mut self.faults[position].1;
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(());
        }
        self.faults.remove(position);
        log::trace!("DummyBackend: injected {point:?} failure");
        Err(BackendError::InvalidState(format!("injected {point:?} failure")))
    }

    /// Number of recorded calls that tear down a native object.
    pub fn teardown_count(&self) -> usize {
        self.calls.iter().filter(|c| c.is_teardown()).count()
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.contents.as_slice())
    }

    pub fn texture_contents(&self, texture: TextureId) -> Option<&[u8]> {
        self.textures.get(&texture).map(Vec::as_slice)
    }

    pub fn uniform(&self, program: ProgramId, name: &str) -> Option<&UniformValue> {
        self.programs.get(&program)?.get(name)
    }

    /// Vertex and index buffer a vertex array currently points at.
    pub fn vertex_array_buffers(&self, vao: VertexArrayId) -> Option<(BufferId, BufferId)> {
        self.vertex_arrays.get(&vao)?.buffers
    }

    /// Vertex stride in bytes a vertex array was configured with.
    pub fn vertex_array_stride(&self, vao: VertexArrayId) -> Option<usize> {
        self.vertex_arrays.get(&vao).map(|entry| entry.stride)
    }

    /// Count of live native objects across every kind.
    pub fn live_objects(&self) -> usize {
        self.buffers.len() + self.textures.len() + self.programs.len() + self.vertex_arrays.len()
    }

    fn buffer_mut(&mut self, id: BufferId) -> BackendResult<&mut DummyBuffer> {
        self.buffers.get_mut(&id).ok_or(BackendError::UnknownHandle {
            kind: BufferId::KIND,
            id: id.raw(),
        })
    }

    fn check_range(buffer: &DummyBuffer, id: BufferId, offset: u64, len: usize) -> BackendResult<usize> {
        let start = usize::try_from(offset)
            .map_err(|_| BackendError::InvalidState(format!("offset {offset} out of range")))?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= buffer.contents.len())
            .ok_or_else(|| {
                BackendError::InvalidState(format!(
                    "write of {len} bytes at {offset} overruns {id} of {} bytes",
                    buffer.contents.len()
                ))
            })?;
        Ok(end)
    }
}

impl GpuBackend for DummyBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn name(&self) -> &str {
        match self.kind {
            BackendKind::Gl => "Dummy (OpenGL)",
            BackendKind::Vulkan => "Dummy (Vulkan)",
        }
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferId> {
        self.injected(FailPoint::CreateBuffer)?;
        let len = usize::try_from(desc.size)
            .map_err(|_| BackendError::BufferCreationFailed(format!("size {} too large", desc.size)))?;
        let id = BufferId(self.next_buffer_id.next());
        log::trace!("DummyBackend: creating buffer '{}' ({id}, size: {})", desc.label, desc.size);
        self.buffers.insert(
            id,
            DummyBuffer {
                contents: vec![0; len],
                memory: desc.memory,
            },
        );
        self.calls.push(BackendCall::CreateBuffer { id, size: desc.size });
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> BackendResult<()> {
        let kind = self.kind;
        let target = self.buffer_mut(buffer)?;
        if kind == BackendKind::Vulkan && !target.memory.is_host_writable() {
            return Err(BackendError::InvalidState(format!(
                "{buffer} is device-local and cannot be written directly"
            )));
        }
        let end = Self::check_range(target, buffer, offset, data.len())?;
        let start = end - data.len();
        target.contents[start..end].copy_from_slice(data);
        self.calls.push(BackendCall::WriteBuffer {
            id: buffer,
            offset,
            len: data.len() as u64,
        });
        Ok(())
    }

    fn write_buffer_staged(
        &mut self,
        buffer: BufferId,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        if self.kind == BackendKind::Gl {
            return Err(BackendError::FeatureNotSupported(
                "OpenGL buffers are written directly".to_string(),
            ));
        }
        let target = self.buffer_mut(buffer)?;
        let end = Self::check_range(target, buffer, offset, data.len())?;
        let start = end - data.len();
        target.contents[start..end].copy_from_slice(data);

        let len = data.len() as u64;
        self.calls.push(BackendCall::CreateStaging { size: len });
        self.calls.push(BackendCall::CopyStaging {
            dst: buffer,
            offset,
            len,
        });
        self.calls.push(BackendCall::ReleaseStaging);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) -> BackendResult<()> {
        self.injected(FailPoint::DestroyBuffer)?;
        self.buffers.remove(&buffer).ok_or(BackendError::UnknownHandle {
            kind: BufferId::KIND,
            id: buffer.raw(),
        })?;
        log::trace!("DummyBackend: destroyed {buffer}");
        self.calls.push(BackendCall::DestroyBuffer(buffer));
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureId> {
        let len = usize::try_from(desc.byte_size())
            .map_err(|_| BackendError::TextureCreationFailed(format!("'{}' too large", desc.label)))?;
        let id = TextureId(self.next_texture_id.next());
        log::trace!(
            "DummyBackend: creating texture '{}' ({}x{})",
            desc.label,
            desc.width,
            desc.height
        );
        self.textures.insert(id, vec![0; len]);
        self.calls.push(BackendCall::CreateTexture(id));
        Ok(id)
    }

    fn write_texture(&mut self, texture: TextureId, data: &[u8]) -> BackendResult<()> {
        let contents = self.textures.get_mut(&texture).ok_or(BackendError::UnknownHandle {
            kind: TextureId::KIND,
            id: texture.raw(),
        })?;
        if contents.len() != data.len() {
            return Err(BackendError::InvalidState(format!(
                "{texture} expects {} bytes, got {}",
                contents.len(),
                data.len()
            )));
        }
        contents.copy_from_slice(data);
        self.calls.push(BackendCall::WriteTexture {
            id: texture,
            len: data.len() as u64,
        });
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) -> BackendResult<()> {
        self.textures.remove(&texture).ok_or(BackendError::UnknownHandle {
            kind: TextureId::KIND,
            id: texture.raw(),
        })?;
        self.calls.push(BackendCall::DestroyTexture(texture));
        Ok(())
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramId> {
        if desc.source.backend() != self.kind {
            return Err(BackendError::ShaderCreationFailed(format!(
                "'{}' carries {} shaders, backend is {}",
                desc.label,
                desc.source.backend(),
                self.kind
            )));
        }
        let id = ProgramId(self.next_program_id.next());
        self.programs.insert(id, HashMap::new());
        self.calls.push(BackendCall::CreateProgram(id));
        Ok(id)
    }

    fn set_uniform(
        &mut self,
        program: ProgramId,
        name: &str,
        value: &UniformValue,
    ) -> BackendResult<()> {
        let uniforms = self.programs.get_mut(&program).ok_or(BackendError::UnknownHandle {
            kind: ProgramId::KIND,
            id: program.raw(),
        })?;
        uniforms.insert(name.to_string(), *value);
        self.calls.push(BackendCall::SetUniform {
            program,
            name: name.to_string(),
        });
        Ok(())
    }

    fn destroy_program(&mut self, program: ProgramId) -> BackendResult<()> {
        self.programs.remove(&program).ok_or(BackendError::UnknownHandle {
            kind: ProgramId::KIND,
            id: program.raw(),
        })?;
        self.calls.push(BackendCall::DestroyProgram(program));
        Ok(())
    }

    fn create_vertex_array(&mut self, label: &str) -> BackendResult<VertexArrayId> {
        let id = VertexArrayId(self.next_vao_id.next());
        log::trace!("DummyBackend: creating vertex array '{label}' ({id})");
        self.vertex_arrays.insert(
            id,
            DummyVertexArray {
                buffers: None,
                stride: 0,
            },
        );
        self.calls.push(BackendCall::CreateVertexArray(id));
        Ok(id)
    }

    fn configure_vertex_array(
        &mut self,
        vao: VertexArrayId,
        vbo: BufferId,
        ebo: BufferId,
        layout: &VertexLayout,
    ) -> BackendResult<()> {
        self.injected(FailPoint::ConfigureVertexArray)?;
        for buffer in [vbo, ebo] {
            if !self.buffers.contains_key(&buffer) {
                return Err(BackendError::UnknownHandle {
                    kind: BufferId::KIND,
                    id: buffer.raw(),
                });
            }
        }
        let entry = self.vertex_arrays.get_mut(&vao).ok_or(BackendError::UnknownHandle {
            kind: VertexArrayId::KIND,
            id: vao.raw(),
        })?;
        entry.buffers = Some((vbo, ebo));
        entry.stride = layout.stride();
        self.calls.push(BackendCall::ConfigureVertexArray { vao, vbo, ebo });
        Ok(())
    }

    fn bind_vertex_array(&mut self, vao: Option<VertexArrayId>) -> BackendResult<()> {
        if let Some(id) = vao {
            if !self.vertex_arrays.contains_key(&id) {
                return Err(BackendError::UnknownHandle {
                    kind: VertexArrayId::KIND,
                    id: id.raw(),
                });
            }
        }
        self.bound_vao = vao;
        self.calls.push(BackendCall::BindVertexArray(vao));
        Ok(())
    }

    fn bound_vertex_array(&self) -> Option<VertexArrayId> {
        self.bound_vao
    }

    fn destroy_vertex_array(&mut self, vao: VertexArrayId) -> BackendResult<()> {
        self.vertex_arrays.remove(&vao).ok_or(BackendError::UnknownHandle {
            kind: VertexArrayId::KIND,
            id: vao.raw(),
        })?;
        if self.bound_vao == Some(vao) {
            self.bound_vao = None;
        }
        self.calls.push(BackendCall::DestroyVertexArray(vao));
        Ok(())
    }

    fn draw_indexed(&mut self, index_count: u32) -> BackendResult<()> {
        let vao = self
            .bound_vao
            .ok_or_else(|| BackendError::InvalidState("no vertex array bound".to_string()))?;
        let configured = self
            .vertex_arrays
            .get(&vao)
            .and_then(|entry| entry.buffers)
            .is_some();
        if !configured {
            return Err(BackendError::InvalidState(format!(
                "{vao} has no buffers attached"
            )));
        }
        self.calls.push(BackendCall::DrawIndexed {
            vao,
            count: index_count,
        });
        Ok(())
    }
}
