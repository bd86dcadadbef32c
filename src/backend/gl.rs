//! OpenGL backend built on `glow`.
//!
//! Every call assumes the wrapped context is current on the calling thread.
//! Buffers are always client-writable, so staged writes are rejected.

use std::collections::HashMap;
use std::sync::Arc;

use glow::{HasContext, PixelUnpackData};

use crate::backend::traits::GpuBackend;
use crate::backend::types::*;
use crate::config::StorageMode;
use crate::error::{BackendError, BackendResult};
use crate::mesh::VertexLayout;
use crate::uniform::UniformValue;

#[derive(Debug)]
struct GlBuffer {
    raw: glow::Buffer,
    size: u64,
}

#[derive(Debug)]
struct GlTexture {
    raw: glow::Texture,
    desc: TextureDescriptor,
}

/// OpenGL implementation of [`GpuBackend`].
pub struct GlBackend {
    gl: Arc<glow::Context>,
    ids: IdAllocator,
    buffers: HashMap<BufferId, GlBuffer>,
    textures: HashMap<TextureId, GlTexture>,
    programs: HashMap<ProgramId, glow::Program>,
    vertex_arrays: HashMap<VertexArrayId, glow::VertexArray>,
    bound_vao: Option<VertexArrayId>,
}

impl std::fmt::Debug for GlBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlBackend")
            .field("buffers", &self.buffers.len())
            .field("textures", &self.textures.len())
            .field("programs", &self.programs.len())
            .field("vertex_arrays", &self.vertex_arrays.len())
            .field("bound_vao", &self.bound_vao)
            .finish()
    }
}

impl GlBackend {
    /// Wrap a context created by the windowing layer.
    pub fn new(gl: Arc<glow::Context>) -> Self {
        let version = gl.version();
        log::info!(
            "OpenGL backend initialized ({}.{}, es: {})",
            version.major,
            version.minor,
            version.is_embedded
        );
        Self {
            gl,
            ids: IdAllocator::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            programs: HashMap::new(),
            vertex_arrays: HashMap::new(),
            bound_vao: None,
        }
    }

    pub fn context(&self) -> &Arc<glow::Context> {
        &self.gl
    }

    fn buffer(&self, id: BufferId) -> BackendResult<&GlBuffer> {
        self.buffers.get(&id).ok_or(unknown(id))
    }

    fn program(&self, id: ProgramId) -> BackendResult<glow::Program> {
        self.programs.get(&id).copied().ok_or(unknown(id))
    }

    fn vertex_array(&self, id: VertexArrayId) -> BackendResult<glow::VertexArray> {
        self.vertex_arrays.get(&id).copied().ok_or(unknown(id))
    }
}

fn unknown<I: ResourceId>(id: I) -> BackendError {
    BackendError::UnknownHandle {
        kind: I::KIND,
        id: id.raw(),
    }
}

fn to_i32<T>(value: T, what: &str) -> BackendResult<i32>
where
    T: Copy + std::fmt::Display,
    i32: TryFrom<T>,
{
    i32::try_from(value)
        .map_err(|_| BackendError::InvalidState(format!("{what} {value} exceeds GLsizei range")))
}

fn usage_hint(storage: StorageMode) -> u32 {
    match storage {
        StorageMode::Static => glow::STATIC_DRAW,
        StorageMode::Dynamic => glow::DYNAMIC_DRAW,
        StorageMode::Stream => glow::STREAM_DRAW,
    }
}

// GL enums passed where the API takes a GLint.
#[allow(clippy::cast_possible_wrap)]
const RGBA8_INTERNAL_FORMAT: i32 = glow::RGBA8 as i32;
#[allow(clippy::cast_possible_wrap)]
const R8_INTERNAL_FORMAT: i32 = glow::R8 as i32;
#[allow(clippy::cast_possible_wrap)]
const LINEAR_FILTER: i32 = glow::LINEAR as i32;

fn texture_formats(format: TextureFormat) -> (i32, u32) {
    match format {
        TextureFormat::Rgba8 => (RGBA8_INTERNAL_FORMAT, glow::RGBA),
        TextureFormat::R8 => (R8_INTERNAL_FORMAT, glow::RED),
    }
}

/// Compile and link a vertex + fragment pair.
///
/// # Safety
///
/// Requires a valid, current OpenGL context.
unsafe fn compile_program(
    gl: &glow::Context,
    vertex_src: &str,
    fragment_src: &str,
) -> Result<glow::Program, String> {
    let program = unsafe { gl.create_program() }?;

    let vs = unsafe { compile_shader(gl, glow::VERTEX_SHADER, vertex_src) }?;
    let fs = match unsafe { compile_shader(gl, glow::FRAGMENT_SHADER, fragment_src) } {
        Ok(fs) => fs,
        Err(err) => {
            unsafe {
                gl.delete_shader(vs);
                gl.delete_program(program);
            }
            return Err(err);
        }
    };

    unsafe {
        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        gl.link_program(program);

        if !gl.get_program_link_status(program) {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            gl.delete_shader(vs);
            gl.delete_shader(fs);
            return Err(format!("Program link error: {log}"));
        }

        gl.detach_shader(program, vs);
        gl.detach_shader(program, fs);
        gl.delete_shader(vs);
        gl.delete_shader(fs);
    }

    Ok(program)
}

/// # Safety
///
/// Requires a valid, current OpenGL context.
unsafe fn compile_shader(
    gl: &glow::Context,
    shader_type: u32,
    source: &str,
) -> Result<glow::Shader, String> {
    unsafe {
        let shader = gl.create_shader(shader_type)?;
        gl.shader_source(shader, source);
        gl.compile_shader(shader);

        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(format!("Shader compile error: {log}"));
        }

        Ok(shader)
    }
}

impl GpuBackend for GlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gl
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferId> {
        let size = to_i32(desc.size, "buffer size")?;
        let raw = unsafe {
            let raw = self
                .gl
                .create_buffer()
                .map_err(BackendError::BufferCreationFailed)?;
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(raw));
            self.gl
                .buffer_data_size(glow::ARRAY_BUFFER, size, usage_hint(desc.storage));
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
            raw
        };

        let id = BufferId(self.ids.next());
        log::trace!("GL: create_buffer {} '{}' ({} bytes)", id, desc.label, desc.size);
        self.buffers.insert(
            id,
            GlBuffer {
                raw,
                size: desc.size,
            },
        );
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> BackendResult<()> {
        let target = self.buffer(buffer)?;
        let end = offset.saturating_add(data.len() as u64);
        if end > target.size {
            return Err(BackendError::InvalidState(format!(
                "write of {} bytes at {} overruns {} ({} bytes)",
                data.len(),
                offset,
                buffer,
                target.size
            )));
        }
        let offset = to_i32(offset, "buffer offset")?;
        unsafe {
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(target.raw));
            self.gl
                .buffer_sub_data_u8_slice(glow::ARRAY_BUFFER, offset, data);
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }
        log::trace!("GL: write_buffer {} ({} bytes at {})", buffer, data.len(), offset);
        Ok(())
    }

    fn write_buffer_staged(
        &mut self,
        buffer: BufferId,
        _offset: u64,
        _data: &[u8],
    ) -> BackendResult<()> {
        Err(BackendError::FeatureNotSupported(format!(
            "staged write to {buffer}: OpenGL buffers are written in place"
        )))
    }

    fn destroy_buffer(&mut self, buffer: BufferId) -> BackendResult<()> {
        let target = self.buffers.remove(&buffer).ok_or(unknown(buffer))?;
        unsafe { self.gl.delete_buffer(target.raw) };
        log::trace!("GL: destroy_buffer {}", buffer);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureId> {
        let width = to_i32(desc.width, "texture width")?;
        let height = to_i32(desc.height, "texture height")?;
        let (internal, format) = texture_formats(desc.format);

        let raw = unsafe {
            let raw = self
                .gl
                .create_texture()
                .map_err(BackendError::TextureCreationFailed)?;
            self.gl.bind_texture(glow::TEXTURE_2D, Some(raw));
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                internal,
                width,
                height,
                0,
                format,
                glow::UNSIGNED_BYTE,
                PixelUnpackData::Slice(None),
            );
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, LINEAR_FILTER);
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, LINEAR_FILTER);
            self.gl.bind_texture(glow::TEXTURE_2D, None);
            raw
        };

        let id = TextureId(self.ids.next());
        log::trace!(
            "GL: create_texture {} '{}' ({}x{} {:?})",
            id,
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        self.textures.insert(
            id,
            GlTexture {
                raw,
                desc: desc.clone(),
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
        let width = to_i32(target.desc.width, "texture width")?;
        let height = to_i32(target.desc.height, "texture height")?;
        let (_, format) = texture_formats(target.desc.format);

        unsafe {
            self.gl.bind_texture(glow::TEXTURE_2D, Some(target.raw));
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                0,
                0,
                width,
                height,
                format,
                glow::UNSIGNED_BYTE,
                PixelUnpackData::Slice(Some(data)),
            );
            self.gl.bind_texture(glow::TEXTURE_2D, None);
        }
        log::trace!("GL: write_texture {} ({} bytes)", texture, data.len());
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) -> BackendResult<()> {
        let target = self.textures.remove(&texture).ok_or(unknown(texture))?;
        unsafe { self.gl.delete_texture(target.raw) };
        log::trace!("GL: destroy_texture {}", texture);
        Ok(())
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramId> {
        let ShaderSource::Glsl { vertex, fragment } = &desc.source else {
            return Err(BackendError::ShaderCreationFailed(format!(
                "program '{}' is not GLSL",
                desc.label
            )));
        };

        let raw = unsafe { compile_program(&self.gl, vertex, fragment) }.map_err(|e| {
            BackendError::ShaderCreationFailed(format!("program '{}': {}", desc.label, e))
        })?;

        let id = ProgramId(self.ids.next());
        log::trace!("GL: create_program {} '{}'", id, desc.label);
        self.programs.insert(id, raw);
        Ok(id)
    }

    fn set_uniform(
        &mut self,
        program: ProgramId,
        name: &str,
        value: &UniformValue,
    ) -> BackendResult<()> {
        let raw = self.program(program)?;
        unsafe {
            let location = self.gl.get_uniform_location(raw, name).ok_or_else(|| {
                BackendError::InvalidState(format!("uniform '{name}' not found in {program}"))
            })?;
            let location = Some(&location);

            self.gl.use_program(Some(raw));
            match value {
                UniformValue::Bool(v) => self.gl.uniform_1_i32(location, i32::from(*v)),
                UniformValue::Int(v) => self.gl.uniform_1_i32(location, *v),
                UniformValue::Float(v) => self.gl.uniform_1_f32(location, *v),
                UniformValue::Vec2(v) => self.gl.uniform_2_f32(location, v.x, v.y),
                UniformValue::Vec3(v) => self.gl.uniform_3_f32(location, v.x, v.y, v.z),
                UniformValue::Vec4(v) => self.gl.uniform_4_f32(location, v.x, v.y, v.z, v.w),
                UniformValue::Mat4(m) => {
                    self.gl
                        .uniform_matrix_4_f32_slice(location, false, &m.to_cols_array())
                }
            }
        }
        log::trace!("GL: set_uniform {} {} ({})", program, name, value.type_name());
        Ok(())
    }

    fn destroy_program(&mut self, program: ProgramId) -> BackendResult<()> {
        let raw = self.programs.remove(&program).ok_or(unknown(program))?;
        unsafe { self.gl.delete_program(raw) };
        log::trace!("GL: destroy_program {}", program);
        Ok(())
    }

    fn create_vertex_array(&mut self, label: &str) -> BackendResult<VertexArrayId> {
        let raw = unsafe { self.gl.create_vertex_array() }
            .map_err(BackendError::VertexArrayCreationFailed)?;
        let id = VertexArrayId(self.ids.next());
        log::trace!("GL: create_vertex_array {} '{}'", id, label);
        self.vertex_arrays.insert(id, raw);
        Ok(id)
    }

    fn configure_vertex_array(
        &mut self,
        vao: VertexArrayId,
        vbo: BufferId,
        ebo: BufferId,
        layout: &VertexLayout,
    ) -> BackendResult<()> {
        let raw = self.vertex_array(vao)?;
        let vbo_raw = self.buffer(vbo)?.raw;
        let ebo_raw = self.buffer(ebo)?.raw;
        let stride = to_i32(layout.stride(), "vertex stride")?;

        unsafe {
            self.gl.bind_vertex_array(Some(raw));
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo_raw));
            self.gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(ebo_raw));
            for (location, attribute, offset) in layout.offsets() {
                self.gl.enable_vertex_attrib_array(location);
                self.gl.vertex_attrib_pointer_f32(
                    location,
                    i32::from(attribute.components),
                    glow::FLOAT,
                    false,
                    stride,
                    to_i32(offset, "attribute offset")?,
                );
            }
            // Restore whatever the caller had bound.
            let previous = self.bound_vao.and_then(|id| self.vertex_arrays.get(&id).copied());
            self.gl.bind_vertex_array(previous);
        }
        log::trace!("GL: configure_vertex_array {} (vbo {}, ebo {})", vao, vbo, ebo);
        Ok(())
    }

    fn bind_vertex_array(&mut self, vao: Option<VertexArrayId>) -> BackendResult<()> {
        let raw = vao.map(|id| self.vertex_array(id)).transpose()?;
        unsafe { self.gl.bind_vertex_array(raw) };
        self.bound_vao = vao;
        Ok(())
    }

    fn bound_vertex_array(&self) -> Option<VertexArrayId> {
        self.bound_vao
    }

    fn destroy_vertex_array(&mut self, vao: VertexArrayId) -> BackendResult<()> {
        let raw = self.vertex_arrays.remove(&vao).ok_or(unknown(vao))?;
        if self.bound_vao == Some(vao) {
            self.bound_vao = None;
            unsafe { self.gl.bind_vertex_array(None) };
        }
        unsafe { self.gl.delete_vertex_array(raw) };
        log::trace!("GL: destroy_vertex_array {}", vao);
        Ok(())
    }

    fn draw_indexed(&mut self, index_count: u32) -> BackendResult<()> {
        let vao = self
            .bound_vao
            .ok_or_else(|| BackendError::InvalidState("draw with no vertex array bound".into()))?;
        let count = to_i32(index_count, "index count")?;
        unsafe {
            self.gl
                .draw_elements(glow::TRIANGLES, count, glow::UNSIGNED_INT, 0);
        }
        log::trace!("GL: draw_indexed {} ({} indices)", vao, index_count);
        Ok(())
    }
}

impl Drop for GlBackend {
    fn drop(&mut self) {
        let leaked = self.buffers.len()
            + self.textures.len()
            + self.programs.len()
            + self.vertex_arrays.len();
        if leaked > 0 {
            log::warn!("GL backend dropped with {} live objects; deleting them", leaked);
        }
        unsafe {
            for (_, vao) in self.vertex_arrays.drain() {
                self.gl.delete_vertex_array(vao);
            }
            for (_, buffer) in self.buffers.drain() {
                self.gl.delete_buffer(buffer.raw);
            }
            for (_, texture) in self.textures.drain() {
                self.gl.delete_texture(texture.raw);
            }
            for (_, program) in self.programs.drain() {
                self.gl.delete_program(program);
            }
        }
    }
}
