//! Per-context resource ownership and the frame-loop entry points.
//!
//! Each rendering context owns its backend, its managers and its models;
//! nothing is shared between contexts. The owning render loop calls
//! [`RenderContext::setup`] once, [`RenderContext::per_frame_maintenance`] at
//! the start of every frame before any draw, and [`RenderContext::teardown`]
//! once at shutdown.

use std::io::Read;

use bytemuck::Pod;
use slotmap::{new_key_type, SlotMap};

use crate::backend::{
    BufferDescriptor, BufferId, GpuBackend, ProgramDescriptor, ProgramId, TextureDescriptor,
    TextureId, VertexArrayId,
};
use crate::buffer::BufferObject;
use crate::config::{ContextConfig, ModelConfig};
use crate::diagnostics::Diagnostics;
use crate::error::{LifecycleError, Result};
use crate::mesh::VertexLayout;
use crate::model::Model;
use crate::resource::{ResourceManager, ShaderProgram, Texture, VertexArray};

/// A backend and one manager per resource kind.
pub struct GpuResources<B: GpuBackend> {
    backend: B,
    pub(crate) buffers: ResourceManager<BufferObject>,
    pub(crate) textures: ResourceManager<Texture>,
    pub(crate) programs: ResourceManager<ShaderProgram>,
    pub(crate) vertex_arrays: ResourceManager<VertexArray>,
    diag: Diagnostics,
}

impl<B: GpuBackend> GpuResources<B> {
    pub fn new(backend: B, diag: Diagnostics) -> Self {
        Self {
            backend,
            buffers: ResourceManager::new(diag.child("buffers")),
            textures: ResourceManager::new(diag.child("textures")),
            programs: ResourceManager::new(diag.child("programs")),
            vertex_arrays: ResourceManager::new(diag.child("vertex_arrays")),
            diag,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }

    pub fn buffers(&self) -> &ResourceManager<BufferObject> {
        &self.buffers
    }

    pub fn textures(&self) -> &ResourceManager<Texture> {
        &self.textures
    }

    pub fn programs(&self) -> &ResourceManager<ShaderProgram> {
        &self.programs
    }

    pub fn vertex_arrays(&self) -> &ResourceManager<VertexArray> {
        &self.vertex_arrays
    }

    pub fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferId> {
        let buffer = BufferObject::create(&mut self.backend, desc, self.buffers.diagnostics())?;
        self.buffers.register(buffer)
    }

    pub fn create_buffer_from_stream<R: Read>(
        &mut self,
        desc: &BufferDescriptor,
        reader: &mut R,
    ) -> Result<BufferId> {
        let buffer = BufferObject::create_from_stream(
            &mut self.backend,
            desc,
            reader,
            self.buffers.diagnostics(),
        )?;
        self.buffers.register(buffer)
    }

    pub fn copy_to_buffer<T: Pod>(&mut self, id: BufferId, data: &[T], offset: u64) -> Result<()> {
        let buffer = self.buffers.get(id).ok_or_else(|| not_live(id))?;
        buffer.copy(&mut self.backend, data, offset)
    }

    pub fn create_texture(&mut self, desc: TextureDescriptor) -> Result<TextureId> {
        let texture = Texture::create(&mut self.backend, desc, self.textures.diagnostics())?;
        self.textures.register(texture)
    }

    pub fn create_texture_from_stream<R: Read>(
        &mut self,
        desc: TextureDescriptor,
        reader: &mut R,
    ) -> Result<TextureId> {
        let texture = Texture::create_from_stream(
            &mut self.backend,
            desc,
            reader,
            self.textures.diagnostics(),
        )?;
        self.textures.register(texture)
    }

    pub fn upload_texture(&mut self, id: TextureId, pixels: &[u8]) -> Result<()> {
        let texture = self.textures.get(id).ok_or_else(|| not_live(id))?;
        texture.upload(&mut self.backend, pixels)
    }

    pub fn create_program(&mut self, desc: &ProgramDescriptor) -> Result<ProgramId> {
        let program = ShaderProgram::create(&mut self.backend, desc, self.programs.diagnostics())?;
        self.programs.register(program)
    }

    pub fn set_uniform(
        &mut self,
        id: ProgramId,
        name: &str,
        value: impl Into<crate::uniform::UniformValue>,
    ) -> Result<()> {
        let program = self.programs.get(id).ok_or_else(|| not_live(id))?;
        program.set_uniform(&mut self.backend, name, value)
    }

    pub fn create_vertex_array(&mut self, label: &str) -> Result<VertexArrayId> {
        let vao = VertexArray::create(&mut self.backend, label, self.vertex_arrays.diagnostics())?;
        self.vertex_arrays.register(vao)
    }

    pub fn attach_vertex_array(
        &mut self,
        vao: VertexArrayId,
        vbo: BufferId,
        ebo: BufferId,
        layout: &VertexLayout,
    ) -> Result<()> {
        for buffer in [vbo, ebo] {
            if !self.buffers.contains(buffer) {
                return Err(not_live(buffer));
            }
        }
        let array = self.vertex_arrays.get_mut(vao).ok_or_else(|| not_live(vao))?;
        array.attach(&mut self.backend, vbo, ebo, layout)
    }

    pub fn bind_vertex_array(&mut self, vao: VertexArrayId) -> Result<()> {
        let array = self.vertex_arrays.get(vao).ok_or_else(|| not_live(vao))?;
        array.bind(&mut self.backend)
    }

    /// Queue a buffer for destruction at the next flush.
    pub fn enqueue_destroy_buffer(&mut self, id: BufferId) {
        self.buffers.enqueue_destroy(id);
    }

    pub fn enqueue_destroy_texture(&mut self, id: TextureId) {
        self.textures.enqueue_destroy(id);
    }

    pub fn enqueue_destroy_program(&mut self, id: ProgramId) {
        self.programs.enqueue_destroy(id);
    }

    pub fn enqueue_destroy_vertex_array(&mut self, id: VertexArrayId) {
        self.vertex_arrays.enqueue_destroy(id);
    }

    /// Flush every deletion queue. Returns how many resources were destroyed.
    pub fn flush_all(&mut self) -> usize {
        // Vertex arrays go first so none outlives the buffers it points at.
        self.vertex_arrays.flush(&mut self.backend)
            + self.programs.flush(&mut self.backend)
            + self.textures.flush(&mut self.backend)
            + self.buffers.flush(&mut self.backend)
    }

    /// Destroy everything still live, bypassing the queues.
    pub fn destroy_all(&mut self) -> usize {
        let live = self.live_count();
        self.diag.info(format_args!(
            "tearing down {live} live resource(s) on {}",
            self.backend.name()
        ));
        self.vertex_arrays.destroy_all(&mut self.backend)
            + self.programs.destroy_all(&mut self.backend)
            + self.textures.destroy_all(&mut self.backend)
            + self.buffers.destroy_all(&mut self.backend)
    }

    pub fn live_count(&self) -> usize {
        self.buffers.live_count()
            + self.textures.live_count()
            + self.programs.live_count()
            + self.vertex_arrays.live_count()
    }

    pub fn pending_count(&self) -> usize {
        self.buffers.pending_count()
            + self.textures.pending_count()
            + self.programs.pending_count()
            + self.vertex_arrays.pending_count()
    }
}

fn not_live(id: impl std::fmt::Display) -> LifecycleError {
    LifecycleError::IllegalState(format!("{id} is not live in this context"))
}

new_key_type! {
    /// Key of a model inside one context.
    pub struct ModelKey;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Created,
    Running,
    TornDown,
}

/// What one call to [`RenderContext::per_frame_maintenance`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameReport {
    pub frame: u64,
    pub destroyed: usize,
    pub rebuilt: usize,
}

/// One rendering context: resources, models and the frame loop.
pub struct RenderContext<B: GpuBackend> {
    config: ContextConfig,
    resources: GpuResources<B>,
    models: SlotMap<ModelKey, Model>,
    state: ContextState,
    frame: u64,
    diag: Diagnostics,
}

impl<B: GpuBackend> RenderContext<B> {
    pub fn new(backend: B, config: ContextConfig) -> Self {
        let diag = config.diagnostics();
        Self {
            resources: GpuResources::new(backend, diag.child("resources")),
            models: SlotMap::with_key(),
            state: ContextState::Created,
            frame: 0,
            diag,
            config,
        }
    }

    /// Add a model. Once the context runs, its handles are generated right away.
    pub fn add_model(&mut self, config: ModelConfig) -> Result<ModelKey> {
        if self.state == ContextState::TornDown {
            return Err(self.torn_down());
        }
        let diag = self.diag.child(&format!("models::{}", config.label));
        let mut model = Model::new(config, diag);
        if self.state == ContextState::Running {
            model.generate_handles(&mut self.resources)?;
        }
        Ok(self.models.insert(model))
    }

    /// Add a model configured from the context's model template.
    pub fn add_default_model(&mut self, label: impl Into<String>) -> Result<ModelKey> {
        let config = ModelConfig {
            label: label.into(),
            ..self.config.model.clone()
        };
        self.add_model(config)
    }

    /// Free a model and forget it. An unknown key is a no-op.
    pub fn remove_model(&mut self, key: ModelKey) -> Result<()> {
        if let Some(mut model) = self.models.remove(key) {
            if !model.is_freed() {
                model.free(&mut self.resources)?;
            }
        }
        Ok(())
    }

    /// Generate handles for every model added so far.
    pub fn setup(&mut self) -> Result<()> {
        match self.state {
            ContextState::Created => {}
            ContextState::Running => {
                return Err(LifecycleError::IllegalState(format!(
                    "context '{}' is already set up",
                    self.config.label
                )))
            }
            ContextState::TornDown => return Err(self.torn_down()),
        }

        for (_, model) in self.models.iter_mut() {
            if !model.was_setup() {
                model.generate_handles(&mut self.resources)?;
            }
        }
        self.state = ContextState::Running;
        self.diag.info(format_args!(
            "context '{}' set up on {} with {} model(s)",
            self.config.label,
            self.resources.backend().name(),
            self.models.len()
        ));
        Ok(())
    }

    /// The frame's synchronization point: flush every deletion queue, then
    /// rebuild dirty models.
    ///
    /// Every dirty model gets its rebuild even when another one fails; the
    /// first failure is returned after the pass.
    pub fn per_frame_maintenance(&mut self) -> Result<FrameReport> {
        self.ensure_running()?;
        self.frame += 1;

        let destroyed = self.resources.flush_all();
        let mut rebuilt = 0;
        let mut first_error = None;
        for (_, model) in self.models.iter_mut() {
            if !model.is_dirty() {
                continue;
            }
            match model.build(&mut self.resources) {
                Ok(()) if !model.is_dirty() => rebuilt += 1,
                Ok(()) => {}
                Err(err) => {
                    self.diag.error(format_args!(
                        "frame {}: rebuild of model '{}' failed: {err}",
                        self.frame,
                        model.label()
                    ));
                    first_error.get_or_insert(err);
                }
            }
        }

        let report = FrameReport {
            frame: self.frame,
            destroyed,
            rebuilt,
        };
        if destroyed > 0 || rebuilt > 0 {
            self.diag.debug(format_args!(
                "frame {}: destroyed {destroyed}, rebuilt {rebuilt}",
                self.frame
            ));
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Free every model and destroy all remaining resources.
    pub fn teardown(&mut self) -> Result<usize> {
        self.ensure_running()?;
        for (_, model) in self.models.iter_mut() {
            if !model.is_freed() {
                model.free(&mut self.resources)?;
            }
        }
        let destroyed = self.resources.destroy_all();
        self.models.clear();
        self.state = ContextState::TornDown;
        Ok(destroyed)
    }

    pub fn bind_model(&mut self, key: ModelKey) -> Result<()> {
        let model = self.models.get(key).ok_or_else(|| unknown_model(key))?;
        model.bind(&mut self.resources)
    }

    pub fn draw_model(&mut self, key: ModelKey) -> Result<()> {
        self.ensure_running()?;
        let model = self.models.get(key).ok_or_else(|| unknown_model(key))?;
        model.draw(&mut self.resources)
    }

    pub fn model(&self, key: ModelKey) -> Option<&Model> {
        self.models.get(key)
    }

    pub fn model_mut(&mut self, key: ModelKey) -> Option<&mut Model> {
        self.models.get_mut(key)
    }

    pub fn models(&self) -> impl Iterator<Item = (ModelKey, &Model)> + '_ {
        self.models.iter()
    }

    pub fn resources(&self) -> &GpuResources<B> {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut GpuResources<B> {
        &mut self.resources
    }

    pub fn backend(&self) -> &B {
        self.resources.backend()
    }

    pub fn backend_mut(&mut self) -> &mut B {
        self.resources.backend_mut()
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state {
            ContextState::Running => Ok(()),
            ContextState::Created => Err(LifecycleError::NotReady(format!(
                "context '{}'",
                self.config.label
            ))),
            ContextState::TornDown => Err(self.torn_down()),
        }
    }

    fn torn_down(&self) -> LifecycleError {
        LifecycleError::WasFreed(format!("context '{}'", self.config.label))
    }
}

fn unknown_model(key: ModelKey) -> LifecycleError {
    LifecycleError::IllegalState(format!("no model {key:?} in this context"))
}

impl<B: GpuBackend> Drop for RenderContext<B> {
    fn drop(&mut self) {
        if self.state == ContextState::Running {
            self.diag.warn(format_args!(
                "context '{}' dropped without teardown",
                self.config.label
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendKind, DummyBackend};

    fn context() -> RenderContext<DummyBackend> {
        RenderContext::new(DummyBackend::new(BackendKind::Gl), ContextConfig::new("ctx"))
    }

    #[test]
    fn test_out_of_order_calls() {
        let mut ctx = context();
        assert!(matches!(ctx.per_frame_maintenance(), Err(LifecycleError::NotReady(_))));
        assert!(matches!(ctx.teardown(), Err(LifecycleError::NotReady(_))));

        ctx.setup().unwrap();
        assert!(matches!(ctx.setup(), Err(LifecycleError::IllegalState(_))));
        ctx.teardown().unwrap();

        assert!(matches!(ctx.per_frame_maintenance(), Err(LifecycleError::WasFreed(_))));
        assert!(matches!(ctx.teardown(), Err(LifecycleError::WasFreed(_))));
        assert!(matches!(ctx.add_default_model("late"), Err(LifecycleError::WasFreed(_))));
    }

    #[test]
    fn test_model_added_while_running_gets_handles() {
        let mut ctx = context();
        let early = ctx.add_default_model("early").unwrap();
        assert!(!ctx.model(early).unwrap().was_setup());

        ctx.setup().unwrap();
        let late = ctx.add_default_model("late").unwrap();
        assert!(ctx.model(early).unwrap().was_setup());
        assert!(ctx.model(late).unwrap().was_setup());

        // vao + vbo + ebo per model
        assert_eq!(ctx.resources().live_count(), 6);
        assert_eq!(ctx.teardown().unwrap(), 6);
        assert_eq!(ctx.backend().live_objects(), 0);
    }

    #[test]
    fn test_remove_model_defers_destruction() {
        let mut ctx = context();
        let key = ctx.add_default_model("temp").unwrap();
        ctx.setup().unwrap();

        ctx.remove_model(key).unwrap();
        ctx.remove_model(key).unwrap();
        assert_eq!(ctx.resources().pending_count(), 3);
        assert_eq!(ctx.backend().live_objects(), 3);

        let report = ctx.per_frame_maintenance().unwrap();
        assert_eq!(report.destroyed, 3);
        assert_eq!(ctx.backend().live_objects(), 0);
        ctx.teardown().unwrap();
    }
}
