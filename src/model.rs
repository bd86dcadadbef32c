//! Model build pipeline.
//!
//! A model merges its meshes into one vertex buffer and one index buffer
//! behind a single vertex array:
//!
//! ```text
//! Unbuilt --generate_handles--> Built(dirty) --build--> Built(clean)
//!                                    ^                       |
//!                                    +------ add/remove -----+
//! Built(*) --free--> Freed
//! ```
//!
//! Nothing leaves `Freed`. The vertex array is assigned once and never
//! replaced; when the merged data outgrows a buffer, a larger buffer takes
//! its place, the old one is queued for deferred destruction and the vertex
//! array is re-pointed.

use slotmap::{new_key_type, SlotMap};

use crate::backend::{BufferDescriptor, BufferId, GpuBackend, VertexArrayId};
use crate::config::{BufferUsage, ModelConfig};
use crate::context::GpuResources;
use crate::diagnostics::Diagnostics;
use crate::error::{checked_cast, LifecycleError, Result};
use crate::mesh::{MeshData, MeshSubmission, Vertex};

new_key_type! {
    /// Key of a mesh inside one model.
    pub struct MeshKey;
}

/// A mesh owned by a model.
#[derive(Debug, Clone)]
pub enum ModelMesh {
    /// Uploaded as submitted.
    Plain(MeshSubmission),
    /// Shared vertices are collapsed before upload.
    Deduplicated(MeshData),
}

impl ModelMesh {
    fn geometry(&mut self) -> Result<(&[Vertex], &[u32])> {
        match self {
            ModelMesh::Plain(submission) => Ok((submission.vertices(), submission.indices())),
            ModelMesh::Deduplicated(data) => data.get(),
        }
    }

    fn arity(&self) -> Option<usize> {
        match self {
            ModelMesh::Plain(submission) => Some(submission.arity()),
            ModelMesh::Deduplicated(data) => data.arity(),
        }
    }
}

impl From<MeshSubmission> for ModelMesh {
    fn from(submission: MeshSubmission) -> Self {
        ModelMesh::Plain(submission)
    }
}

impl From<MeshData> for ModelMesh {
    fn from(data: MeshData) -> Self {
        ModelMesh::Deduplicated(data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Unbuilt,
    Built { dirty: bool },
    Freed,
}

#[derive(Debug, Clone, Copy)]
struct Handles {
    vao: VertexArrayId,
    vbo: BufferId,
    ebo: BufferId,
}

#[derive(Debug)]
pub struct Model {
    config: ModelConfig,
    handles: Option<Handles>,
    meshes: SlotMap<MeshKey, ModelMesh>,
    order: Vec<MeshKey>,
    indices_length: usize,
    state: ModelState,
    diag: Diagnostics,
}

impl Model {
    pub fn new(config: ModelConfig, diag: Diagnostics) -> Self {
        Self {
            config,
            handles: None,
            meshes: SlotMap::with_key(),
            order: Vec::new(),
            indices_length: 0,
            state: ModelState::Unbuilt,
            diag,
        }
    }

    /// Allocate the vertex array and both buffers. Runs exactly once.
    pub fn generate_handles<B: GpuBackend>(&mut self, res: &mut GpuResources<B>) -> Result<()> {
        if self.state != ModelState::Unbuilt {
            return Err(LifecycleError::VaoIsFinal(self.config.label.clone()));
        }

        let capacity = self.config.initial_capacity.max(4);
        let vao = res.create_vertex_array(&format!("{}.vao", self.config.label))?;
        let (vbo, ebo) = match self.create_buffers(res, capacity) {
            Ok(buffers) => buffers,
            Err(err) => {
                res.vertex_arrays.enqueue_destroy(vao);
                return Err(err);
            }
        };
        if let Err(err) = res.attach_vertex_array(vao, vbo, ebo, &self.config.layout) {
            res.vertex_arrays.enqueue_destroy(vao);
            res.buffers.enqueue_destroy(vbo);
            res.buffers.enqueue_destroy(ebo);
            return Err(err);
        }

        self.handles = Some(Handles { vao, vbo, ebo });
        self.state = ModelState::Built { dirty: true };
        self.diag.debug(format_args!(
            "model '{}' set up with {vao}, {vbo}, {ebo}",
            self.config.label
        ));
        Ok(())
    }

    fn create_buffers<B: GpuBackend>(
        &self,
        res: &mut GpuResources<B>,
        capacity: u64,
    ) -> Result<(BufferId, BufferId)> {
        let vbo = res.create_buffer(&self.buffer_descriptor(BufferRole::Vertex, capacity))?;
        match res.create_buffer(&self.buffer_descriptor(BufferRole::Index, capacity)) {
            Ok(ebo) => Ok((vbo, ebo)),
            Err(err) => {
                res.buffers.enqueue_destroy(vbo);
                Err(err)
            }
        }
    }

    fn buffer_descriptor(&self, role: BufferRole, size: u64) -> BufferDescriptor {
        let (suffix, usage, storage) = match role {
            BufferRole::Vertex => ("vbo", BufferUsage::VERTEX, self.config.vertex_storage),
            BufferRole::Index => ("ebo", BufferUsage::INDEX, self.config.index_storage),
        };
        BufferDescriptor::new(
            format!("{}.{suffix}", self.config.label),
            size,
            usage | BufferUsage::COPY_DST,
        )
        .with_storage(storage)
        .with_memory(self.config.memory)
    }

    /// Add a mesh. The model becomes dirty once it has handles.
    pub fn add_mesh(&mut self, mesh: impl Into<ModelMesh>) -> Result<MeshKey> {
        self.ensure_not_freed()?;
        let mesh = mesh.into();
        let expected = self.config.layout.arity();
        if let Some(arity) = mesh.arity() {
            if arity != expected {
                return Err(LifecycleError::MalformedGeometry(format!(
                    "mesh has {arity} components per vertex, model '{}' expects {expected}",
                    self.config.label
                )));
            }
        }

        let key = self.meshes.insert(mesh);
        self.order.push(key);
        self.mark_dirty();
        Ok(key)
    }

    /// Remove a mesh; an unknown key is a no-op.
    pub fn remove_mesh(&mut self, key: MeshKey) -> Result<Option<ModelMesh>> {
        self.ensure_not_freed()?;
        let removed = self.meshes.remove(key);
        if removed.is_some() {
            self.order.retain(|k| *k != key);
            self.mark_dirty();
        }
        Ok(removed)
    }

    pub fn mesh(&self, key: MeshKey) -> Option<&ModelMesh> {
        self.meshes.get(key)
    }

    /// Mutable access to a mesh; marks the model dirty.
    pub fn mesh_mut(&mut self, key: MeshKey) -> Result<Option<&mut ModelMesh>> {
        self.ensure_not_freed()?;
        if self.meshes.contains_key(key) {
            self.mark_dirty();
        }
        Ok(self.meshes.get_mut(key))
    }

    /// Merge every mesh and upload the result. A clean model is left alone.
    pub fn build<B: GpuBackend>(&mut self, res: &mut GpuResources<B>) -> Result<()> {
        let handles = match (self.state, self.handles) {
            (ModelState::Freed, _) => return Err(self.was_freed()),
            (ModelState::Unbuilt, _) | (_, None) => return Err(self.not_ready()),
            (ModelState::Built { dirty: false }, _) => return Ok(()),
            (ModelState::Built { dirty: true }, Some(handles)) => handles,
        };

        let (vertices, indices) = self.merge()?;
        if indices.is_empty() {
            // nothing left to draw once every mesh is gone
            self.indices_length = 0;
            return self
                .config
                .on_empty_build
                .apply(&self.diag, "build", &self.config.label);
        }

        let vertex_bytes = byte_len::<f32>(vertices.len())?;
        let index_bytes = byte_len::<u32>(indices.len())?;
        let handles = self.grow(res, handles, vertex_bytes, index_bytes)?;

        res.copy_to_buffer(handles.vbo, &vertices, 0)?;
        res.copy_to_buffer(handles.ebo, &indices, 0)?;

        self.indices_length = indices.len();
        self.state = ModelState::Built { dirty: false };
        self.diag.debug(format_args!(
            "built model '{}': {} floats, {} indices",
            self.config.label,
            vertices.len(),
            indices.len()
        ));
        Ok(())
    }

    /// Concatenate vertices; offset each mesh's indices by the running
    /// maximum index + 1 of the meshes before it.
    fn merge(&mut self) -> Result<(Vec<f32>, Vec<u32>)> {
        let arity = self.config.layout.arity();
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        let mut base: u64 = 0;

        for key in &self.order {
            let Some(mesh) = self.meshes.get_mut(*key) else {
                continue;
            };
            let (mesh_vertices, mesh_indices) = mesh.geometry()?;
            let Some(max) = mesh_indices.iter().copied().max() else {
                continue;
            };
            if let Some(vertex) = mesh_vertices.iter().find(|v| v.arity() != arity) {
                return Err(LifecycleError::MalformedGeometry(format!(
                    "vertex with {} components in model '{}', layout expects {arity}",
                    vertex.arity(),
                    self.config.label
                )));
            }
            if u64::from(max) + 1 != mesh_vertices.len() as u64 {
                self.diag.warn(format_args!(
                    "mesh in model '{}' has {} vertices but its highest index is {max}",
                    self.config.label,
                    mesh_vertices.len()
                ));
            }

            for vertex in mesh_vertices {
                vertices.extend_from_slice(vertex.components());
            }
            for &index in mesh_indices {
                indices.push(checked_cast(base + u64::from(index), "u32")?);
            }
            base += u64::from(max) + 1;
        }
        Ok((vertices, indices))
    }

    /// Make room for the merged data, replacing either buffer with a larger
    /// one when needed.
    ///
    /// Both replacements are created and attached before anything is
    /// committed. On success the old buffers are queued; on failure the
    /// replacements are queued and the current handles stay in place.
    fn grow<B: GpuBackend>(
        &mut self,
        res: &mut GpuResources<B>,
        handles: Handles,
        vertex_bytes: u64,
        index_bytes: u64,
    ) -> Result<Handles> {
        let vbo = self.replacement(res, handles.vbo, BufferRole::Vertex, vertex_bytes)?;
        let ebo = match self.replacement(res, handles.ebo, BufferRole::Index, index_bytes) {
            Ok(ebo) => ebo,
            Err(err) => {
                if let Some(vbo) = vbo {
                    res.buffers.enqueue_destroy(vbo);
                }
                return Err(err);
            }
        };
        if vbo.is_none() && ebo.is_none() {
            return Ok(handles);
        }

        let grown = Handles {
            vbo: vbo.unwrap_or(handles.vbo),
            ebo: ebo.unwrap_or(handles.ebo),
            ..handles
        };
        let attached = res.attach_vertex_array(handles.vao, grown.vbo, grown.ebo, &self.config.layout);
        if let Err(err) = attached {
            for buffer in vbo.into_iter().chain(ebo) {
                res.buffers.enqueue_destroy(buffer);
            }
            return Err(err);
        }

        for (old, new) in [(handles.vbo, vbo), (handles.ebo, ebo)] {
            if new.is_some() {
                res.buffers.enqueue_destroy(old);
            }
        }
        self.handles = Some(grown);
        Ok(grown)
    }

    /// A power-of-two sized buffer to take the place of `current`, or `None`
    /// if `needed` bytes already fit.
    fn replacement<B: GpuBackend>(
        &self,
        res: &mut GpuResources<B>,
        current: BufferId,
        role: BufferRole,
        needed: u64,
    ) -> Result<Option<BufferId>> {
        let size = res
            .buffers
            .get(current)
            .ok_or_else(|| {
                LifecycleError::IllegalState(format!(
                    "{current} of model '{}' is no longer live",
                    self.config.label
                ))
            })?
            .size();
        if needed <= size {
            return Ok(None);
        }

        let grown = needed
            .checked_next_power_of_two()
            .ok_or(LifecycleError::Overflow {
                value: u128::from(needed).next_power_of_two(),
                target: "u64",
            })?;
        let replacement = res.create_buffer(&self.buffer_descriptor(role, grown))?;
        self.diag.debug(format_args!(
            "model '{}' grows {current} ({size} bytes) into {replacement} ({grown} bytes)",
            self.config.label
        ));
        Ok(Some(replacement))
    }

    /// Bind this model's vertex array.
    pub fn bind<B: GpuBackend>(&self, res: &mut GpuResources<B>) -> Result<()> {
        let handles = self.ready_handles()?;
        res.bind_vertex_array(handles.vao)
    }

    /// Issue the indexed draw.
    ///
    /// The model's vertex array must already be bound; a draw against any
    /// other binding is rejected rather than silently rebound.
    pub fn draw<B: GpuBackend>(&self, res: &mut GpuResources<B>) -> Result<()> {
        let handles = self.ready_handles()?;
        if self.indices_length == 0 {
            return self
                .config
                .on_empty_draw
                .apply(&self.diag, "draw", &self.config.label);
        }

        let bound = res.backend().bound_vertex_array();
        if bound != Some(handles.vao) {
            let bound = bound.map_or_else(|| "nothing".to_string(), |id| id.to_string());
            return Err(LifecycleError::IllegalState(format!(
                "model '{}' drawn while {bound} is bound, expected {}",
                self.config.label, handles.vao
            )));
        }

        let count: u32 = checked_cast(self.indices_length, "u32")?;
        res.backend_mut().draw_indexed(count)?;
        Ok(())
    }

    /// Queue the vertex array and buffers for destruction. A second call is an error.
    pub fn free<B: GpuBackend>(&mut self, res: &mut GpuResources<B>) -> Result<()> {
        if self.state == ModelState::Freed {
            return Err(LifecycleError::ModelAlreadyFreed(self.config.label.clone()));
        }
        if let Some(handles) = self.handles {
            res.vertex_arrays.enqueue_destroy(handles.vao);
            res.buffers.enqueue_destroy(handles.vbo);
            res.buffers.enqueue_destroy(handles.ebo);
        }
        self.meshes.clear();
        self.order.clear();
        self.indices_length = 0;
        self.state = ModelState::Freed;
        self.diag.debug(format_args!("model '{}' freed", self.config.label));
        Ok(())
    }

    pub fn label(&self) -> &str {
        &self.config.label
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn was_setup(&self) -> bool {
        self.handles.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self.state, ModelState::Built { dirty: true })
    }

    pub fn is_freed(&self) -> bool {
        self.state == ModelState::Freed
    }

    pub fn indices_length(&self) -> usize {
        self.indices_length
    }

    pub fn vao(&self) -> Option<VertexArrayId> {
        self.handles.map(|h| h.vao)
    }

    pub fn vbo(&self) -> Option<BufferId> {
        self.handles.map(|h| h.vbo)
    }

    pub fn ebo(&self) -> Option<BufferId> {
        self.handles.map(|h| h.ebo)
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Meshes in the order they are merged.
    pub fn meshes(&self) -> impl Iterator<Item = (MeshKey, &ModelMesh)> + '_ {
        self.order
            .iter()
            .filter_map(|key| self.meshes.get(*key).map(|mesh| (*key, mesh)))
    }

    fn mark_dirty(&mut self) {
        if let ModelState::Built { .. } = self.state {
            self.state = ModelState::Built { dirty: true };
        }
    }

    fn ensure_not_freed(&self) -> Result<()> {
        if self.state == ModelState::Freed {
            return Err(self.was_freed());
        }
        Ok(())
    }

    fn ready_handles(&self) -> Result<Handles> {
        match (self.state, self.handles) {
            (ModelState::Freed, _) => Err(self.was_freed()),
            (ModelState::Built { .. }, Some(handles)) => Ok(handles),
            _ => Err(self.not_ready()),
        }
    }

    fn was_freed(&self) -> LifecycleError {
        LifecycleError::WasFreed(format!("model '{}'", self.config.label))
    }

    fn not_ready(&self) -> LifecycleError {
        LifecycleError::NotReady(format!("model '{}'", self.config.label))
    }
}

#[derive(Debug, Clone, Copy)]
enum BufferRole {
    Vertex,
    Index,
}

fn byte_len<T>(count: usize) -> Result<u64> {
    let bytes = count
        .checked_mul(std::mem::size_of::<T>())
        .ok_or(LifecycleError::Overflow {
            value: (count as u128) * (std::mem::size_of::<T>() as u128),
            target: "usize",
        })?;
    checked_cast(bytes, "u64")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, BackendKind, DummyBackend, FailPoint};
    use crate::config::EmptyDataPolicy;
    use crate::mesh::VertexLayout;

    fn triangle(offset: f32) -> MeshSubmission {
        MeshSubmission::new(
            vec![
                Vertex::from([offset, 0.0, 0.0]),
                Vertex::from([offset + 1.0, 0.0, 0.0]),
                Vertex::from([offset, 1.0, 0.0]),
            ],
            vec![0, 1, 2],
        )
        .unwrap()
    }

    fn position_only() -> ModelConfig {
        ModelConfig::new("tri").with_layout(VertexLayout::new().with_attribute(
            crate::mesh::VertexAttribute::new(crate::mesh::VertexAttributeSemantic::Position, 3),
        ))
    }

    fn resources() -> GpuResources<DummyBackend> {
        GpuResources::new(DummyBackend::new(BackendKind::Gl), Diagnostics::capturing("test", 256))
    }

    #[test]
    fn test_generate_handles_is_final() {
        let mut res = resources();
        let mut model = Model::new(position_only(), res.diagnostics().child("tri"));
        model.generate_handles(&mut res).unwrap();
        assert!(model.is_dirty());
        assert!(matches!(
            model.generate_handles(&mut res),
            Err(LifecycleError::VaoIsFinal(_))
        ));
        res.destroy_all();
    }

    #[test]
    fn test_build_before_setup_is_not_ready() {
        let mut res = resources();
        let mut model = Model::new(position_only(), Diagnostics::default());
        model.add_mesh(triangle(0.0)).unwrap();
        assert!(matches!(model.build(&mut res), Err(LifecycleError::NotReady(_))));
        assert!(matches!(model.draw(&mut res), Err(LifecycleError::NotReady(_))));
    }

    #[test]
    fn test_arity_mismatch_rejected_at_add() {
        let mut model = Model::new(ModelConfig::new("uv"), Diagnostics::default());
        assert!(matches!(
            model.add_mesh(triangle(0.0)),
            Err(LifecycleError::MalformedGeometry(_))
        ));
    }

    #[test]
    fn test_growth_keeps_vertex_array() {
        let mut res = resources();
        let mut model = Model::new(
            position_only().with_initial_capacity(16),
            res.diagnostics().child("tri"),
        );
        model.generate_handles(&mut res).unwrap();
        let (vao, vbo) = (model.vao(), model.vbo());

        for i in 0..4 {
            model.add_mesh(triangle(i as f32 * 2.0)).unwrap();
        }
        model.build(&mut res).unwrap();

        assert_eq!(model.vao(), vao);
        assert_ne!(model.vbo(), vbo);
        // 12 vertices * 3 floats * 4 bytes = 144 -> 256
        let new_vbo = model.vbo().unwrap();
        assert_eq!(res.buffers.get(new_vbo).unwrap().size(), 256);
        assert_eq!(
            res.backend().vertex_array_buffers(vao.unwrap()),
            Some((new_vbo, model.ebo().unwrap()))
        );

        // the replaced buffers are still alive until the next flush
        assert_eq!(res.buffers.pending_count(), 2);
        assert_eq!(res.flush_all(), 2);
        res.destroy_all();
    }

    fn grown_model(res: &mut GpuResources<DummyBackend>) -> Model {
        let mut model = Model::new(
            position_only().with_initial_capacity(16),
            res.diagnostics().child("tri"),
        );
        model.generate_handles(res).unwrap();
        for i in 0..4 {
            model.add_mesh(triangle(i as f32 * 2.0)).unwrap();
        }
        model
    }

    #[test]
    fn test_failed_growth_keeps_current_buffers() {
        let mut res = resources();
        let mut model = grown_model(&mut res);
        let (vao, vbo, ebo) = (model.vao().unwrap(), model.vbo().unwrap(), model.ebo().unwrap());

        // the vertex buffer replacement succeeds, the index buffer one fails
        res.backend_mut().fail_after(FailPoint::CreateBuffer, 1);
        assert!(model.build(&mut res).is_err());
        assert_eq!((model.vbo(), model.ebo()), (Some(vbo), Some(ebo)));
        assert_eq!(res.backend().vertex_array_buffers(vao), Some((vbo, ebo)));
        assert!(model.is_dirty());

        // only the orphaned replacement is queued
        assert_eq!(res.buffers.pending_count(), 1);
        assert_eq!(res.flush_all(), 1);
        assert!(res.buffers.contains(vbo) && res.buffers.contains(ebo));

        model.build(&mut res).unwrap();
        let (new_vbo, new_ebo) = (model.vbo().unwrap(), model.ebo().unwrap());
        assert_ne!(new_vbo, vbo);
        assert_eq!(res.backend().vertex_array_buffers(vao), Some((new_vbo, new_ebo)));
        assert_eq!(model.indices_length(), 12);
        res.destroy_all();
    }

    #[test]
    fn test_failed_reattach_queues_replacements() {
        let mut res = resources();
        let mut model = grown_model(&mut res);
        let (vbo, ebo) = (model.vbo().unwrap(), model.ebo().unwrap());

        res.backend_mut().fail_after(FailPoint::ConfigureVertexArray, 0);
        assert!(model.build(&mut res).is_err());
        assert_eq!((model.vbo(), model.ebo()), (Some(vbo), Some(ebo)));
        assert_eq!(res.buffers.pending_count(), 2);
        assert_eq!(res.flush_all(), 2);

        model.build(&mut res).unwrap();
        assert!(!model.is_dirty());
        assert_ne!(model.vbo(), Some(vbo));
        // the previous pair now waits for the next flush
        assert_eq!(res.buffers.pending_count(), 2);
        res.destroy_all();
    }

    #[test]
    fn test_emptied_model_stops_drawing() {
        let mut res = resources();
        let mut model = Model::new(
            position_only().with_empty_build(EmptyDataPolicy::SilentlyFail),
            res.diagnostics().child("tri"),
        );
        let key = model.add_mesh(triangle(0.0)).unwrap();
        model.generate_handles(&mut res).unwrap();
        model.build(&mut res).unwrap();
        assert_eq!(model.indices_length(), 3);

        model.remove_mesh(key).unwrap();
        model.build(&mut res).unwrap();
        assert_eq!(model.indices_length(), 0);

        model.bind(&mut res).unwrap();
        res.backend_mut().clear_calls();
        model.draw(&mut res).unwrap();
        assert!(!res
            .backend()
            .calls()
            .iter()
            .any(|call| matches!(call, BackendCall::DrawIndexed { .. })));
        res.destroy_all();
    }

    #[test]
    fn test_remove_unknown_mesh_is_noop() {
        let mut res = resources();
        let mut model = Model::new(position_only(), Diagnostics::default());
        let key = model.add_mesh(triangle(0.0)).unwrap();
        model.generate_handles(&mut res).unwrap();
        model.build(&mut res).unwrap();

        assert!(model.remove_mesh(key).unwrap().is_some());
        assert!(model.is_dirty());
        assert!(model.remove_mesh(key).unwrap().is_none());
        res.destroy_all();
    }
}
