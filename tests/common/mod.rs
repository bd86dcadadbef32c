//! Shared helpers for the lifecycle integration tests.
//!
//! Every test runs against [`DummyBackend`] impersonating one backend kind, so
//! the same contract is checked for OpenGL and Vulkan without a GPU.

#![allow(dead_code)]

use gfx_lifecycle::config::ModelConfig;
use gfx_lifecycle::mesh::{VertexAttribute, VertexAttributeSemantic, VertexLayout};
use gfx_lifecycle::{
    BackendKind, BufferId, ContextConfig, DiagnosticLog, DummyBackend, MeshSubmission,
    RenderContext, Vertex,
};
use parking_lot::MutexGuard;

/// Route `log` output to the test harness. Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

pub fn context(kind: BackendKind) -> RenderContext<DummyBackend> {
    init_logging();
    RenderContext::new(DummyBackend::new(kind), ContextConfig::new("test"))
}

/// Captured diagnostics of a context and everything it owns.
pub fn captured(ctx: &RenderContext<DummyBackend>) -> MutexGuard<'_, DiagnosticLog> {
    ctx.diagnostics()
        .capture()
        .expect("test contexts capture diagnostics")
        .lock()
}

pub fn position_layout() -> VertexLayout {
    VertexLayout::new().with_attribute(VertexAttribute::new(VertexAttributeSemantic::Position, 3))
}

/// Model with a float3 position layout.
pub fn position_model(label: &str) -> ModelConfig {
    ModelConfig::new(label).with_layout(position_layout())
}

/// Three distinct vertices shifted along x by `offset`, indexed `[0, 1, 2]`.
pub fn triangle(offset: f32) -> MeshSubmission {
    MeshSubmission::new(
        vec![
            Vertex::from([offset, 0.0, 0.0]),
            Vertex::from([offset + 1.0, 0.0, 0.0]),
            Vertex::from([offset, 1.0, 0.0]),
        ],
        vec![0, 1, 2],
    )
    .expect("valid triangle")
}

/// First `count` `u32`s uploaded to `buffer`.
pub fn read_u32s(backend: &DummyBackend, buffer: BufferId, count: usize) -> Vec<u32> {
    backend.buffer_contents(buffer).expect("buffer is live")[..count * 4]
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes(c.try_into().expect("4 bytes")))
        .collect()
}

/// First `count` `f32`s uploaded to `buffer`.
pub fn read_f32s(backend: &DummyBackend, buffer: BufferId, count: usize) -> Vec<f32> {
    backend.buffer_contents(buffer).expect("buffer is live")[..count * 4]
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes(c.try_into().expect("4 bytes")))
        .collect()
}
