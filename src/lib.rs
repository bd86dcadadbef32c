//! # gfx-lifecycle
//!
//! GPU resource lifecycle management and a deduplicating mesh build pipeline.
//!
//! The crate turns application geometry into backend buffers and manages the
//! creation and destruction of opaque GPU handles safely across frames.
//! Two native backends implement the same contract:
//! - **OpenGL** via `glow` (feature `gl-backend`), writing buffers in place
//! - **Vulkan** via `ash` + `gpu-allocator` (feature `vulkan-backend`), staging
//!   uploads into device-local memory
//!
//! A [`DummyBackend`] that impersonates either one is always available and
//! needs no GPU.
//!
//! ## Example
//!
//! ```
//! use gfx_lifecycle::{
//!     BackendKind, ContextConfig, DummyBackend, MeshSubmission, RenderContext, Vertex,
//! };
//! use gfx_lifecycle::config::ModelConfig;
//! use gfx_lifecycle::mesh::{VertexAttribute, VertexAttributeSemantic, VertexLayout};
//!
//! let mut ctx = RenderContext::new(DummyBackend::new(BackendKind::Gl), ContextConfig::default());
//! let layout = VertexLayout::new()
//!     .with_attribute(VertexAttribute::new(VertexAttributeSemantic::Position, 3));
//! let key = ctx.add_model(ModelConfig::new("triangle").with_layout(layout))?;
//! ctx.setup()?;
//!
//! let triangle = MeshSubmission::new(
//!     vec![
//!         Vertex::from([0.0, 0.0, 0.0]),
//!         Vertex::from([1.0, 0.0, 0.0]),
//!         Vertex::from([0.0, 1.0, 0.0]),
//!     ],
//!     vec![0, 1, 2],
//! )?;
//! ctx.model_mut(key).unwrap().add_mesh(triangle)?;
//!
//! // start of frame
//! ctx.per_frame_maintenance()?;
//! ctx.bind_model(key)?;
//! ctx.draw_model(key)?;
//!
//! ctx.teardown()?;
//! # Ok::<(), gfx_lifecycle::LifecycleError>(())
//! ```

pub mod backend;
pub mod buffer;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod mesh;
pub mod model;
pub mod resource;
pub mod uniform;

pub use backend::{
    BackendCall, BackendKind, BufferDescriptor, BufferId, DummyBackend, FailPoint, GpuBackend,
    ProgramDescriptor, ProgramId, ShaderSource, TextureDescriptor, TextureFormat, TextureId,
    UploadPath, VertexArrayId,
};
#[cfg(feature = "gl-backend")]
pub use backend::gl::GlBackend;
#[cfg(feature = "vulkan-backend")]
pub use backend::vulkan::VulkanBackend;
pub use buffer::BufferObject;
pub use config::{
    BufferUsage, ContextConfig, EmptyDataPolicy, MemoryProperties, ModelConfig, StorageMode,
};
pub use context::{ContextState, FrameReport, GpuResources, ModelKey, RenderContext};
pub use diagnostics::{DiagnosticEntry, DiagnosticLog, Diagnostics};
pub use error::{BackendError, BackendResult, LifecycleError, Result};
pub use mesh::{MeshData, MeshSubmission, Vertex, VertexLayout};
pub use model::{MeshKey, Model, ModelMesh, ModelState};
pub use resource::{GpuResource, ResourceHandle, ResourceManager, ShaderProgram, Texture, VertexArray};
pub use uniform::UniformValue;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
