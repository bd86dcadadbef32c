//! Configuration consumed at creation time.
//!
//! Storage and memory modes are chosen once when a buffer is created; the
//! empty-data policies are chosen once when a model is created.

use bitflags::bitflags;

use crate::diagnostics::{Diagnostics, DEFAULT_LOG_CAPACITY};
use crate::error::{LifecycleError, Result};
use crate::mesh::VertexLayout;

/// How often the contents of a buffer are expected to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageMode {
    /// Uploaded once, never rewritten.
    #[default]
    Static,
    /// Rewritten frequently.
    Dynamic,
    /// Rewritten every frame.
    Stream,
}

impl StorageMode {
    /// Parse the textual form used by asset manifests (`static`, `dynamic`, `stream`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "static" => Some(Self::Static),
            "dynamic" => Some(Self::Dynamic),
            "stream" => Some(Self::Stream),
            _ => None,
        }
    }
}

bitflags! {
    /// Memory properties requested for a buffer's backing allocation.
    ///
    /// Only meaningful for Vulkan; the OpenGL backend always creates
    /// client-writable storage.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryProperties: u32 {
        const DEVICE_LOCAL = 1 << 0;
        const HOST_VISIBLE = 1 << 1;
        const HOST_COHERENT = 1 << 2;
    }
}

impl MemoryProperties {
    /// Host-visible and coherent memory, writable through a mapping.
    pub const HOST_SHARED: Self = Self::HOST_VISIBLE.union(Self::HOST_COHERENT);

    /// Whether the CPU can write this memory directly.
    pub fn is_host_writable(self) -> bool {
        self.contains(Self::HOST_VISIBLE)
    }
}

impl Default for MemoryProperties {
    fn default() -> Self {
        Self::DEVICE_LOCAL
    }
}

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be used as a uniform buffer.
        const UNIFORM = 1 << 2;
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 3;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 4;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// What a model does when build or draw finds nothing to work with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EmptyDataPolicy {
    /// Return without a trace.
    SilentlyFail,
    /// Log a warning and return.
    #[default]
    Scream,
    /// Return an [`LifecycleError::EmptyData`] error.
    Throw,
}

impl EmptyDataPolicy {
    pub(crate) fn apply(self, diag: &Diagnostics, operation: &'static str, label: &str) -> Result<()> {
        match self {
            Self::SilentlyFail => Ok(()),
            Self::Scream => {
                diag.warn(format_args!("{operation} of '{label}' skipped: no data"));
                Ok(())
            }
            Self::Throw => Err(LifecycleError::EmptyData {
                operation,
                label: label.to_string(),
            }),
        }
    }
}

/// Per-model configuration.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub label: String,
    pub layout: VertexLayout,
    pub on_empty_build: EmptyDataPolicy,
    pub on_empty_draw: EmptyDataPolicy,
    pub vertex_storage: StorageMode,
    pub index_storage: StorageMode,
    pub memory: MemoryProperties,
    /// Bytes reserved for each of the vertex and index buffers at handle generation.
    pub initial_capacity: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            label: "model".to_string(),
            layout: VertexLayout::position_uv(),
            on_empty_build: EmptyDataPolicy::Scream,
            on_empty_draw: EmptyDataPolicy::Scream,
            vertex_storage: StorageMode::Static,
            index_storage: StorageMode::Static,
            memory: MemoryProperties::DEVICE_LOCAL,
            initial_capacity: 1024,
        }
    }
}

impl ModelConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_layout(mut self, layout: VertexLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_empty_build(mut self, policy: EmptyDataPolicy) -> Self {
        self.on_empty_build = policy;
        self
    }

    pub fn with_empty_draw(mut self, policy: EmptyDataPolicy) -> Self {
        self.on_empty_draw = policy;
        self
    }

    pub fn with_storage(mut self, vertex: StorageMode, index: StorageMode) -> Self {
        self.vertex_storage = vertex;
        self.index_storage = index;
        self
    }

    pub fn with_memory(mut self, memory: MemoryProperties) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_initial_capacity(mut self, bytes: u64) -> Self {
        self.initial_capacity = bytes;
        self
    }
}

/// Configuration for one rendering context.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Used as the log target root for every component of the context.
    pub label: String,
    /// Template for models added without an explicit configuration.
    pub model: ModelConfig,
    /// Capacity of the diagnostic capture buffer; `0` disables capturing.
    pub log_capacity: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            label: "gfx_lifecycle".to_string(),
            model: ModelConfig::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl ContextConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    pub(crate) fn diagnostics(&self) -> Diagnostics {
        if self.log_capacity == 0 {
            Diagnostics::new(self.label.clone())
        } else {
            Diagnostics::capturing(self.label.clone(), self.log_capacity)
        }
    }
}
