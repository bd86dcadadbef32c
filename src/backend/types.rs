//! Handles and descriptors shared between backends

use std::fmt;

use crate::config::{BufferUsage, MemoryProperties, StorageMode};

/// Which native API a backend drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Gl,
    Vulkan,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Gl => "OpenGL",
            BackendKind::Vulkan => "Vulkan",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How bytes reach a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadPath {
    /// Sub-data upload or write through a host mapping.
    Direct,
    /// Transient host-visible buffer followed by a GPU-side copy.
    Staged,
}

/// Common surface of the typed handle ids.
pub trait ResourceId: Copy + Eq + std::hash::Hash + fmt::Display + fmt::Debug {
    /// Resource kind name used in diagnostics.
    const KIND: &'static str;

    /// Raw value, for logging and leak audits.
    fn raw(self) -> u64;
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl ResourceId for $name {
            const KIND: &'static str = $kind;

            fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $kind, self.0)
            }
        }
    };
}

define_id!(
    /// Handle to a GPU buffer
    BufferId,
    "buffer"
);
define_id!(
    /// Handle to a GPU texture
    TextureId,
    "texture"
);
define_id!(
    /// Handle to a linked shader program
    ProgramId,
    "program"
);
define_id!(
    /// Handle to a vertex array object
    VertexArrayId,
    "vertex array"
);

/// Monotonic id source. Zero is never handed out.
#[derive(Debug)]
pub(crate) struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub(crate) fn new() -> Self {
        Self { next: 1 }
    }

    pub(crate) fn next(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: String,
    /// Size in bytes.
    pub size: u64,
    pub usage: BufferUsage,
    pub storage: StorageMode,
    /// Ignored by OpenGL.
    pub memory: MemoryProperties,
}

impl BufferDescriptor {
    pub fn new(label: impl Into<String>, size: u64, usage: BufferUsage) -> Self {
        Self {
            label: label.into(),
            size,
            usage,
            storage: StorageMode::default(),
            memory: MemoryProperties::default(),
        }
    }

    pub fn with_storage(mut self, storage: StorageMode) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_memory(mut self, memory: MemoryProperties) -> Self {
        self.memory = memory;
        self
    }
}

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8,
    R8,
}

impl TextureFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8 => 4,
            TextureFormat::R8 => 1,
        }
    }
}

/// Descriptor for creating a 2D texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureDescriptor {
    pub fn new(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format,
        }
    }

    /// Size of one full upload in bytes.
    pub fn byte_size(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * u64::from(self.format.bytes_per_pixel())
    }
}

/// Shader stages in the form the owning backend consumes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShaderSource {
    /// GLSL text, consumed by OpenGL.
    Glsl { vertex: String, fragment: String },
    /// SPIR-V words, consumed by Vulkan.
    SpirV { vertex: Vec<u32>, fragment: Vec<u32> },
}

impl ShaderSource {
    pub fn backend(&self) -> BackendKind {
        match self {
            ShaderSource::Glsl { .. } => BackendKind::Gl,
            ShaderSource::SpirV { .. } => BackendKind::Vulkan,
        }
    }
}

/// Descriptor for creating a shader program.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramDescriptor {
    pub label: String,
    pub source: ShaderSource,
}

impl ProgramDescriptor {
    pub fn new(label: impl Into<String>, source: ShaderSource) -> Self {
        Self {
            label: label.into(),
            source,
        }
    }
}
