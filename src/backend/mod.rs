//! Backend abstraction layer
//!
//! Provides the common trait and types that the OpenGL and Vulkan backends
//! implement, plus an in-memory dummy used when no GPU is available.

pub mod dummy;
pub mod traits;
pub mod types;

#[cfg(feature = "gl-backend")]
pub mod gl;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub use dummy::{BackendCall, DummyBackend, FailPoint};
pub use traits::*;
pub use types::*;
