//! Mesh geometry: vertices, validated submissions and the dedup cache.

mod cache;
pub mod generators;
mod submission;
mod vertex;

pub use cache::MeshData;
pub use submission::MeshSubmission;
pub use vertex::{Vertex, VertexAttribute, VertexAttributeSemantic, VertexLayout};
