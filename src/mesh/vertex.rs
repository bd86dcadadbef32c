//! Vertices and the layout they are interpreted with.

use std::hash::{Hash, Hasher};

use glam::{Vec2, Vec3};

/// An immutable tuple of float components.
///
/// Equality and hashing compare the exact bit pattern of every component, so
/// `0.0` and `-0.0` are distinct and a NaN equals an identical NaN. This is
/// the identity the dedup cache collapses on.
#[derive(Debug, Clone)]
pub struct Vertex(Box<[f32]>);

impl Vertex {
    pub fn new(components: impl Into<Box<[f32]>>) -> Self {
        Self(components.into())
    }

    /// Position followed by texture coordinates.
    pub fn position_uv(position: Vec3, uv: Vec2) -> Self {
        Self::new([position.x, position.y, position.z, uv.x, uv.y])
    }

    pub fn components(&self) -> &[f32] {
        &self.0
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }
}

impl<const N: usize> From<[f32; N]> for Vertex {
    fn from(components: [f32; N]) -> Self {
        Self::new(components)
    }
}

impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for component in self.0.iter() {
            component.to_bits().hash(state);
        }
    }
}

/// Semantic meaning of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexAttributeSemantic {
    Position,
    Normal,
    TexCoord0,
    Color,
}

/// One attribute: a semantic and its number of `f32` components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub semantic: VertexAttributeSemantic,
    pub components: u8,
}

impl VertexAttribute {
    pub fn new(semantic: VertexAttributeSemantic, components: u8) -> Self {
        Self {
            semantic,
            components,
        }
    }
}

/// Interleaved float attributes, in shader location order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VertexLayout {
    attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, attribute: VertexAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Position (float3) + texture coordinates (float2).
    pub fn position_uv() -> Self {
        Self::new()
            .with_attribute(VertexAttribute::new(VertexAttributeSemantic::Position, 3))
            .with_attribute(VertexAttribute::new(VertexAttributeSemantic::TexCoord0, 2))
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    /// Total float components per vertex.
    pub fn arity(&self) -> usize {
        self.attributes.iter().map(|a| usize::from(a.components)).sum()
    }

    /// Bytes per vertex.
    pub fn stride(&self) -> usize {
        self.arity() * std::mem::size_of::<f32>()
    }

    /// `(location, attribute, byte offset)` for every attribute.
    pub fn offsets(&self) -> impl Iterator<Item = (u32, VertexAttribute, usize)> + '_ {
        let mut offset = 0;
        self.attributes
            .iter()
            .enumerate()
            .map(move |(location, attribute)| {
                let current = offset;
                offset += usize::from(attribute.components) * std::mem::size_of::<f32>();
                (location as u32, *attribute, current)
            })
    }
}
