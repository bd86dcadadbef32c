use crate::error::{LifecycleError, Result};

use super::Vertex;

/// Vertices plus triangle-list indices into them.
///
/// Construction validates the geometry; a submission that exists is
/// non-empty, has whole triangles, uniform arity and in-bounds indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshSubmission {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
}

impl MeshSubmission {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Result<Self> {
        if vertices.is_empty() {
            return Err(LifecycleError::MalformedGeometry(
                "submission has no vertices".to_string(),
            ));
        }
        if indices.is_empty() {
            return Err(LifecycleError::MalformedGeometry(
                "submission has no indices".to_string(),
            ));
        }
        if indices.len() % 3 != 0 {
            return Err(LifecycleError::MalformedGeometry(format!(
                "index count {} is not a multiple of 3",
                indices.len()
            )));
        }

        let arity = vertices[0].arity();
        if arity == 0 {
            return Err(LifecycleError::MalformedGeometry(
                "vertices have no components".to_string(),
            ));
        }
        if let Some(position) = vertices.iter().position(|v| v.arity() != arity) {
            return Err(LifecycleError::MalformedGeometry(format!(
                "vertex {position} has {} components, expected {arity}",
                vertices[position].arity()
            )));
        }
        if let Some(index) = indices
            .iter()
            .find(|&&i| usize::try_from(i).map_or(true, |i| i >= vertices.len()))
        {
            return Err(LifecycleError::MalformedGeometry(format!(
                "index {index} out of bounds for {} vertices",
                vertices.len()
            )));
        }

        Ok(Self { vertices, indices })
    }

    /// For geometry that is valid by construction.
    pub(crate) fn from_trusted(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        debug_assert!(!vertices.is_empty() && indices.len() % 3 == 0);
        Self { vertices, indices }
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Components per vertex.
    pub fn arity(&self) -> usize {
        self.vertices[0].arity()
    }

    pub fn max_index(&self) -> u32 {
        self.indices.iter().copied().max().unwrap_or(0)
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri() -> Vec<Vertex> {
        vec![
            Vertex::from([0.0, 0.0, 0.0]),
            Vertex::from([1.0, 0.0, 0.0]),
            Vertex::from([0.0, 1.0, 0.0]),
        ]
    }

    #[test]
    fn test_valid_submission() {
        let submission = MeshSubmission::new(tri(), vec![0, 1, 2]).unwrap();
        assert_eq!(submission.arity(), 3);
        assert_eq!(submission.max_index(), 2);
        assert_eq!(submission.triangle_count(), 1);
    }

    #[test]
    fn test_malformed_geometry_rejected() {
        let cases = [
            MeshSubmission::new(Vec::new(), vec![0, 1, 2]),
            MeshSubmission::new(tri(), Vec::new()),
            MeshSubmission::new(tri(), vec![0, 1]),
            MeshSubmission::new(tri(), vec![0, 1, 3]),
            MeshSubmission::new(
                vec![Vertex::from([0.0, 0.0]), Vertex::from([1.0]), Vertex::from([2.0, 0.0])],
                vec![0, 1, 2],
            ),
        ];
        for case in cases {
            assert!(matches!(case, Err(LifecycleError::MalformedGeometry(_))));
        }
    }
}
