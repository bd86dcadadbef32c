//! Deduplicating mesh cache.

use indexmap::IndexSet;

use crate::error::{checked_cast, LifecycleError, Result};

use super::{MeshSubmission, Vertex};

/// Accumulated submissions with a lazily rebuilt, deduplicated vertex and
/// index cache.
///
/// The caches are in sync with the submissions whenever the data is not
/// dirty; every mutation marks it dirty and the next read rebuilds.
/// Canonical indices are recomputed from scratch on each rebuild and are not
/// stable across rebuilds.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    submissions: Vec<MeshSubmission>,
    vertex_cache: Vec<Vertex>,
    index_cache: Vec<u32>,
    dirty: bool,
}

impl MeshData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a submission. Every submission must share the arity of the first.
    pub fn add(&mut self, submission: MeshSubmission) -> Result<()> {
        if let Some(first) = self.submissions.first() {
            if first.arity() != submission.arity() {
                return Err(LifecycleError::MalformedGeometry(format!(
                    "submission has {} components per vertex, mesh has {}",
                    submission.arity(),
                    first.arity()
                )));
            }
        }
        self.submissions.push(submission);
        self.dirty = true;
        Ok(())
    }

    /// Drop every submission.
    pub fn clear(&mut self) {
        self.submissions.clear();
        self.dirty = true;
    }

    pub fn submissions(&self) -> &[MeshSubmission] {
        &self.submissions
    }

    pub fn is_empty(&self) -> bool {
        self.submissions.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Components per vertex, if any submission exists.
    pub fn arity(&self) -> Option<usize> {
        self.submissions.first().map(MeshSubmission::arity)
    }

    pub fn get_vertices(&mut self) -> Result<&[Vertex]> {
        if self.dirty {
            self.rebuild()?;
        }
        Ok(&self.vertex_cache)
    }

    pub fn get_indices(&mut self) -> Result<&[u32]> {
        if self.dirty {
            self.rebuild()?;
        }
        Ok(&self.index_cache)
    }

    /// Rebuilt caches, both at once.
    pub fn get(&mut self) -> Result<(&[Vertex], &[u32])> {
        if self.dirty {
            self.rebuild()?;
        }
        Ok((&self.vertex_cache, &self.index_cache))
    }

    /// Collapse identical vertex tuples across all submissions.
    ///
    /// Vertices enter the canonical list in submission order, each distinct
    /// tuple at its first occurrence. Every source index is then replaced
    /// through its submission's local-to-canonical table, so triangle order
    /// is preserved within and across submissions.
    pub fn rebuild(&mut self) -> Result<()> {
        let mut canonical: IndexSet<Vertex> = IndexSet::new();
        let mut indices = Vec::with_capacity(self.submissions.iter().map(|s| s.indices().len()).sum());

        for submission in &self.submissions {
            let remap = submission
                .vertices()
                .iter()
                .map(|vertex| checked_cast(canonical.insert_full(vertex.clone()).0, "u32"))
                .collect::<Result<Vec<u32>>>()?;
            // Indices were bounds-checked when the submission was built.
            indices.extend(submission.indices().iter().map(|&index| remap[index as usize]));
        }

        self.vertex_cache = canonical.into_iter().collect();
        self.index_cache = indices;
        self.dirty = false;
        Ok(())
    }
}
