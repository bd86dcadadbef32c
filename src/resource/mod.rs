//! GPU resources and their destroy contract.
//!
//! Every resource owns a [`ResourceHandle`]. Destroying an already destroyed
//! resource is never fatal: it is reported as a warning and performs no
//! backend call. Using a destroyed resource is always an error.

mod handle;
mod manager;
mod program;
mod texture;
mod vertex_array;

pub use handle::ResourceHandle;
pub use manager::ResourceManager;
pub use program::ShaderProgram;
pub use texture::Texture;
pub use vertex_array::VertexArray;

use crate::backend::{BackendKind, GpuBackend, ResourceId};
use crate::diagnostics::Diagnostics;
use crate::error::{BackendResult, LifecycleError, Result};

/// A GPU object with the idempotent destroy contract.
pub trait GpuResource {
    type Id: ResourceId;

    fn handle(&self) -> &ResourceHandle<Self::Id>;

    fn handle_mut(&mut self) -> &mut ResourceHandle<Self::Id>;

    /// Backend-specific teardown. Called at most once per resource.
    fn release(&mut self, backend: &mut dyn GpuBackend) -> BackendResult<()>;

    fn id(&self) -> Self::Id {
        self.handle().id()
    }

    fn label(&self) -> &str {
        self.handle().label()
    }

    fn is_destroyed(&self) -> bool {
        self.handle().is_destroyed()
    }

    /// Tear the resource down once; later calls warn and do nothing.
    ///
    /// A failed teardown leaves the resource alive.
    fn destroy(&mut self, backend: &mut dyn GpuBackend, diag: &Diagnostics) -> Result<()> {
        let id = self.id();
        if self.is_destroyed() {
            diag.warn(format_args!(
                "{} '{}' ({id}) is already destroyed",
                Self::Id::KIND,
                self.label()
            ));
            return Ok(());
        }

        self.release(backend)?;
        self.handle_mut().mark_destroyed();
        diag.trace(format_args!(
            "destroyed {} '{}' ({id})",
            Self::Id::KIND,
            self.label()
        ));
        Ok(())
    }
}

pub(crate) fn log_created<I: ResourceId>(diag: &Diagnostics, label: &str, id: I) {
    diag.trace(format_args!("created {} '{label}' ({id})", I::KIND));
}

/// Reject an operation against a resource created for another backend.
pub(crate) fn ensure_backend(
    created_for: BackendKind,
    backend: &dyn GpuBackend,
    label: &str,
) -> Result<()> {
    let active = backend.kind();
    if created_for != active {
        return Err(LifecycleError::IllegalState(format!(
            "'{label}' was created for {created_for}, active backend is {active}"
        )));
    }
    Ok(())
}
