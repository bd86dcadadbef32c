//! Error types for the lifecycle core and its backends.
//!
//! Two layers, mirroring how the work is split:
//! - [`BackendError`] is what a native driver call can fail with.
//! - [`LifecycleError`] is what callers of the core see. Invariant violations
//!   (use after free, malformed geometry, backend mismatch) always surface here
//!   as hard errors. Recoverable conditions such as a double destroy never
//!   become an error value; they are reported through
//!   [`Diagnostics`](crate::diagnostics::Diagnostics) instead.

use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Failed to create vertex array: {0}")]
    VertexArrayCreationFailed(String),
    #[error("Unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u64 },
    #[error("Invalid backend state: {0}")]
    InvalidState(String),
    #[error("Feature not supported: {0}")]
    FeatureNotSupported(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Errors surfaced by resources, meshes, models and the render context.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The object exists but has not been set up yet.
    #[error("{0} is not ready: setup has not run")]
    NotReady(String),
    /// The object was freed and cannot be used any more.
    #[error("{0} was freed")]
    WasFreed(String),
    /// `generate_handles` ran twice on the same model.
    #[error("vertex array of model '{0}' is final and cannot be regenerated")]
    VaoIsFinal(String),
    /// `free` ran twice on the same model.
    #[error("model '{0}' was already freed")]
    ModelAlreadyFreed(String),
    /// Build or draw found no data and the policy is `Throw`.
    #[error("{operation} of '{label}' found no data")]
    EmptyData {
        operation: &'static str,
        label: String,
    },
    #[error("malformed geometry: {0}")]
    MalformedGeometry(String),
    /// Backend mismatch and other broken invariants.
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("{kind} '{label}' was used after it was destroyed")]
    UseAfterDestroy { kind: &'static str, label: String },
    #[error("{kind} {id} is already registered")]
    AlreadyRegistered { kind: &'static str, id: u64 },
    #[error("value {value} does not fit in {target}")]
    Overflow { value: u128, target: &'static str },
    #[error("range {offset}..{offset}+{len} exceeds size {size} of '{label}'")]
    OutOfRange {
        label: String,
        offset: u64,
        len: u64,
        size: u64,
    },
    #[error("failed to read resource stream: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Convert between integer widths, failing loudly instead of truncating.
pub(crate) fn checked_cast<T, U>(value: T, target: &'static str) -> Result<U>
where
    T: Copy,
    U: TryFrom<T>,
    u128: TryFrom<T>,
{
    U::try_from(value).map_err(|_| LifecycleError::Overflow {
        value: u128::try_from(value).unwrap_or(u128::MAX),
        target,
    })
}
