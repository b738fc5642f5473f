use thiserror::Error;

/// Errors returned by buckets, backends and the registry.
///
/// The first four variants are domain errors: they describe a mismatch between
/// the caller and the stored state and are never worth retrying. `Transport`
/// is the only kind a caller may reasonably retry, and only when the
/// operation is known to be idempotent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BucketError {
    #[error("backend not found: {0}")]
    BackendNotFound(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),

    /// The channel to a remote backend failed before the server answered.
    /// For writes the outcome is unknown.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote backend answered with a failure status.
    #[error("remote error ({code}): {message}")]
    Remote { code: String, message: String },

    /// The backend or bucket handle has been closed.
    #[error("closed: {0}")]
    Closed(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Failure inside a local store.
    #[error("storage error: {0}")]
    Storage(String),
}

impl BucketError {
    /// Whether this error reflects a contract-level condition rather than a
    /// failure of the machinery underneath.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            BucketError::BackendNotFound(_)
                | BucketError::KeyNotFound(_)
                | BucketError::BucketNotFound(_)
                | BucketError::BucketAlreadyExists(_)
        )
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, BucketError::Transport(_))
    }
}

pub type Result<T, E = BucketError> = std::result::Result<T, E>;
