use thiserror::Error;

/// Tagged error taxonomy of the scaling core. Adapter errors never crash
/// the process; they surface on the owning target's conditions.
#[derive(Debug, Error)]
pub enum ScaleError {
    /// The declarative object is malformed or names an unknown adapter;
    /// not retried until the spec changes.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A referenced secret, config map or credential is missing; retried
    /// on the next poll.
    #[error("resolution failed: {0}")]
    ResolutionFailed(String),

    /// Recoverable backend failure (timeout, 5xx, temporary DNS); feeds
    /// the fallback counter.
    #[error("transient backend error: {0}")]
    TransientBackend(String),

    /// The backend rejected us in a way retries will not fix.
    #[error("fatal backend error: {0}")]
    FatalBackend(String),

    /// The target's generation changed mid-evaluation; the result is
    /// discarded silently.
    #[error("generation changed during evaluation")]
    Conflict,

    /// The enclosing context was cancelled.
    #[error("shutting down")]
    ShuttingDown,
}

impl ScaleError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScaleError::TransientBackend(_) | ScaleError::ResolutionFailed(_)
        )
    }
}
