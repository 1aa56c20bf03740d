use thiserror::Error;

/// Failures at the persistence boundary. `Unavailable` is recoverable by
/// falling back to the built-in defaults; `WriteFailed` leaves pending
/// edits staged so the caller can retry the commit.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{medium} backend unavailable: {message}")]
    Unavailable {
        medium: &'static str,
        message: String,
    },

    #[error("{medium} backend write failed: {message}")]
    WriteFailed {
        medium: &'static str,
        message: String,
    },
}

/// Failures inside the metrics store itself.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A flat key with no site separator. Recoverable: a whole table of
    /// these is a legacy single-site table and triggers migration; a
    /// stray one is skipped during load.
    #[error("flat key missing site separator: {key}")]
    MalformedKey { key: String },

    #[error("unknown metric group: {name}")]
    UnknownGroup { name: String },

    #[error("{kind} name must not be empty or contain the site separator: {name:?}")]
    InvalidName { kind: &'static str, name: String },

    #[error("reload would discard unsaved edits; commit or discard them first")]
    PendingEditsWouldBeLost,

    #[error(transparent)]
    Backend(#[from] BackendError),
}
