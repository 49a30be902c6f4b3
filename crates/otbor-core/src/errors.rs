use crate::slots::RegistryError;

/// Core error type.
///
/// Adapter crates should map their specific errors into this type so the bot
/// core can handle failures consistently (user-facing message vs retryable).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A uniqueness rule of the admin directory was violated (duplicate slug, admin, ...).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Transient infrastructure fault (database, cache). Safe to retry.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        match self {
            Error::StoreUnavailable(_) => true,
            Error::Registry(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
