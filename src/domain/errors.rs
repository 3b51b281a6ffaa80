use thiserror::Error;

/// Why the provider resolver gave up on an episode. Replaces the original's
/// substring matching over exception messages (`"No provider found for
/// language" in str(e)`) with variants a caller can match on directly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("Sprache nicht verfügbar: {requested}. Verfügbar: {joined}", joined = available.join(", "))]
    LanguageUnavailable {
        requested: String,
        available: Vec<String>,
    },
    #[error("no provider yielded a usable url (tried: {tried:?})")]
    NoProviderYieldedUrl { tried: Vec<String> },
}

/// Why a scheduled download did not reach `completed`. `Cancelled` replaces
/// the original's `"Cancel" in str(exc)` check.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    LanguageUnavailable(#[from] ResolverError),

    #[error("filesystem permission error: {0}")]
    FilesystemPermission(String),

    #[error("upstream error: {0}")]
    Upstream(#[source] anyhow::Error),
}

impl DownloadError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}

/// Errors raised while building or parsing a magnet URI.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MagnetError {
    #[error("not a magnet uri")]
    NotAMagnet,

    #[error("magnet contains mixed prefixes: aw_ and sto_")]
    MixedPrefixes,

    #[error("missing param: {0}")]
    MissingParam(String),
}
