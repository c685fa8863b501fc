use thiserror::Error;

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Verify,
    Expand,
    Filter,
    Store,
    Other,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Verify => "verify",
            Stage::Expand => "expand",
            Stage::Filter => "filter",
            Stage::Store => "store",
            Stage::Other => "other",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum AssetError {
    // Input errors
    #[error("Invalid asset: {0}")]
    InvalidSpec(String),

    // Fetch errors
    #[error("Fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    // Verify errors
    #[error("Checksum mismatch: expected {expected}, computed {actual}")]
    Verify { expected: String, actual: String },

    // Expand errors
    #[error("File type \"{mime}\" does not appear valid (supported: tar, gzip-compressed tar)")]
    UnsupportedArchive { mime: String },

    #[error("Expand failed: {0}")]
    Expand(String),

    // Filter errors
    #[error("Filter \"{expression}\" could not be evaluated: {reason}")]
    FilterEvaluation { expression: String, reason: String },

    // Store errors
    #[error("Asset store error: {0}")]
    Store(String),

    #[error("Asset store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl AssetError {
    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        AssetError::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Which stage of the install the error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            AssetError::Fetch { .. } => Stage::Fetch,
            AssetError::Verify { .. } => Stage::Verify,
            AssetError::UnsupportedArchive { .. } | AssetError::Expand(_) => Stage::Expand,
            AssetError::FilterEvaluation { .. } => Stage::Filter,
            AssetError::Store(_) | AssetError::Sqlite(_) => Stage::Store,
            _ => Stage::Other,
        }
    }
}

pub type Result<T> = std::result::Result<T, AssetError>;
