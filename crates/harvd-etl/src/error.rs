use thiserror::Error;

/// Failure inside the Extract stage.
#[derive(Debug, Error)]
#[error("extraction failed: {message}")]
pub struct ExtractorError {
    pub message: String,
}

impl ExtractorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Failure inside the Transform stage.
#[derive(Debug, Error)]
#[error("transformation failed: {message}")]
pub struct TransformerError {
    pub message: String,
}

impl TransformerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Failure inside the Load stage.
#[derive(Debug, Error)]
#[error("loading failed: {message}")]
pub struct LoaderError {
    pub message: String,
}

impl LoaderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Errors surfaced by pipelines and the manager outside the stage loop.
#[derive(Debug, Error)]
pub enum EtlError {
    /// A harvest was requested but cannot start.
    #[error("harvest precondition failed: {0}")]
    Precondition(String),

    /// A harvest is already running.
    #[error("a harvest is already running")]
    Busy,

    #[error(transparent)]
    Extractor(#[from] ExtractorError),

    #[error(transparent)]
    Transformer(#[from] TransformerError),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("json error in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
