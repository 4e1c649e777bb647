use thiserror::Error;

/// Every way a fetch-and-archive invocation can fail. None of them are retried.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("expected {expected} arguments, received {received}")]
    InvalidArgumentCount { expected: usize, received: usize },
    #[error("invalid log type '{value}'")]
    InvalidLogCategory { value: String, valid: Vec<String> },
    #[error("HTTP {status}")]
    RemoteFetch { status: u16, body: String },
    #[error("archive write failed: {0}")]
    ArchiveWrite(String),
    #[error("credential configuration error: {0}")]
    CredentialConfiguration(String),
    #[error("log request failed: {0}")]
    Transport(String),
    #[error("request signing failed: {0}")]
    Signing(String),
}

impl ArchiveError {
    /// Maps a failure of the upload transport into the write phase of the taxonomy.
    pub fn write(cause: impl std::fmt::Display) -> Self {
        ArchiveError::ArchiveWrite(cause.to_string())
    }
}

impl From<object_store::Error> for ArchiveError {
    fn from(e: object_store::Error) -> Self {
        ArchiveError::ArchiveWrite(e.to_string())
    }
}
