use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by every INTERLOCK crate.
///
/// Background tasks route these into the status registry; synchronous API
/// handlers render them as `{"status": "KO", "response": [<message>]}`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),

    #[error("invalid session")]
    InvalidSession,

    #[error("path traversal detected")]
    InvalidPath,

    #[error("{0}")]
    Denied(String),

    #[error("password < 8 characters")]
    BadPassword,

    #[error("{0}")]
    Unsupported(String),

    #[error("saved key is unusable: {0}")]
    KeyUnusable(String),

    #[error("{0}")]
    IntegrityFailure(String),

    #[error("HSM unavailable: {0}")]
    HsmUnavailable(String),

    #[error("{0}")]
    HsmIntegrity(String),

    #[error("{0}")]
    ExternalTool(String),

    #[error("invalid method")]
    NotFound,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn unsupported(what: &str) -> Self {
        Error::Unsupported(format!("cipher does not support {what}"))
    }
}
