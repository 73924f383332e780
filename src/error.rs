use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration field `{field}` is missing or empty")]
    Configuration { field: &'static str },

    #[error("no authorization callback registered")]
    CallbackMissing,

    #[error("authorization callback failed: {message}")]
    Callback { message: String },

    #[error("credential file not found at {path}")]
    CredentialFileMissing { path: PathBuf },

    #[error("credential file at {path} could not be parsed: {message}")]
    CredentialFileInvalid { path: PathBuf, message: String },

    #[error("token file at {path} is corrupt: {message}")]
    TokenFileCorrupt { path: PathBuf, message: String },

    #[error("provider rejected the installed token: {message}")]
    TokenInstallRejected { message: String },

    #[error("token directory {path} is not writable")]
    NotWritable { path: PathBuf },

    #[error("token is expired and no refresh token is stored")]
    RefreshTokenMissing,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("os rng error: {message}")]
    OsRng { message: String },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("invalid token response: {message}")]
    InvalidResponse { message: String, body: String },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Failures the acquisition loop may answer with a single forced-refresh
    /// retry. Everything else is fatal on first occurrence.
    pub(crate) fn is_self_healing(&self) -> bool {
        matches!(
            self,
            Error::TokenFileCorrupt { .. } | Error::TokenInstallRejected { .. }
        )
    }
}
