//! Error taxonomy for the crawl engine.
//!
//! Field-level problems never show up here; they degrade the field and are
//! recorded as [`crate::extract::Diagnostic`]s instead. These errors abort at
//! most the current item.

use thiserror::Error;

/// Coarse error classification, carried by download outcomes and crawl summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    ParseFailure,
    SessionInvalid,
    ManifestNotFound,
    DownloadFailed,
    UploadFailed,
    ConfigMismatch,
    Interrupted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::ParseFailure => "parse_failure",
            ErrorKind::SessionInvalid => "session_invalid",
            ErrorKind::ManifestNotFound => "manifest_not_found",
            ErrorKind::DownloadFailed => "download_failed",
            ErrorKind::UploadFailed => "upload_failed",
            ErrorKind::ConfigMismatch => "config_mismatch",
            ErrorKind::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the crawl engine.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse failure: {0}")]
    ParseFailure(String),

    #[error("Automation session unusable: {0}")]
    SessionInvalid(String),

    #[error("No stream manifest found for {0}")]
    ManifestNotFound(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Configuration mismatch: {0}")]
    ConfigMismatch(String),

    #[error("Interrupted")]
    Interrupted,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScrapeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScrapeError::NotFound(_) => ErrorKind::NotFound,
            ScrapeError::ParseFailure(_) => ErrorKind::ParseFailure,
            ScrapeError::SessionInvalid(_) => ErrorKind::SessionInvalid,
            ScrapeError::ManifestNotFound(_) => ErrorKind::ManifestNotFound,
            ScrapeError::DownloadFailed(_) | ScrapeError::Http(_) | ScrapeError::Io(_) => {
                ErrorKind::DownloadFailed
            }
            ScrapeError::UploadFailed(_) => ErrorKind::UploadFailed,
            ScrapeError::ConfigMismatch(_) => ErrorKind::ConfigMismatch,
            ScrapeError::Interrupted => ErrorKind::Interrupted,
        }
    }

    /// Rebuild an error from a classification carried by an outcome.
    pub fn from_kind(kind: ErrorKind, context: impl Into<String>) -> Self {
        let context = context.into();
        match kind {
            ErrorKind::NotFound => ScrapeError::NotFound(context),
            ErrorKind::ParseFailure => ScrapeError::ParseFailure(context),
            ErrorKind::SessionInvalid => ScrapeError::SessionInvalid(context),
            ErrorKind::ManifestNotFound => ScrapeError::ManifestNotFound(context),
            ErrorKind::DownloadFailed => ScrapeError::DownloadFailed(context),
            ErrorKind::UploadFailed => ScrapeError::UploadFailed(context),
            ErrorKind::ConfigMismatch => ScrapeError::ConfigMismatch(context),
            ErrorKind::Interrupted => ScrapeError::Interrupted,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            ScrapeError::ManifestNotFound("x".into()).kind(),
            ErrorKind::ManifestNotFound
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(ScrapeError::from(io).kind(), ErrorKind::DownloadFailed);
        assert_eq!(ScrapeError::Interrupted.kind().as_str(), "interrupted");
        assert!(matches!(
            ScrapeError::from_kind(ErrorKind::UploadFailed, "share"),
            ScrapeError::UploadFailed(_)
        ));
    }
}
