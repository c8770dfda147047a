//! Error types for the edgequake-img2txt library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Img2TxtError`] — everything the library can return as `Err`. Some
//!   variants are **fatal** (missing project, bad credentials, token refresh
//!   failure): no image can be processed without them, so the batch stops.
//!   The rest are **per-file** (corrupt image, HTTP 403 for one request):
//!   [`Img2TxtError::is_fatal`] tells the folder processor which is which.
//!
//! * [`FileError`] — the recorded form of a per-file failure. Stored inside
//!   [`crate::output::FileOutcome::Failure`] so one bad scan shows up in the
//!   run summary instead of taking the whole batch down with it.
//!
//! Malformed response chunks are not errors at all: the parser skips them and
//! counts them in [`crate::pipeline::response::ParsedResponse::skipped_chunks`].

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the edgequake-img2txt library.
#[derive(Debug, Error)]
pub enum Img2TxtError {
    // ── Config errors (fatal) ─────────────────────────────────────────────
    /// A setting the client cannot run without is absent.
    #[error("Missing required setting {name}.\n{hint}")]
    MissingSetting { name: &'static str, hint: String },

    /// The configured service-account key file does not exist.
    #[error("Credentials file not found at '{path}'\nSet GOOGLE_APPLICATION_CREDENTIALS to a service-account JSON key.")]
    CredentialsNotFound { path: PathBuf },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The input folder does not exist or is not a directory.
    #[error("Input directory not found: '{path}'")]
    InputDirNotFound { path: PathBuf },

    /// A single-image run was asked to pick an image but the folder has none.
    #[error("No image files found in '{path}'")]
    NoImagesFound { path: PathBuf },

    // ── Auth errors (fatal) ───────────────────────────────────────────────
    /// The identity provider refused to mint a bearer token.
    #[error("Authentication failed: {detail}")]
    Auth { detail: String },

    // ── Per-file errors ───────────────────────────────────────────────────
    /// The image could not be opened, decoded, converted or re-encoded.
    #[error("Failed to prepare image '{path}': {detail}")]
    ImagePreparation { path: PathBuf, detail: String },

    /// The API answered with a non-success HTTP status.
    #[error("API request failed: {status} - {body}")]
    ApiStatus { status: u16, body: String },

    /// The request never produced a response (DNS, TLS, connection reset, …).
    #[error("API transport error: {0}")]
    Transport(String),

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Img2TxtError {
    /// Whether this error should abort a batch rather than be recorded
    /// against the file that triggered it.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Img2TxtError::ImagePreparation { .. }
                | Img2TxtError::ApiStatus { .. }
                | Img2TxtError::Transport(_)
                | Img2TxtError::OutputWriteFailed { .. }
        )
    }
}

impl From<reqwest::Error> for Img2TxtError {
    fn from(e: reqwest::Error) -> Self {
        Img2TxtError::Transport(e.to_string())
    }
}

/// A non-fatal error for a single image file.
///
/// `file` is kept for structured (JSON) output; the `Display` form leaves it
/// out because the summary already prints the file name in front.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum FileError {
    /// The image could not be prepared for upload.
    #[error("image preparation failed: {detail}")]
    Preparation { file: String, detail: String },

    /// The API rejected the request. `body` keeps the full response; the
    /// `Display` form shows only its first meaningful line.
    #[error("API request failed: {status} - {}", brief_body(body))]
    Api {
        file: String,
        status: u16,
        body: String,
    },

    /// Network failure before a response arrived.
    #[error("transport error: {detail}")]
    Transport { file: String, detail: String },

    /// Extracted text could not be saved.
    #[error("could not write output: {detail}")]
    Write { file: String, detail: String },
}

impl FileError {
    /// Convert a per-file [`Img2TxtError`] into its recorded form.
    ///
    /// Fatal errors are handed back unchanged in `Err` so the caller can
    /// propagate them.
    pub fn from_error(file: &str, err: Img2TxtError) -> Result<FileError, Img2TxtError> {
        let file = file.to_string();
        match err {
            Img2TxtError::ImagePreparation { detail, .. } => {
                Ok(FileError::Preparation { file, detail })
            }
            Img2TxtError::ApiStatus { status, body } => Ok(FileError::Api { file, status, body }),
            Img2TxtError::Transport(detail) => Ok(FileError::Transport { file, detail }),
            Img2TxtError::OutputWriteFailed { path, source } => Ok(FileError::Write {
                file,
                detail: format!("{}: {}", path.display(), source),
            }),
            fatal => Err(fatal),
        }
    }
}

/// Longest error body excerpt shown in a one-line message.
const BRIEF_BODY_CHARS: usize = 200;

/// Reduce an HTTP error body to one line: Google's `error.message` when the
/// body is the usual JSON envelope, otherwise the whitespace-collapsed text.
pub fn brief_body(body: &str) -> String {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_owned));
    let text = message.as_deref().unwrap_or(body);
    let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.chars().count() > BRIEF_BODY_CHARS {
        let cut: String = line.chars().take(BRIEF_BODY_CHARS).collect();
        format!("{cut}…")
    } else {
        line
    }
}
