//! # edgequake-img2txt
//!
//! Transcribe scanned page images to plain text with a Vertex AI multimodal
//! model.
//!
//! ## Why this crate?
//!
//! Classic OCR engines stumble on textbook scans: two-column layouts, inline
//! formulae, captions wrapped around figures. A vision model reads the page
//! the way a person does. This crate handles the plumbing around it:
//! preparing the image, authenticating, consuming the streamed answer,
//! counting tokens and keeping one bad page from sinking a batch.
//!
//! ## Pipeline Overview
//!
//! ```text
//! data/input/*.jpg|png|…
//!  │
//!  ├─ 1. Prepare  decode, cap at 1024×1024, JPEG q85, base64
//!  ├─ 2. Request  prompt + inline image → :streamGenerateContent
//!  ├─ 3. Consume  SSE lines (or one JSON document) → text + usage
//!  ├─ 4. Write    <stem>_extracted.txt, atomically
//!  ├─ 5. Wait     request_delay between files (5 s), none after the last
//!  └─ 6. Report   extraction_summary.txt with tokens and cost estimate
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_img2txt::{process_folder, ExtractionClient, ExtractorConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractorConfig::builder()
//!         .project_id("my-project")
//!         .credentials_path("service-account.json")
//!         .build()?;
//!     let client = ExtractionClient::new(config)?;
//!     let summary = process_folder(&client, Path::new("data/input"), Path::new("data/output"), None).await?;
//!     eprintln!("{} ok, {} failed, ~${:.4}",
//!         summary.succeeded(), summary.failed(), summary.estimated_cost());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `img2txt` binary (clap + anyhow + tracing-subscriber + indicatif + dotenvy) |
//!
//! ```toml
//! edgequake-img2txt = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod auth;
pub mod batch;
pub mod client;
pub mod config;
pub mod diagnose;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod usage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use auth::{ServiceAccountTokenSource, StaticToken, TokenSource};
pub use batch::{extract_single, process_folder, process_folder_sync, SingleExtraction};
pub use client::{Extraction, ExtractionClient};
pub use config::{ExtractorConfig, ExtractorConfigBuilder, ResponseMode};
pub use diagnose::{probe_endpoints, DiagnosticReport, ProbeOutcome};
pub use error::{FileError, Img2TxtError};
pub use output::{FileOutcome, FileReport, RunSummary};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use usage::{RunAccumulator, TokenUsage};
