//! Folder processing: every image in a directory, one after another.
//!
//! ```text
//! input_dir ──▶ collect_images ──▶ for each (sorted by name):
//!                                    extract ──▶ <stem>_extracted.txt
//!                                    sleep(request_delay)   (not after the last)
//!                                  ──▶ extraction_summary.txt
//! ```
//!
//! Files are processed strictly sequentially. A per-file failure (corrupt
//! image, HTTP error for one request) is recorded in the [`RunSummary`] and
//! the run moves on; a fatal error (no credentials, token refresh refused)
//! aborts the run with `Err`.

use crate::client::{Extraction, ExtractionClient};
use crate::error::{FileError, Img2TxtError};
use crate::output::{FileOutcome, FileReport, RunSummary, EXTRACTED_SUFFIX, SUMMARY_FILE_NAME};
use crate::progress::ProgressCallback;
use crate::prompts::PROMPT_VERSION;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Recognised image extensions, compared case-insensitively.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tiff"];

/// Suffix of the file written by [`extract_single`].
pub const SMOKE_TEST_SUFFIX: &str = "_test.txt";

/// Whether `path` has one of [`IMAGE_EXTENSIONS`].
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// List the images directly inside `dir`, sorted by file name.
///
/// Subdirectories are not descended into.
pub fn collect_images(dir: &Path) -> Result<Vec<PathBuf>, Img2TxtError> {
    if !dir.is_dir() {
        return Err(Img2TxtError::InputDirNotFound {
            path: dir.to_path_buf(),
        });
    }
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Img2TxtError::Internal(format!("cannot list {}: {e}", dir.display()))
    })?;

    let mut images: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_image_file(p))
        .collect();
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(images)
}

/// `page1.jpg` → `<output_dir>/page1_extracted.txt`.
pub fn extraction_output_path(output_dir: &Path, image: &Path) -> PathBuf {
    output_dir.join(format!("{}{}", file_stem(image), EXTRACTED_SUFFIX))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Write `contents` to `path` atomically (temp file in the same directory,
/// then rename). An existing file is replaced.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), Img2TxtError> {
    let write_err = |source: std::io::Error| Img2TxtError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(contents.as_bytes()).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Extract the text of every image in `input_dir` and write one text file
/// per image plus [`SUMMARY_FILE_NAME`] into `output_dir`.
///
/// Waits `client.config().request_delay` between consecutive files.
///
/// # Errors
/// Only fatal errors: missing input directory, authentication failure, or an
/// unwritable summary. Everything else lands in the returned summary.
pub async fn process_folder(
    client: &ExtractionClient,
    input_dir: &Path,
    output_dir: &Path,
    progress: Option<ProgressCallback>,
) -> Result<RunSummary, Img2TxtError> {
    let start = Instant::now();
    let images = collect_images(input_dir)?;
    std::fs::create_dir_all(output_dir).map_err(|e| Img2TxtError::OutputWriteFailed {
        path: output_dir.to_path_buf(),
        source: e,
    })?;

    let total = images.len();
    if total == 0 {
        warn!("No image files found in {}", input_dir.display());
    } else {
        info!("Found {} images to process", total);
    }
    if let Some(ref cb) = progress {
        cb.on_batch_start(total);
    }

    let delay = client.config().request_delay;
    let mut files = Vec::with_capacity(total);

    for (i, image) in images.iter().enumerate() {
        let index = i + 1;
        let name = file_name(image);
        info!("Processing {} ({}/{})", name, index, total);
        if let Some(ref cb) = progress {
            cb.on_file_start(index, total, &name);
        }

        let outcome = match process_one(client, image, output_dir).await {
            Ok((extraction, output_path)) => {
                let chars = extraction.text.chars().count();
                info!("Saved extracted text to {}", output_path.display());
                if let Some(ref cb) = progress {
                    cb.on_file_complete(index, total, &name, chars);
                }
                FileOutcome::Success {
                    text: extraction.text,
                    usage: extraction.usage,
                    output_path,
                }
            }
            Err(err) => {
                let recorded = FileError::from_error(&name, err)?;
                error!("Error processing {}: {}", name, recorded);
                if let Some(ref cb) = progress {
                    cb.on_file_error(index, total, &name, &recorded.to_string());
                }
                FileOutcome::Failure { error: recorded }
            }
        };
        files.push(FileReport {
            filename: name,
            outcome,
        });

        if index < total && !delay.is_zero() {
            debug!("Waiting {:?} before next request", delay);
            if let Some(ref cb) = progress {
                cb.on_waiting(delay);
            }
            tokio::time::sleep(delay).await;
        }
    }

    let summary = RunSummary {
        files,
        totals: client.totals(),
        price_per_million_tokens: client.config().price_per_million_tokens,
        model: client.config().model.clone(),
        prompt_version: PROMPT_VERSION.to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    };

    let summary_path = output_dir.join(SUMMARY_FILE_NAME);
    write_atomic(&summary_path, &summary.render())?;
    info!("Summary saved to {}", summary_path.display());

    if let Some(ref cb) = progress {
        cb.on_batch_complete(total, summary.succeeded());
    }
    Ok(summary)
}

async fn process_one(
    client: &ExtractionClient,
    image: &Path,
    output_dir: &Path,
) -> Result<(Extraction, PathBuf), Img2TxtError> {
    let extraction = client.extract(image).await?;
    let output_path = extraction_output_path(output_dir, image);
    write_atomic(&output_path, &extraction.text)?;
    Ok((extraction, output_path))
}

/// Synchronous wrapper around [`process_folder`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_folder_sync(
    client: &ExtractionClient,
    input_dir: &Path,
    output_dir: &Path,
) -> Result<RunSummary, Img2TxtError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Img2TxtError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(process_folder(client, input_dir, output_dir, None))
}

/// Result of a single-image smoke test.
#[derive(Debug, Clone)]
pub struct SingleExtraction {
    pub image: PathBuf,
    pub output_path: PathBuf,
    pub extraction: Extraction,
}

/// Extract one image and save it as `<stem>_test.txt` in `output_dir`.
///
/// With `image = None` the first image (by name) in `input_dir` is used.
/// Unlike [`process_folder`], every error is returned.
pub async fn extract_single(
    client: &ExtractionClient,
    image: Option<&Path>,
    input_dir: &Path,
    output_dir: &Path,
) -> Result<SingleExtraction, Img2TxtError> {
    let image = match image {
        Some(p) => p.to_path_buf(),
        None => collect_images(input_dir)?
            .into_iter()
            .next()
            .ok_or_else(|| Img2TxtError::NoImagesFound {
                path: input_dir.to_path_buf(),
            })?,
    };
    info!("Testing with image: {}", image.display());

    let extraction = client.extract(&image).await?;
    let output_path = output_dir.join(format!("{}{}", file_stem(&image), SMOKE_TEST_SUFFIX));
    write_atomic(&output_path, &extraction.text)?;
    info!("Saved extracted text to {}", output_path.display());

    Ok(SingleExtraction {
        image,
        output_path,
        extraction,
    })
}
