//! Progress-callback trait for per-file batch events.
//!
//! Pass an [`Arc<dyn BatchProgressCallback>`] to
//! [`crate::batch::process_folder`] to receive events as the folder is
//! processed. The CLI uses it to drive an `indicatif` progress bar; a server
//! could forward the same events to a channel or a database row.
//!
//! # Example
//!
//! ```rust
//! use edgequake_img2txt::BatchProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, index: usize, total: usize, filename: &str, chars: usize) {
//!         let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done}: [{index}/{total}] {filename} ({chars} chars)");
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

/// Called by the folder processor as it works through the images.
///
/// Files are processed one at a time, so events for one run never overlap.
/// All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once after the directory listing, before the first request.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called before an image is prepared and sent.
    ///
    /// # Arguments
    /// * `index` — 1-indexed position in the sorted listing
    /// * `total` — number of images in the run
    fn on_file_start(&self, index: usize, total: usize, filename: &str) {
        let _ = (index, total, filename);
    }

    /// Called when an image's text was extracted and written.
    ///
    /// `chars` is the character count of the trimmed text.
    fn on_file_complete(&self, index: usize, total: usize, filename: &str, chars: usize) {
        let _ = (index, total, filename, chars);
    }

    /// Called when an image failed; the run continues with the next one.
    fn on_file_error(&self, index: usize, total: usize, filename: &str, error: &str) {
        let _ = (index, total, filename, error);
    }

    /// Called before the pause between two consecutive files.
    fn on_waiting(&self, delay: Duration) {
        let _ = delay;
    }

    /// Called once after every image has been attempted.
    fn on_batch_complete(&self, total_files: usize, success_count: usize) {
        let _ = (total_files, success_count);
    }
}

/// Default when no callback is supplied.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
