//! Image preparation: scan on disk → resized JPEG → base64 [`EncodedImage`].
//!
//! Scans come in every shape: 16-bit TIFFs, palette GIFs, RGBA PNGs exported
//! from a phone. The API only needs a readable rendition, so every input is
//! normalised to RGB (or kept as 8-bit grayscale), capped at the configured
//! size and recompressed as JPEG. A 1024 px page is plenty for a
//! vision model to read body text and keeps the request body well under the
//! inline-data limit.

use crate::config::ExtractorConfig;
use crate::error::Img2TxtError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use std::path::Path;
use tracing::{debug, info};

/// MIME type of every prepared payload.
pub const JPEG_MIME_TYPE: &str = "image/jpeg";

/// Size and quality limits applied while preparing an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOptions {
    pub max_width: u32,
    pub max_height: u32,
    pub jpeg_quality: u8,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            max_width: 1024,
            max_height: 1024,
            jpeg_quality: 85,
        }
    }
}

impl From<&ExtractorConfig> for ImageOptions {
    fn from(config: &ExtractorConfig) -> Self {
        Self {
            max_width: config.max_image_width,
            max_height: config.max_image_height,
            jpeg_quality: config.jpeg_quality,
        }
    }
}

/// A base64 JPEG ready to be inlined in a request body.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// Standard-alphabet base64 of the JPEG bytes.
    pub data: String,
    pub mime_type: &'static str,
    /// Pixel size of the encoded rendition (after any downscale).
    pub width: u32,
    pub height: u32,
}

/// Load the image at `path` and encode it for upload.
///
/// Decoding sniffs the content rather than trusting the extension, so a PNG
/// saved as `.jpg` still loads. Any failure is returned as
/// [`Img2TxtError::ImagePreparation`]; isolating it to one file is the
/// caller's job.
pub fn prepare_image(path: &Path, options: &ImageOptions) -> Result<EncodedImage, Img2TxtError> {
    info!("Preparing image: {}", path.display());

    let fail = |detail: String| Img2TxtError::ImagePreparation {
        path: path.to_path_buf(),
        detail,
    };

    let img = ImageReader::open(path)
        .map_err(|e| fail(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| fail(e.to_string()))?
        .decode()
        .map_err(|e| fail(e.to_string()))?;

    let encoded = encode_image(img, options).map_err(|e| fail(e.to_string()))?;
    info!(
        "Image prepared successfully. Size: {} bytes",
        encoded.data.len()
    );
    Ok(encoded)
}

/// Normalise, downscale and JPEG-encode an in-memory image.
pub fn encode_image(
    img: DynamicImage,
    options: &ImageOptions,
) -> Result<EncodedImage, image::ImageError> {
    let img = normalise_color(img);
    let img = fit_within(img, options.max_width, options.max_height);
    let (width, height) = img.dimensions();

    let mut buf = Vec::new();
    let quality = options.jpeg_quality.clamp(1, 100);
    img.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;

    let data = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} JPEG (q={}) → {} bytes base64",
        width,
        height,
        quality,
        data.len()
    );

    Ok(EncodedImage {
        data,
        mime_type: JPEG_MIME_TYPE,
        width,
        height,
    })
}

/// Keep 8-bit RGB and 8-bit grayscale as they are; everything else
/// (alpha, 16-bit, float) becomes 8-bit RGB. JPEG has no alpha channel.
fn normalise_color(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => img,
        other => {
            debug!("Converted {:?} image to RGB", other.color());
            DynamicImage::ImageRgb8(other.to_rgb8())
        }
    }
}

/// Downscale so neither side exceeds its limit, preserving aspect ratio.
/// Images already within bounds are returned untouched (never upscaled).
fn fit_within(img: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w <= max_width && h <= max_height {
        return img;
    }
    let resized = img.resize(max_width, max_height, FilterType::Lanczos3);
    debug!(
        "Resized image from {}x{} to {}x{}",
        w,
        h,
        resized.width(),
        resized.height()
    );
    resized
}
