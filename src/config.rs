//! Configuration types for image-to-text extraction.
//!
//! All extraction behaviour is controlled through [`ExtractorConfig`], built
//! via its [`ExtractorConfigBuilder`]. The config is constructed once at
//! startup and handed by reference (or `Arc`) to every component; nothing
//! reads the environment behind its back.
//!
//! Required settings (`project_id`, a credential) are *not* enforced by the
//! builder. A config without them is still useful for the endpoint
//! diagnostic and for dry runs, so missing values only surface as
//! [`ExtractorConfig::startup_warnings`] and fail hard later, inside
//! [`crate::client::ExtractionClient::new`].

use crate::error::Img2TxtError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for an extraction run.
///
/// # Example
/// ```rust
/// use edgequake_img2txt::ExtractorConfig;
///
/// let config = ExtractorConfig::builder()
///     .project_id("my-project")
///     .location("europe-west4")
///     .max_image_size(1024, 1024)
///     .build()
///     .unwrap();
/// assert_eq!(config.jpeg_quality, 85);
/// ```
#[derive(Clone)]
pub struct ExtractorConfig {
    /// Google Cloud project that owns the Vertex AI quota. Required at first use.
    pub project_id: Option<String>,

    /// Vertex AI region, e.g. `us-central1`. Default: `us-central1`.
    pub location: String,

    /// Path to a service-account JSON key.
    pub credentials_path: Option<PathBuf>,

    /// Pre-fetched bearer token (e.g. `gcloud auth print-access-token`).
    /// Takes precedence over `credentials_path`.
    pub access_token: Option<String>,

    /// Model publisher segment of the endpoint path. Default: `google`.
    pub publisher: String,

    /// Model identifier. Default: `gemini-2.0-flash-001`.
    pub model: String,

    /// Override for the API origin (scheme + host). When `None` the regional
    /// host `https://{location}-aiplatform.googleapis.com` is used.
    pub api_base_url: Option<String>,

    /// Maximum tokens the model may generate per image. Default: 4096.
    ///
    /// A dense textbook page runs to 1 500–2 500 output tokens; a low cap
    /// silently truncates the transcription.
    pub max_output_tokens: u32,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Nucleus sampling cut-off. Default: 0.95.
    pub top_p: f32,

    /// Top-k sampling cut-off. Default: 40.
    pub top_k: u32,

    /// Maximum width of the uploaded image in pixels. Default: 1024.
    pub max_image_width: u32,

    /// Maximum height of the uploaded image in pixels. Default: 1024.
    pub max_image_height: u32,

    /// JPEG quality used when re-encoding, 1–100. Default: 85.
    pub jpeg_quality: u8,

    /// Streamed (SSE) or single-document response. Default: [`ResponseMode::Stream`].
    pub response_mode: ResponseMode,

    /// Custom extraction prompt. If None, uses [`crate::prompts::EXTRACTION_PROMPT`].
    pub prompt: Option<String>,

    /// Pause between consecutive files of a batch. Default: 5 s.
    ///
    /// Not applied after the last file. This sleep is the whole rate-limiting
    /// strategy: there is no retry and no adaptive backoff.
    pub request_delay: Duration,

    /// Price in USD per one million tokens used for the cost estimate. Default: 0.075.
    pub price_per_million_tokens: f64,

    /// Folder scanned for images. Default: `data/input`.
    pub input_dir: PathBuf,

    /// Folder receiving `<stem>_extracted.txt` files and the run summary. Default: `data/output`.
    pub output_dir: PathBuf,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            location: "us-central1".to_string(),
            credentials_path: None,
            access_token: None,
            publisher: "google".to_string(),
            model: "gemini-2.0-flash-001".to_string(),
            api_base_url: None,
            max_output_tokens: 4096,
            temperature: 0.1,
            top_p: 0.95,
            top_k: 40,
            max_image_width: 1024,
            max_image_height: 1024,
            jpeg_quality: 85,
            response_mode: ResponseMode::default(),
            prompt: None,
            request_delay: Duration::from_secs(5),
            price_per_million_tokens: 0.075,
            input_dir: PathBuf::from("data/input"),
            output_dir: PathBuf::from("data/output"),
        }
    }
}

impl fmt::Debug for ExtractorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorConfig")
            .field("project_id", &self.project_id)
            .field("location", &self.location)
            .field("credentials_path", &self.credentials_path)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("publisher", &self.publisher)
            .field("model", &self.model)
            .field("api_base_url", &self.api_base_url)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("top_k", &self.top_k)
            .field("max_image_width", &self.max_image_width)
            .field("max_image_height", &self.max_image_height)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("response_mode", &self.response_mode)
            .field("request_delay", &self.request_delay)
            .field("input_dir", &self.input_dir)
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

impl ExtractorConfig {
    /// Create a new builder for `ExtractorConfig`.
    pub fn builder() -> ExtractorConfigBuilder {
        ExtractorConfigBuilder {
            config: Self::default(),
        }
    }

    /// API origin: the override if set, else the regional Vertex AI host.
    pub fn base_url(&self) -> String {
        match self.api_base_url {
            Some(ref url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}-aiplatform.googleapis.com", self.location),
        }
    }

    /// The project ID, or a [`Img2TxtError::MissingSetting`] when unset or blank.
    pub fn require_project(&self) -> Result<&str, Img2TxtError> {
        self.project_id
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| Img2TxtError::MissingSetting {
                name: "GOOGLE_CLOUD_PROJECT",
                hint: "Set it in your environment or .env file.".into(),
            })
    }

    /// Human-readable warnings for settings that will make the first API
    /// call fail. Empty when the config is complete.
    pub fn startup_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.project_id.as_deref().map_or(true, str::is_empty) {
            warnings.push("GOOGLE_CLOUD_PROJECT not set in environment".to_string());
        }
        if self.access_token.is_none() {
            match self.credentials_path {
                None => warnings
                    .push("GOOGLE_APPLICATION_CREDENTIALS not set in environment".to_string()),
                Some(ref path) if !path.exists() => warnings.push(format!(
                    "Credentials file not found at {}",
                    path.display()
                )),
                Some(_) => {}
            }
        }
        warnings
    }
}

/// Builder for [`ExtractorConfig`].
#[derive(Debug)]
pub struct ExtractorConfigBuilder {
    config: ExtractorConfig,
}

impl ExtractorConfigBuilder {
    pub fn project_id(mut self, id: impl Into<String>) -> Self {
        self.config.project_id = Some(id.into());
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.config.location = location.into();
        self
    }

    pub fn credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.credentials_path = Some(path.into());
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.config.access_token = Some(token.into());
        self
    }

    pub fn publisher(mut self, publisher: impl Into<String>) -> Self {
        self.config.publisher = publisher.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = Some(url.into());
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.config.top_p = p.clamp(0.0, 1.0);
        self
    }

    pub fn top_k(mut self, k: u32) -> Self {
        self.config.top_k = k;
        self
    }

    pub fn max_image_size(mut self, width: u32, height: u32) -> Self {
        self.config.max_image_width = width;
        self.config.max_image_height = height;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q;
        self
    }

    pub fn response_mode(mut self, mode: ResponseMode) -> Self {
        self.config.response_mode = mode;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn request_delay(mut self, delay: Duration) -> Self {
        self.config.request_delay = delay;
        self
    }

    pub fn price_per_million_tokens(mut self, usd: f64) -> Self {
        self.config.price_per_million_tokens = usd;
        self
    }

    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractorConfig, Img2TxtError> {
        let c = &self.config;
        if c.jpeg_quality == 0 || c.jpeg_quality > 100 {
            return Err(Img2TxtError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}",
                c.jpeg_quality
            )));
        }
        if c.max_image_width == 0 || c.max_image_height == 0 {
            return Err(Img2TxtError::InvalidConfig(format!(
                "Maximum image size must be non-zero, got {}x{}",
                c.max_image_width, c.max_image_height
            )));
        }
        if c.max_output_tokens == 0 {
            return Err(Img2TxtError::InvalidConfig(
                "max_output_tokens must be ≥ 1".into(),
            ));
        }
        if c.location.trim().is_empty() {
            return Err(Img2TxtError::InvalidConfig("location must not be empty".into()));
        }
        if c.model.trim().is_empty() {
            return Err(Img2TxtError::InvalidConfig("model must not be empty".into()));
        }
        if !c.price_per_million_tokens.is_finite() || c.price_per_million_tokens < 0.0 {
            return Err(Img2TxtError::InvalidConfig(format!(
                "price per million tokens must be a non-negative number, got {}",
                c.price_per_million_tokens
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the API response is delivered.
///
/// Both modes feed the same [`crate::pipeline::response::ResponseParser`];
/// the choice only changes the endpoint method and how the body is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// `:streamGenerateContent?alt=sse` — newline-delimited `data: {json}` chunks. (default)
    #[default]
    Stream,
    /// `:generateContent` — one JSON document.
    Document,
}

impl ResponseMode {
    /// Endpoint method suffix, including the query string for SSE.
    pub fn method(&self) -> &'static str {
        match self {
            ResponseMode::Stream => "streamGenerateContent?alt=sse",
            ResponseMode::Document => "generateContent",
        }
    }
}

impl FromStr for ResponseMode {
    type Err = Img2TxtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stream" | "sse" => Ok(ResponseMode::Stream),
            "document" | "doc" | "single" => Ok(ResponseMode::Document),
            other => Err(Img2TxtError::InvalidConfig(format!(
                "unknown response mode '{other}' (expected stream or document)"
            ))),
        }
    }
}

/// Parse a `WIDTHxHEIGHT` size such as `1024x1024`. A single number sets both.
pub fn parse_image_size(s: &str) -> Result<(u32, u32), Img2TxtError> {
    let s = s.trim().to_lowercase();
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|e| Img2TxtError::InvalidConfig(format!("invalid image size '{s}': {e}")))
    };
    match s.split_once('x') {
        Some((w, h)) => Ok((parse(w)?, parse(h)?)),
        None => {
            let n = parse(&s)?;
            Ok((n, n))
        }
    }
}
