//! The extraction client: one image in, transcribed text and token usage out.
//!
//! ```text
//! path ──▶ prepare_image ──▶ GenerateContentRequest ──▶ POST (bearer) ──▶ ResponseParser
//!          (resize, JPEG,     (prompt + inline image    (token fetched     (text + usage)
//!           base64)            + generationConfig)       per call)
//! ```
//!
//! Every call is independent: nothing is cached, and two calls on the same
//! image make two network requests whose outputs may differ, since the model
//! is not deterministic even at low temperature.

use crate::auth::{token_source_from_config, TokenSource};
use crate::config::{ExtractorConfig, ResponseMode};
use crate::error::Img2TxtError;
use crate::pipeline::encode::{prepare_image, ImageOptions};
use crate::pipeline::request::{endpoint_url, GenerateContentRequest};
use crate::pipeline::response::{parse_document, LineBuffer, ParsedResponse, ResponseParser};
use crate::prompts::EXTRACTION_PROMPT;
use crate::usage::{RunAccumulator, TokenUsage};
use futures::StreamExt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Text and usage returned by one successful extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Transcribed text with surrounding whitespace trimmed.
    pub text: String,
    pub usage: TokenUsage,
}

/// Client for the remote multimodal model.
///
/// Owns the running [`RunAccumulator`]: every successful [`extract`] folds
/// its usage in. The accumulator sits behind a mutex, so the client can be
/// shared across tasks even though the pipeline drives it sequentially.
/// Creating a new client is the only way to reset the totals.
///
/// [`extract`]: ExtractionClient::extract
pub struct ExtractionClient {
    http: reqwest::Client,
    config: Arc<ExtractorConfig>,
    tokens: Arc<dyn TokenSource>,
    endpoint: String,
    totals: Mutex<RunAccumulator>,
}

impl std::fmt::Debug for ExtractionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.config.model)
            .finish()
    }
}

impl ExtractionClient {
    /// Create a client from configuration, resolving credentials.
    ///
    /// A pre-fetched `access_token` wins over `credentials_path`.
    ///
    /// # Errors
    /// Fatal configuration errors: missing project, missing or unreadable
    /// service-account key.
    pub fn new(config: ExtractorConfig) -> Result<Self, Img2TxtError> {
        info!("Initializing text extractor...");
        let tokens = token_source_from_config(&config)?;
        Self::with_token_source(config, tokens)
    }

    /// Create a client with an explicit token source.
    pub fn with_token_source(
        config: ExtractorConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, Img2TxtError> {
        let project = config.require_project()?;

        let endpoint = endpoint_url(&config, project, config.response_mode.method());
        info!("Using project: {}", project);
        info!("Using location: {}", config.location);
        debug!("Endpoint: {}", endpoint);

        // No request timeout: a dense page can legitimately take a minute.
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Img2TxtError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            config: Arc::new(config),
            tokens,
            endpoint,
            totals: Mutex::new(RunAccumulator::default()),
        })
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Snapshot of the running totals.
    pub fn totals(&self) -> RunAccumulator {
        *self.lock_totals()
    }

    fn lock_totals(&self) -> std::sync::MutexGuard<'_, RunAccumulator> {
        // The accumulator holds plain counters; a poisoned lock still has
        // consistent data.
        self.totals.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Extract the text of one image.
    ///
    /// # Errors
    /// * Per-file: [`Img2TxtError::ImagePreparation`], [`Img2TxtError::ApiStatus`],
    ///   [`Img2TxtError::Transport`].
    /// * Fatal: [`Img2TxtError::Auth`] when no token can be obtained.
    pub async fn extract(&self, image_path: &Path) -> Result<Extraction, Img2TxtError> {
        let name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| image_path.display().to_string());
        info!("Starting text extraction for: {}", name);
        let start = Instant::now();

        let image = prepare_image(image_path, &ImageOptions::from(self.config.as_ref()))?;
        let prompt = self.config.prompt.as_deref().unwrap_or(EXTRACTION_PROMPT);
        let request =
            GenerateContentRequest::extraction(prompt, &image, self.config.as_ref().into());
        drop(image);

        let parsed = self.send(&request).await?;

        if parsed.usage_reported {
            debug!(
                "{}: {} input tokens, {} output tokens",
                name, parsed.usage.input_tokens, parsed.usage.output_tokens
            );
        } else {
            warn!("{}: response carried no usage metadata; counting 0 tokens", name);
        }
        if parsed.skipped_chunks > 0 {
            warn!(
                "{}: {} response chunk(s) could not be parsed and were skipped",
                name, parsed.skipped_chunks
            );
        }

        self.lock_totals().record(&parsed.usage);

        let text = parsed.text.trim().to_string();
        info!(
            "Successfully extracted {} characters in {:?}",
            text.chars().count(),
            start.elapsed()
        );
        Ok(Extraction {
            text,
            usage: parsed.usage,
        })
    }

    /// Authenticate, POST and consume the response.
    async fn send(&self, request: &GenerateContentRequest) -> Result<ParsedResponse, Img2TxtError> {
        // Fetched per call: tokens expire mid-batch.
        let token = self.tokens.bearer_token().await?;

        info!("Sending request to {} API...", self.config.model);
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            error!("API error: {} - {}", status.as_u16(), body);
            return Err(Img2TxtError::ApiStatus {
                status: status.as_u16(),
                body,
            });
        }

        match self.config.response_mode {
            ResponseMode::Stream => {
                let mut parser = ResponseParser::new();
                let mut lines = LineBuffer::new();
                let mut body = response.bytes_stream();
                while let Some(chunk) = body.next().await {
                    let chunk = chunk?;
                    lines.feed(&chunk, |line| parser.push_line(line));
                }
                lines.finish(|line| parser.push_line(line));
                Ok(parser.finish())
            }
            ResponseMode::Document => Ok(parse_document(&response.text().await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::path::PathBuf;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STREAM_PATH: &str = "/v1/projects/test-project/locations/us-central1/publishers/google/models/gemini-2.0-flash-001:streamGenerateContent";
    const DOC_PATH: &str = "/v1/projects/test-project/locations/us-central1/publishers/google/models/gemini-2.0-flash-001:generateContent";

    fn test_config(server: &MockServer, mode: ResponseMode) -> ExtractorConfig {
        ExtractorConfig::builder()
            .project_id("test-project")
            .api_base_url(server.uri())
            .response_mode(mode)
            .build()
            .unwrap()
    }

    fn client(config: ExtractorConfig) -> ExtractionClient {
        ExtractionClient::with_token_source(config, Arc::new(StaticToken::new("test-token")))
            .unwrap()
    }

    fn write_page(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
        let p = dir.join(name);
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([250, 250, 250])))
            .save(&p)
            .unwrap();
        p
    }

    fn sse_body() -> String {
        [
            r#"data: {"candidates":[{"content":{"role":"model","parts":[{"text":"  Hello "}]}}]}"#,
            "",
            r#"data: {"candidates":[{"content":{"parts":[{"text":"world\n"}]}}],"usageMetadata":{"promptTokenCount":1290,"candidatesTokenCount":5,"totalTokenCount":1295}}"#,
            "",
        ]
        .join("\n")
    }

    #[test]
    fn new_requires_project() {
        let config = ExtractorConfig::builder()
            .access_token("t")
            .build()
            .unwrap();
        let err = ExtractionClient::new(config).unwrap_err();
        assert!(matches!(
            err,
            Img2TxtError::MissingSetting {
                name: "GOOGLE_CLOUD_PROJECT",
                ..
            }
        ));
    }

    #[test]
    fn new_requires_credentials() {
        let config = ExtractorConfig::builder().project_id("p").build().unwrap();
        let err = ExtractionClient::new(config).unwrap_err();
        assert!(err.is_fatal());

        let config = ExtractorConfig::builder()
            .project_id("p")
            .credentials_path("/no/such/key.json")
            .build()
            .unwrap();
        let err = ExtractionClient::new(config).unwrap_err();
        assert!(matches!(err, Img2TxtError::CredentialsNotFound { .. }));
    }

    #[tokio::test]
    async fn streamed_extraction_returns_trimmed_text_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(STREAM_PATH))
            .and(query_param("alt", "sse"))
            .and(header("Authorization", "Bearer test-token"))
            .and(body_partial_json(serde_json::json!({
                "generationConfig": { "maxOutputTokens": 4096, "topK": 40 }
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let page = write_page(dir.path(), "page1.jpg", 800, 600);
        let client = client(test_config(&server, ResponseMode::Stream));

        let out = client.extract(&page).await.expect("extraction should succeed");
        assert_eq!(out.text, "Hello world");
        assert_eq!(out.usage, TokenUsage::new(1290, 5, 1295));

        let totals = client.totals();
        assert_eq!(totals.calls, 1);
        assert_eq!(totals.input_tokens, 1290);
        assert_eq!(totals.output_tokens, 5);
    }

    #[tokio::test]
    async fn document_mode_parses_single_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{ "content": { "parts": [{ "text": "Section 2.1" }] } }]
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let page = write_page(dir.path(), "p.png", 100, 100);
        let client = client(test_config(&server, ResponseMode::Document));

        let out = client.extract(&page).await.unwrap();
        assert_eq!(out.text, "Section 2.1");
        assert_eq!(out.usage, TokenUsage::default());
        assert_eq!(client.totals().calls, 1);
    }

    #[tokio::test]
    async fn non_success_status_is_api_error_and_not_counted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                r#"{"error":{"code":403,"message":"Permission denied","status":"PERMISSION_DENIED"}}"#,
            ))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let page = write_page(dir.path(), "p.png", 10, 10);
        let client = client(test_config(&server, ResponseMode::Stream));

        let err = client.extract(&page).await.unwrap_err();
        match &err {
            Img2TxtError::ApiStatus { status, body } => {
                assert_eq!(*status, 403);
                assert!(body.contains("PERMISSION_DENIED"));
            }
            other => panic!("expected ApiStatus, got {other:?}"),
        }
        assert!(!err.is_fatal());
        assert_eq!(client.totals(), RunAccumulator::default());
    }

    #[tokio::test]
    async fn bad_image_never_reaches_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("torn.jpg");
        std::fs::write(&page, b"\xFF\xD8\xFF garbage").unwrap();
        let client = client(test_config(&server, ResponseMode::Stream));

        let err = client.extract(&page).await.unwrap_err();
        assert!(matches!(err, Img2TxtError::ImagePreparation { .. }));
    }

    #[tokio::test]
    async fn repeated_calls_are_independent_and_accumulate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body()),
            )
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let page = write_page(dir.path(), "same.png", 10, 10);
        let client = client(test_config(&server, ResponseMode::Stream));

        let a = client.extract(&page).await.unwrap();
        let b = client.extract(&page).await.unwrap();

        let totals = client.totals();
        assert_eq!(totals.calls, 2);
        assert_eq!(
            totals.input_tokens,
            a.usage.input_tokens + b.usage.input_tokens
        );
        assert_eq!(
            totals.output_tokens,
            a.usage.output_tokens + b.usage.output_tokens
        );
    }
}
