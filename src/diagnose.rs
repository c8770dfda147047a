//! Endpoint diagnostic: find out which model URL the project can actually call.
//!
//! A 404 on the first real request usually means a wrong model name, a model
//! not offered in the region, or a licence not yet accepted in Model Garden.
//! [`probe_endpoints`] sends a tiny text-only request to a handful of URL
//! variants and reports what each one answered, stopping at the first 200.

use crate::auth::TokenSource;
use crate::config::ExtractorConfig;
use crate::error::Img2TxtError;
use crate::pipeline::request::{model_path, GenerateContentRequest};
use crate::prompts::PROBE_PROMPT;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default per-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const MAAS_SUFFIX: &str = "-maas";

/// One candidate URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointVariant {
    pub model: String,
    pub method: &'static str,
    pub url: String,
}

impl EndpointVariant {
    /// `model:method`, the part that differs between variants.
    pub fn label(&self) -> String {
        format!("{}:{}", self.model, self.method)
    }
}

/// What a probe observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "lowercase")]
pub enum ProbeOutcome {
    Status(u16),
    Timeout,
    Failed(String),
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Status(200))
    }

    /// Likely meaning of the outcome.
    pub fn hint(&self) -> String {
        match self {
            ProbeOutcome::Status(200) => "endpoint works".into(),
            ProbeOutcome::Status(404) => "not found: endpoint or model does not exist here".into(),
            ProbeOutcome::Status(403) => {
                "forbidden: check IAM permissions or accept the model licence".into()
            }
            ProbeOutcome::Status(400) => {
                "bad request: endpoint exists but the request format may be wrong".into()
            }
            ProbeOutcome::Status(code) => format!("error: HTTP {code}"),
            ProbeOutcome::Timeout => "timeout: endpoint might be valid but slow".into(),
            ProbeOutcome::Failed(detail) => format!("error: {detail}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub variant: EndpointVariant,
    pub outcome: ProbeOutcome,
    /// First non-empty line of a successful response, truncated.
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    /// Probes in the order they were sent.
    pub probes: Vec<ProbeResult>,
    /// The first variant that answered 200, if any.
    pub working: Option<EndpointVariant>,
    /// Outcome of the GET on the project/location resource.
    pub api_access: ProbeOutcome,
}

/// The configured model with the `-maas` suffix added or removed.
fn toggle_maas(model: &str) -> String {
    match model.strip_suffix(MAAS_SUFFIX) {
        Some(base) => base.to_string(),
        None => format!("{model}{MAAS_SUFFIX}"),
    }
}

/// URL variants to try, most likely first.
pub fn endpoint_variants(config: &ExtractorConfig, project: &str) -> Vec<EndpointVariant> {
    let base = config.base_url();
    let alternate = toggle_maas(&config.model);
    let candidates: [(&str, &'static str); 7] = [
        (config.model.as_str(), "streamGenerateContent?alt=sse"),
        (alternate.as_str(), "streamGenerateContent?alt=sse"),
        (config.model.as_str(), "streamChat"),
        (alternate.as_str(), "streamChat"),
        (config.model.as_str(), "generateContent"),
        (config.model.as_str(), "predict"),
        (config.model.as_str(), "chat"),
    ];
    candidates
        .into_iter()
        .map(|(model, method)| EndpointVariant {
            model: model.to_string(),
            method,
            url: format!(
                "{base}{}:{method}",
                model_path(project, &config.location, &config.publisher, model)
            ),
        })
        .collect()
}

fn classify(err: &reqwest::Error) -> ProbeOutcome {
    if err.is_timeout() {
        ProbeOutcome::Timeout
    } else {
        ProbeOutcome::Failed(err.to_string())
    }
}

/// Probe each variant from [`endpoint_variants`] with a text-only request.
///
/// # Errors
/// Only fatal errors: missing project, or no bearer token. Per-variant
/// failures are part of the report.
pub async fn probe_endpoints(
    config: &ExtractorConfig,
    tokens: &dyn TokenSource,
    timeout: Duration,
) -> Result<DiagnosticReport, Img2TxtError> {
    let project = config.require_project()?;
    let token = tokens.bearer_token().await?;
    info!("Authentication successful");

    let http = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Img2TxtError::Internal(format!("failed to build HTTP client: {e}")))?;
    let body = GenerateContentRequest::text_only(PROBE_PROMPT, 100, 0.1);

    let mut probes = Vec::new();
    let mut working = None;
    for variant in endpoint_variants(config, project) {
        debug!("Probing {}", variant.url);
        let (outcome, preview) = match http
            .post(&variant.url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let preview = if status == 200 {
                    resp.text().await.ok().and_then(|text| {
                        text.lines()
                            .map(str::trim)
                            .find(|l| !l.is_empty())
                            .map(|l| l.chars().take(100).collect::<String>())
                    })
                } else {
                    None
                };
                (ProbeOutcome::Status(status), preview)
            }
            Err(e) => (classify(&e), None),
        };
        info!("{} -> {}", variant.label(), outcome.hint());

        let found = outcome.is_success();
        if found {
            working = Some(variant.clone());
        }
        probes.push(ProbeResult {
            variant,
            outcome,
            preview,
        });
        if found {
            break;
        }
    }
    if working.is_none() {
        warn!("No working endpoint found");
    }

    let resource = format!(
        "{}/v1/projects/{}/locations/{}",
        config.base_url(),
        project,
        config.location
    );
    let api_access = match http.get(&resource).bearer_auth(&token).send().await {
        Ok(resp) => ProbeOutcome::Status(resp.status().as_u16()),
        Err(e) => classify(&e),
    };

    Ok(DiagnosticReport {
        probes,
        working,
        api_access,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, model: &str) -> ExtractorConfig {
        ExtractorConfig::builder()
            .project_id("p")
            .api_base_url(server.uri())
            .publisher("meta")
            .model(model)
            .build()
            .unwrap()
    }

    #[test]
    fn maas_suffix_is_toggled() {
        assert_eq!(
            toggle_maas("llama-4-maverick-17b-128e-instruct-maas"),
            "llama-4-maverick-17b-128e-instruct"
        );
        assert_eq!(toggle_maas("gemini-2.0-flash-001"), "gemini-2.0-flash-001-maas");
    }

    #[test]
    fn variants_cover_methods_and_suffix() {
        let config = ExtractorConfig::builder()
            .location("us-east5")
            .model("m-maas")
            .build()
            .unwrap();
        let labels: Vec<String> = endpoint_variants(&config, "proj")
            .iter()
            .map(EndpointVariant::label)
            .collect();
        assert_eq!(
            labels,
            vec![
                "m-maas:streamGenerateContent?alt=sse",
                "m:streamGenerateContent?alt=sse",
                "m-maas:streamChat",
                "m:streamChat",
                "m-maas:generateContent",
                "m-maas:predict",
                "m-maas:chat",
            ]
        );
        assert!(endpoint_variants(&config, "proj")[0]
            .url
            .starts_with("https://us-east5-aiplatform.googleapis.com/v1/projects/proj/"));
    }

    #[test]
    fn hints_describe_common_statuses() {
        assert!(ProbeOutcome::Status(404).hint().starts_with("not found"));
        assert!(ProbeOutcome::Status(403).hint().contains("licence"));
        assert!(ProbeOutcome::Status(400).hint().contains("exists"));
        assert!(ProbeOutcome::Timeout.hint().starts_with("timeout"));
        assert_eq!(ProbeOutcome::Status(502).hint(), "error: HTTP 502");
    }

    #[tokio::test]
    async fn stops_at_first_working_variant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/p/locations/us-central1/publishers/meta/models/m:streamGenerateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_string("\ndata: {\"candidates\":[]}\n"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/p/locations/us-central1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let report = probe_endpoints(
            &config(&server, "m-maas"),
            &StaticToken::new("t"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(report.probes.len(), 2);
        assert_eq!(report.probes[0].outcome, ProbeOutcome::Status(404));
        assert!(report.probes[1].outcome.is_success());
        assert_eq!(
            report.probes[1].preview.as_deref(),
            Some("data: {\"candidates\":[]}")
        );
        assert_eq!(report.working.map(|v| v.model), Some("m".to_string()));
        assert_eq!(report.api_access, ProbeOutcome::Status(200));
    }

    #[tokio::test]
    async fn stream_chat_endpoint_is_probed_and_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/p/locations/us-central1/publishers/meta/models/llama-maas:streamChat"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let report = probe_endpoints(
            &config(&server, "llama-maas"),
            &StaticToken::new("t"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(report.probes.len(), 3);
        let working = report.working.unwrap();
        assert_eq!(working.label(), "llama-maas:streamChat");
        assert_eq!(report.probes[2].preview.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn slow_endpoint_is_reported_as_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(":streamGenerateContent$"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let report = probe_endpoints(
            &config(&server, "m"),
            &StaticToken::new("t"),
            Duration::from_millis(200),
        )
        .await
        .unwrap();

        assert_eq!(report.probes.len(), 7);
        assert_eq!(report.probes[0].outcome, ProbeOutcome::Timeout);
        assert_eq!(report.probes[2].outcome, ProbeOutcome::Status(403));
        assert_eq!(report.probes[6].outcome, ProbeOutcome::Status(403));
        assert!(report.working.is_none());
        // No GET mock mounted: wiremock answers 404.
        assert_eq!(report.api_access, ProbeOutcome::Status(404));
    }

    #[tokio::test]
    async fn missing_token_is_fatal() {
        let server = MockServer::start().await;
        let err = probe_endpoints(&config(&server, "m"), &StaticToken::new(""), DEFAULT_PROBE_TIMEOUT)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
