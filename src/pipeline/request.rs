//! Request envelope for the Vertex AI `generateContent` family of methods.
//!
//! The body is the documented `GenerateContentRequest` shape:
//!
//! ```json
//! {
//!   "contents": [{ "role": "user", "parts": [
//!     { "text": "Extract ALL text…" },
//!     { "inlineData": { "mimeType": "image/jpeg", "data": "<base64>" } }
//!   ]}],
//!   "generationConfig": { "maxOutputTokens": 4096, "temperature": 0.1, "topP": 0.95, "topK": 40 }
//! }
//! ```
//!
//! The same body works for `:generateContent` and
//! `:streamGenerateContent?alt=sse`; only the URL differs.

use crate::config::ExtractorConfig;
use crate::pipeline::encode::EncodedImage;
use serde::Serialize;

/// Top-level request body. Immutable once built.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub role: &'static str,
    pub parts: Vec<Part>,
}

/// One element of a content turn: text or inline binary data.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: Blob,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl From<&ExtractorConfig> for GenerationConfig {
    fn from(config: &ExtractorConfig) -> Self {
        Self {
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
        }
    }
}

impl GenerateContentRequest {
    /// Prompt followed by the page image, as a single user turn.
    pub fn extraction(prompt: &str, image: &EncodedImage, generation: GenerationConfig) -> Self {
        Self {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::Text {
                        text: prompt.to_string(),
                    },
                    Part::InlineData {
                        inline_data: Blob {
                            mime_type: image.mime_type.to_string(),
                            data: image.data.clone(),
                        },
                    },
                ],
            }],
            generation_config: generation,
        }
    }

    /// Text-only request, used to probe an endpoint.
    pub fn text_only(prompt: &str, max_output_tokens: u32, temperature: f32) -> Self {
        Self {
            contents: vec![Content {
                role: "user",
                parts: vec![Part::Text {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens,
                temperature,
                top_p: 0.95,
                top_k: 40,
            },
        }
    }
}

/// Model resource path below the API origin, without the method:
/// `/v1/projects/{p}/locations/{l}/publishers/{pub}/models/{m}`.
pub fn model_path(project: &str, location: &str, publisher: &str, model: &str) -> String {
    format!("/v1/projects/{project}/locations/{location}/publishers/{publisher}/models/{model}")
}

/// Full endpoint URL for `method` (e.g. `generateContent`).
pub fn endpoint_url(config: &ExtractorConfig, project: &str, method: &str) -> String {
    format!(
        "{}{}:{}",
        config.base_url(),
        model_path(project, &config.location, &config.publisher, &config.model),
        method
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseMode;

    fn image() -> EncodedImage {
        EncodedImage {
            data: "QUJD".into(),
            mime_type: "image/jpeg",
            width: 1,
            height: 1,
        }
    }

    #[test]
    fn serialises_to_generate_content_shape() {
        let config = ExtractorConfig::default();
        let req = GenerateContentRequest::extraction("read this", &image(), (&config).into());
        let v = serde_json::to_value(&req).unwrap();

        assert_eq!(v["contents"][0]["role"], "user");
        assert_eq!(v["contents"][0]["parts"][0]["text"], "read this");
        assert_eq!(
            v["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/jpeg"
        );
        assert_eq!(v["contents"][0]["parts"][1]["inlineData"]["data"], "QUJD");
        assert_eq!(v["generationConfig"]["maxOutputTokens"], 4096);
        assert_eq!(v["generationConfig"]["topK"], 40);
        assert!(v["generationConfig"].get("max_output_tokens").is_none());
    }

    #[test]
    fn endpoint_is_parameterised_by_region_project_and_model() {
        let config = ExtractorConfig::builder()
            .location("us-east5")
            .publisher("meta")
            .model("llama-4-maverick-17b-128e-instruct-maas")
            .build()
            .unwrap();
        let url = endpoint_url(&config, "proj-1", ResponseMode::Stream.method());
        assert_eq!(
            url,
            "https://us-east5-aiplatform.googleapis.com/v1/projects/proj-1/locations/us-east5\
             /publishers/meta/models/llama-4-maverick-17b-128e-instruct-maas\
             :streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn text_only_has_single_part() {
        let req = GenerateContentRequest::text_only("ping", 100, 0.1);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["contents"][0]["parts"].as_array().unwrap().len(), 1);
        assert_eq!(v["generationConfig"]["maxOutputTokens"], 100);
    }
}
