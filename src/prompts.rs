//! Prompts sent to the multimodal model.
//!
//! Every prompt lives here so a wording change is a one-line diff and tests
//! can inspect the exact text without a live model. Bump [`PROMPT_VERSION`]
//! whenever [`EXTRACTION_PROMPT`] changes so runs can be compared.
//!
//! Callers can override the default via [`crate::config::ExtractorConfig::prompt`].

/// Version tag of [`EXTRACTION_PROMPT`], recorded in the run summary.
pub const PROMPT_VERSION: &str = "textbook-extract/v1";

/// Default instruction sent alongside every page image.
pub const EXTRACTION_PROMPT: &str = r#"Extract ALL text from this scanned textbook page.

IMPORTANT INSTRUCTIONS:
1. Extract the text EXACTLY as it appears on the page
2. Maintain all original formatting including:
   - Paragraph breaks
   - Section headings
   - Bullet points or numbered lists
   - Indentation
3. Do NOT add any commentary or explanations
4. Do NOT describe images or diagrams
5. ONLY output the actual text content from the page

Begin extraction now:"#;

/// Text-only prompt used by the endpoint diagnostic.
pub const PROBE_PROMPT: &str =
    "Hello, please respond with 'API is working' if you can see this message.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_prompt_forbids_commentary_and_descriptions() {
        assert!(EXTRACTION_PROMPT.contains("Do NOT add any commentary"));
        assert!(EXTRACTION_PROMPT.contains("Do NOT describe images"));
        assert!(EXTRACTION_PROMPT.contains("EXACTLY"));
    }
}
