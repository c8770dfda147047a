//! Result types for a batch run and the human-readable summary report.

use crate::error::FileError;
use crate::usage::{estimate_cost, group_thousands, RunAccumulator, TokenUsage};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;

/// Name of the run summary written next to the extracted text files.
pub const SUMMARY_FILE_NAME: &str = "extraction_summary.txt";

/// Suffix appended to an image's stem to name its text file.
pub const EXTRACTED_SUFFIX: &str = "_extracted.txt";

/// Prefix that marks a failed entry in the summary.
pub const ERROR_MARKER: &str = "ERROR";

/// What happened to one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileOutcome {
    Success {
        text: String,
        usage: TokenUsage,
        output_path: PathBuf,
    },
    Failure {
        error: FileError,
    },
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FileOutcome::Success { .. })
    }

    /// Characters of extracted text; zero for failures.
    pub fn char_count(&self) -> usize {
        match self {
            FileOutcome::Success { text, .. } => text.chars().count(),
            FileOutcome::Failure { .. } => 0,
        }
    }

    /// Usage of the call; zero for failures.
    pub fn usage(&self) -> TokenUsage {
        match self {
            FileOutcome::Success { usage, .. } => *usage,
            FileOutcome::Failure { .. } => TokenUsage::default(),
        }
    }

    /// One-line status as it appears in the summary:
    /// `Extracted 1234 characters` or `ERROR: …`.
    pub fn status_line(&self) -> String {
        match self {
            FileOutcome::Success { .. } => format!("Extracted {} characters", self.char_count()),
            FileOutcome::Failure { error } => {
                let message = error.to_string();
                let flat = message.split_whitespace().collect::<Vec<_>>().join(" ");
                format!("{ERROR_MARKER}: {flat}")
            }
        }
    }
}

/// One summary record, in processing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    pub filename: String,
    pub outcome: FileOutcome,
}

/// Everything a batch run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// One entry per recognised image, failed ones included.
    pub files: Vec<FileReport>,
    /// Totals of the successful calls.
    pub totals: RunAccumulator,
    pub price_per_million_tokens: f64,
    pub model: String,
    pub prompt_version: String,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.files.iter().filter(|f| f.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.succeeded()
    }

    pub fn estimated_cost(&self) -> f64 {
        self.totals.estimated_cost(self.price_per_million_tokens)
    }

    /// Look up the outcome of `filename`.
    pub fn get(&self, filename: &str) -> Option<&FileOutcome> {
        self.files
            .iter()
            .find(|f| f.filename == filename)
            .map(|f| &f.outcome)
    }

    /// Render the report written to [`SUMMARY_FILE_NAME`].
    pub fn render(&self) -> String {
        let rule = "=".repeat(60);
        let thin = "-".repeat(40);
        let mut s = String::new();

        // Writing into a String cannot fail.
        let _ = writeln!(s, "Text Extraction Summary");
        let _ = writeln!(s, "{rule}");
        let _ = writeln!(s, "Model: {}  (prompt {})", self.model, self.prompt_version);
        let _ = writeln!(s);

        for f in &self.files {
            let mark = if f.outcome.is_success() { "✅" } else { "❌" };
            let _ = writeln!(s, "{mark} {}: {}", f.filename, f.outcome.status_line());
        }

        let _ = writeln!(s);
        let _ = writeln!(s, "Per-File Token Usage:");
        let _ = writeln!(s, "{thin}");
        for f in self.files.iter().filter(|f| f.outcome.is_success()) {
            let u = f.outcome.usage();
            let _ = writeln!(s, "{}:", f.filename);
            let _ = writeln!(s, "  Input tokens: {}", group_thousands(u.input_tokens));
            let _ = writeln!(s, "  Output tokens: {}", group_thousands(u.output_tokens));
            let _ = writeln!(s, "  Total tokens: {}", group_thousands(u.total_tokens));
            let _ = writeln!(
                s,
                "  Estimated cost: ${:.6}",
                estimate_cost(u.total_tokens, self.price_per_million_tokens)
            );
            let _ = writeln!(s);
        }

        let t = &self.totals;
        let _ = writeln!(s, "Summary Statistics:");
        let _ = writeln!(s, "{thin}");
        let _ = writeln!(s, "Total files: {}", self.files.len());
        let _ = writeln!(s, "Succeeded: {}", self.succeeded());
        let _ = writeln!(s, "Failed: {}", self.failed());
        let _ = writeln!(s, "API calls: {}", t.calls);
        let _ = writeln!(s, "Total input tokens: {}", group_thousands(t.input_tokens));
        let _ = writeln!(s, "Total output tokens: {}", group_thousands(t.output_tokens));
        let _ = writeln!(s, "Total tokens used: {}", group_thousands(t.total_tokens));
        if t.calls > 0 {
            let _ = writeln!(s);
            let _ = writeln!(s, "Average input tokens per file: {:.2}", t.average_input_tokens());
            let _ = writeln!(s, "Average output tokens per file: {:.2}", t.average_output_tokens());
            let _ = writeln!(s, "Average total tokens per file: {:.2}", t.average_total_tokens());
        }
        let _ = writeln!(s);
        let _ = writeln!(s, "Estimated total cost: ${:.4}", self.estimated_cost());
        if t.calls > 0 {
            let _ = writeln!(
                s,
                "Average cost per page: ${:.4}",
                t.average_cost(self.price_per_million_tokens)
            );
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RunSummary {
        let mut totals = RunAccumulator::default();
        let u = TokenUsage::new(1_500, 700, 2_200);
        totals.record(&u);
        RunSummary {
            files: vec![
                FileReport {
                    filename: "page1.jpg".into(),
                    outcome: FileOutcome::Success {
                        text: "héllo".into(),
                        usage: u,
                        output_path: "out/page1_extracted.txt".into(),
                    },
                },
                FileReport {
                    filename: "page2.png".into(),
                    outcome: FileOutcome::Failure {
                        error: FileError::Api {
                            file: "page2.png".into(),
                            status: 403,
                            body: "denied".into(),
                        },
                    },
                },
            ],
            totals,
            price_per_million_tokens: 0.075,
            model: "gemini-2.0-flash-001".into(),
            prompt_version: "v1".into(),
            duration_ms: 10,
        }
    }

    #[test]
    fn status_lines() {
        let s = summary();
        assert_eq!(s.files[0].outcome.status_line(), "Extracted 5 characters");
        assert!(s.files[1].outcome.status_line().starts_with("ERROR: "));
        assert!(s.files[1].outcome.status_line().contains("403"));
    }

    #[test]
    fn render_lists_every_file_and_totals() {
        let text = summary().render();
        assert!(text.contains("✅ page1.jpg: Extracted 5 characters"), "{text}");
        assert!(text.contains("❌ page2.png: ERROR: "), "{text}");
        assert!(text.contains("Total input tokens: 1,500"));
        assert!(text.contains("Total tokens used: 2,200"));
        assert!(text.contains("Estimated total cost: $0.0002"));
        assert!(text.contains("Failed: 1"));
    }

    #[test]
    fn empty_run_renders_zero_cost() {
        let s = RunSummary {
            files: vec![],
            totals: RunAccumulator::default(),
            price_per_million_tokens: 0.075,
            model: "m".into(),
            prompt_version: "v".into(),
            duration_ms: 0,
        };
        let text = s.render();
        assert!(text.contains("Estimated total cost: $0.0000"));
        assert!(!text.contains("Average"));
        assert_eq!(s.estimated_cost(), 0.0);
    }

    #[test]
    fn outcome_serialises_with_status_tag() {
        let s = summary();
        let v = serde_json::to_value(&s.files[1].outcome).unwrap();
        assert_eq!(v["status"], "failure");
        assert_eq!(v["error"]["Api"]["status"], 403);
    }

    #[test]
    fn multi_line_api_body_keeps_one_status_line_per_file() {
        let mut s = summary();
        let body = "{\n  \"error\": {\n    \"code\": 404,\n    \"message\": \"Publisher model not found.\",\n    \"status\": \"NOT_FOUND\"\n  }\n}\n";
        s.files[1].outcome = FileOutcome::Failure {
            error: FileError::Api {
                file: "page2.png".into(),
                status: 404,
                body: body.into(),
            },
        };
        let text = s.render();
        let status_lines = text
            .lines()
            .skip_while(|l| !l.starts_with('✅') && !l.starts_with('❌'))
            .take_while(|l| !l.is_empty())
            .count();
        assert_eq!(status_lines, 2, "{text}");
        assert!(text.contains("❌ page2.png: ERROR: API request failed: 404 - Publisher model not found.\n"));

        // Structured output keeps the full body.
        let v = serde_json::to_value(&s.files[1].outcome).unwrap();
        assert_eq!(v["error"]["Api"]["body"], body);
    }
}
