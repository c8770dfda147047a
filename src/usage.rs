//! Token accounting: per-call usage and the running totals of one client.

use serde::{Deserialize, Serialize};

/// Token counts reported by the provider for one API call.
///
/// All fields are zero when the response carried no usage metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// As reported by the provider; may exceed `input + output` (e.g. when
    /// the model counts internal reasoning tokens).
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64, total_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// Cumulative usage across the calls made by one client.
///
/// Only successful calls are recorded. A fresh accumulator (or a fresh
/// [`crate::client::ExtractionClient`]) starts at zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RunAccumulator {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub calls: u64,
}

impl RunAccumulator {
    /// Fold one call's usage into the totals.
    pub fn record(&mut self, usage: &TokenUsage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.total_tokens += usage.total_tokens;
        self.calls += 1;
    }

    pub fn average_input_tokens(&self) -> f64 {
        self.per_call(self.input_tokens)
    }

    pub fn average_output_tokens(&self) -> f64 {
        self.per_call(self.output_tokens)
    }

    pub fn average_total_tokens(&self) -> f64 {
        self.per_call(self.total_tokens)
    }

    /// Linear cost estimate: `total_tokens / 1M × price`.
    pub fn estimated_cost(&self, price_per_million_tokens: f64) -> f64 {
        estimate_cost(self.total_tokens, price_per_million_tokens)
    }

    /// Estimated cost divided by the number of calls; zero before any call.
    pub fn average_cost(&self, price_per_million_tokens: f64) -> f64 {
        self.per_call_f(self.estimated_cost(price_per_million_tokens))
    }

    fn per_call(&self, n: u64) -> f64 {
        self.per_call_f(n as f64)
    }

    fn per_call_f(&self, v: f64) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            v / self.calls as f64
        }
    }
}

/// Cost in USD of `tokens` at `price_per_million_tokens`.
pub fn estimate_cost(tokens: u64, price_per_million_tokens: f64) -> f64 {
    tokens as f64 / 1_000_000.0 * price_per_million_tokens
}

/// Format an integer with thousands separators: `12345` → `12,345`.
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_accumulator_is_all_zero() {
        let acc = RunAccumulator::default();
        assert_eq!(acc.calls, 0);
        assert_eq!(acc.estimated_cost(0.075), 0.0);
        assert_eq!(acc.average_input_tokens(), 0.0);
        assert_eq!(acc.average_cost(0.075), 0.0);
    }

    #[test]
    fn accumulator_sums_each_call() {
        let calls = [
            TokenUsage::new(1_200, 300, 1_500),
            TokenUsage::new(1_100, 650, 1_750),
            TokenUsage::new(0, 0, 0),
        ];
        let mut acc = RunAccumulator::default();
        for u in &calls {
            acc.record(u);
        }
        assert_eq!(acc.calls, 3);
        assert_eq!(acc.input_tokens, 2_300);
        assert_eq!(acc.output_tokens, 950);
        assert_eq!(acc.total_tokens, 3_250);
        assert!((acc.average_output_tokens() - 950.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn cost_is_linear_in_total_tokens() {
        assert!((estimate_cost(1_000_000, 0.075) - 0.075).abs() < 1e-12);
        assert!((estimate_cost(2_000_000, 0.075) - 0.15).abs() < 1e-12);
        assert_eq!(estimate_cost(0, 0.075), 0.0);
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_000), "1,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
    }
}
