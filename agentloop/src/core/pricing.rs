//! Per-model token pricing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::TokenUsage;

/// USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    pub input: f64,
    pub output: f64,
}

impl ModelRate {
    pub const fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 / 1_000_000.0) * self.input
            + (usage.completion_tokens as f64 / 1_000_000.0) * self.output
    }
}

/// Rate used when no key matches the model name.
pub const FALLBACK_RATE: ModelRate = ModelRate::new(1.0, 3.0);

const BUILTIN_RATES: &[(&str, ModelRate)] = &[
    ("o4-mini", ModelRate::new(5.0, 5.0)),
    ("gpt-4o", ModelRate::new(2.50, 10.0)),
    ("gpt-4o-mini", ModelRate::new(0.15, 0.60)),
    ("o1-mini", ModelRate::new(3.0, 12.0)),
    ("gpt-3.5-turbo", ModelRate::new(0.50, 1.50)),
];

/// Model-name keyed rates. Lookup picks the longest key contained in the model name.
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    rates: BTreeMap<String, ModelRate>,
    fallback: ModelRate,
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            rates: BUILTIN_RATES
                .iter()
                .map(|(name, rate)| (name.to_string(), *rate))
                .collect(),
            fallback: FALLBACK_RATE,
        }
    }
}

impl RateTable {
    /// Built-in table with `overrides` layered on top.
    pub fn with_overrides(overrides: &BTreeMap<String, ModelRate>) -> Self {
        let mut table = Self::default();
        for (name, rate) in overrides {
            table.rates.insert(name.to_ascii_lowercase(), *rate);
        }
        table
    }

    pub fn rate_for(&self, model: &str) -> ModelRate {
        let model = model.to_ascii_lowercase();
        self.rates
            .iter()
            .filter(|(key, _)| model.contains(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map_or(self.fallback, |(_, rate)| *rate)
    }

    pub fn cost(&self, model: &str, usage: &TokenUsage) -> f64 {
        self.rate_for(model).cost(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_key_wins() {
        let table = RateTable::default();
        assert_eq!(table.rate_for("gpt-4o-mini-2024-07-18"), ModelRate::new(0.15, 0.60));
        assert_eq!(table.rate_for("gpt-4o"), ModelRate::new(2.50, 10.0));
        assert_eq!(table.rate_for("some-local-model"), FALLBACK_RATE);
    }

    #[test]
    fn cost_is_per_million_tokens() {
        let table = RateTable::default();
        let usage = TokenUsage {
            prompt_tokens: 1_000_000,
            completion_tokens: 500_000,
        };
        let cost = table.cost("gpt-4o", &usage);
        assert!((cost - 7.5).abs() < 1e-9);
    }

    #[test]
    fn overrides_replace_and_extend() {
        let mut overrides = BTreeMap::new();
        overrides.insert("GPT-4o".to_string(), ModelRate::new(1.0, 1.0));
        overrides.insert("llama".to_string(), ModelRate::new(0.0, 0.0));
        let table = RateTable::with_overrides(&overrides);
        assert_eq!(table.rate_for("gpt-4o"), ModelRate::new(1.0, 1.0));
        assert_eq!(table.rate_for("llama-3-70b"), ModelRate::new(0.0, 0.0));
    }
}
