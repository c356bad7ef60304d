//! Static per-model price table for cost estimation.
//!
//! Prices are USD per million tokens. Policy-level pricing overrides take
//! precedence; lookups fall back to exact match and then longest-prefix
//! match against the built-in table, so dated model ids
//! (`claude-sonnet-4-20250514`) resolve to their family row.

use relay_domain::config::ModelPricing;
use relay_domain::usage::Usage;
use std::collections::HashMap;

/// Built-in rows. Longest prefixes must come before their shorter siblings.
const DEFAULT_ROWS: &[(&str, ModelPricing)] = &[
    ("gpt-4o-mini", ModelPricing { input_per_1m: 0.15, output_per_1m: 0.60 }),
    ("gpt-4o", ModelPricing { input_per_1m: 2.50, output_per_1m: 10.00 }),
    ("gpt-4.1-mini", ModelPricing { input_per_1m: 0.40, output_per_1m: 1.60 }),
    ("gpt-4.1", ModelPricing { input_per_1m: 2.00, output_per_1m: 8.00 }),
    ("o4-mini", ModelPricing { input_per_1m: 1.10, output_per_1m: 4.40 }),
    ("claude-opus-4", ModelPricing { input_per_1m: 15.00, output_per_1m: 75.00 }),
    ("claude-sonnet-4", ModelPricing { input_per_1m: 3.00, output_per_1m: 15.00 }),
    ("claude-3-5-haiku", ModelPricing { input_per_1m: 0.80, output_per_1m: 4.00 }),
];

/// A merged view of policy overrides and the built-in rows.
#[derive(Debug, Clone, Default)]
pub(crate) struct PriceTable {
    overrides: HashMap<String, ModelPricing>,
}

impl PriceTable {
    pub(crate) fn new(overrides: HashMap<String, ModelPricing>) -> Self {
        Self { overrides }
    }

    /// Find pricing for a model: override exact, override prefix, built-in
    /// exact, built-in prefix.
    pub(crate) fn lookup(&self, model: &str) -> Option<ModelPricing> {
        if let Some(p) = self.overrides.get(model) {
            return Some(*p);
        }
        if let Some(p) = self
            .overrides
            .iter()
            .filter(|(name, _)| model.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, p)| *p)
        {
            return Some(p);
        }
        DEFAULT_ROWS
            .iter()
            .find(|(name, _)| model == *name || model.starts_with(name))
            .map(|(_, p)| *p)
    }

    /// Estimated USD cost for a call. Unknown models cost nothing rather
    /// than guessing a rate.
    pub(crate) fn estimate(&self, model: &str, usage: &Usage) -> f64 {
        match self.lookup(model) {
            Some(p) => p.estimate_cost(usage.prompt_tokens, usage.completion_tokens),
            None => {
                tracing::debug!(model, "no pricing row for model, estimating 0");
                0.0
            }
        }
    }
}
