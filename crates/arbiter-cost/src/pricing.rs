use std::collections::HashMap;

use crate::error::{CostError, Result};

/// Upstream price row: millicents per million tokens, input and output
/// priced separately. ($3.00 per million tokens = 300 000 mc/MTok.)
#[derive(Debug, Clone, Copy)]
pub struct ModelPrice {
    pub input_per_mtok: u64,
    pub output_per_mtok: u64,
}

/// Per-model price table. Unknown models are an error, never a fallback —
/// an unpriced call must not reach the upstream.
#[derive(Debug, Clone)]
pub struct PriceTable {
    models: HashMap<String, ModelPrice>,
}

impl PriceTable {
    pub fn new(models: HashMap<String, ModelPrice>) -> Self {
        Self { models }
    }

    /// Published prices for the supported upstream models.
    pub fn builtin() -> Self {
        let mut models = HashMap::new();
        models.insert(
            "claude-sonnet-4-6".to_string(),
            ModelPrice {
                input_per_mtok: 300_000,
                output_per_mtok: 1_500_000,
            },
        );
        models.insert(
            "claude-haiku-4-5".to_string(),
            ModelPrice {
                input_per_mtok: 100_000,
                output_per_mtok: 500_000,
            },
        );
        models.insert(
            "claude-opus-4-5".to_string(),
            ModelPrice {
                input_per_mtok: 1_500_000,
                output_per_mtok: 7_500_000,
            },
        );
        Self { models }
    }

    pub fn price(&self, model: &str) -> Result<ModelPrice> {
        self.models
            .get(model)
            .copied()
            .ok_or_else(|| CostError::UnknownModel(model.to_string()))
    }

    /// Pre-flight estimate: input tokens approximated as ⌈len/4⌉, output
    /// assumed to hit the tier's `max_output` ceiling. Pessimistic on
    /// purpose — the budget gate must not undershoot.
    pub fn estimate(&self, message_len: usize, max_output: u32, model: &str) -> Result<u64> {
        let price = self.price(model)?;
        let input_tokens = (message_len as u64).div_ceil(4);
        Ok(token_cost(input_tokens, u64::from(max_output), price))
    }

    /// Exact post-flight cost from upstream-reported token counts.
    pub fn reconcile(&self, input_tokens: u32, output_tokens: u32, model: &str) -> Result<u64> {
        let price = self.price(model)?;
        Ok(token_cost(
            u64::from(input_tokens),
            u64::from(output_tokens),
            price,
        ))
    }
}

/// Round up: a fraction of a millicent still bills one.
fn token_cost(input_tokens: u64, output_tokens: u64, price: ModelPrice) -> u64 {
    let raw = input_tokens * price.input_per_mtok + output_tokens * price.output_per_mtok;
    raw.div_ceil(1_000_000)
}
