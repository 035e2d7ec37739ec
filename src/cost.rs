//! Usage-based pricing for converse streams.
//!
//! The adapter only sees the [`PriceCalculator`] seam; [`PricingRegistry`] is
//! the default price table behind it.

use std::collections::HashMap;

/// Computes the price of one call from its token counts.
pub trait PriceCalculator: Send + Sync {
    /// Price in USD for `input_tokens` prompt tokens and `output_tokens`
    /// generated tokens on `model`.
    fn calculate_price(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64;
}

impl<F> PriceCalculator for F
where
    F: Fn(&str, u32, u32) -> f64 + Send + Sync,
{
    fn calculate_price(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        self(model, input_tokens, output_tokens)
    }
}

/// Cost in USD for token usage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Cost {
    /// Cost for input tokens in USD.
    pub input_cost: f64,
    /// Cost for output tokens in USD.
    pub output_cost: f64,
}

impl Cost {
    /// Total cost in USD.
    pub fn total(&self) -> f64 {
        self.input_cost + self.output_cost
    }
}

/// Pricing per 1M tokens for a model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    /// Cost per 1M input tokens.
    pub input_per_million: f64,
    /// Cost per 1M output tokens.
    pub output_per_million: f64,
}

impl ModelPricing {
    pub const fn new(input: f64, output: f64) -> Self {
        Self {
            input_per_million: input,
            output_per_million: output,
        }
    }

    /// Calculate cost for the given token counts.
    pub fn calculate(&self, input_tokens: u32, output_tokens: u32) -> Cost {
        Cost {
            input_cost: (f64::from(input_tokens) / 1_000_000.0) * self.input_per_million,
            output_cost: (f64::from(output_tokens) / 1_000_000.0) * self.output_per_million,
        }
    }
}

/// Registry of model pricing, keyed by model name.
#[derive(Debug, Clone)]
pub struct PricingRegistry {
    prices: HashMap<String, ModelPricing>,
}

impl PricingRegistry {
    /// Create a new registry with on-demand Bedrock pricing (us-east-1).
    pub fn new() -> Self {
        let mut prices = HashMap::new();

        // Anthropic
        prices.insert("claude-v3-haiku".to_string(), ModelPricing::new(0.25, 1.25));
        prices.insert("claude-v3-sonnet".to_string(), ModelPricing::new(3.00, 15.00));
        prices.insert(
            "claude-v3.5-sonnet".to_string(),
            ModelPricing::new(3.00, 15.00),
        );
        prices.insert("claude-v3-opus".to_string(), ModelPricing::new(15.00, 75.00));

        // Mistral
        prices.insert(
            "mistral-7b-instruct".to_string(),
            ModelPricing::new(0.15, 0.20),
        );
        prices.insert(
            "mixtral-8x7b-instruct".to_string(),
            ModelPricing::new(0.45, 0.70),
        );
        prices.insert("mistral-large".to_string(), ModelPricing::new(4.00, 12.00));

        Self { prices }
    }

    /// Create a registry with no entries.
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    /// Get pricing for a model.
    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        self.prices.get(model)
    }

    /// Calculate cost for a model, if it is priced.
    pub fn calculate_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> Option<Cost> {
        self.get(model)
            .map(|p| p.calculate(input_tokens, output_tokens))
    }

    /// Add or update pricing for a model.
    pub fn set(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices.insert(model.into(), pricing);
    }
}

impl Default for PricingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceCalculator for PricingRegistry {
    /// Unpriced models cost nothing; the miss is logged so it can be added.
    fn calculate_price(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        match self.calculate_cost(model, input_tokens, output_tokens) {
            Some(cost) => cost.total(),
            None => {
                tracing::warn!(model, "no pricing registered for model, reporting zero cost");
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_calculation() {
        let pricing = ModelPricing::new(1.0, 2.0); // $1/M input, $2/M output
        let cost = pricing.calculate(1000, 500);

        assert!((cost.input_cost - 0.001).abs() < 1e-10);
        assert!((cost.output_cost - 0.001).abs() < 1e-10);
        assert!((cost.total() - 0.002).abs() < 1e-10);
    }

    #[test]
    fn test_registry() {
        let registry = PricingRegistry::new();
        assert!(registry.get("claude-v3-haiku").is_some());
        assert!(registry.get("mistral-large").is_some());
        assert!(registry.get("gpt-4o").is_none());
    }

    #[test]
    fn test_registry_price() {
        let registry = PricingRegistry::new();
        let price = registry.calculate_price("claude-v3-sonnet", 1_000_000, 1_000_000);
        assert!((price - 18.0).abs() < 1e-10);
    }

    #[test]
    fn test_unknown_model_is_free() {
        let registry = PricingRegistry::empty();
        assert_eq!(registry.calculate_price("unknown", 100, 100), 0.0);
    }

    #[test]
    fn test_registry_override() {
        let mut registry = PricingRegistry::empty();
        registry.set("custom", ModelPricing::new(10.0, 20.0));
        let cost = registry.calculate_cost("custom", 100_000, 50_000).unwrap();
        assert!((cost.total() - 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_closure_calculator() {
        let calc = |model: &str, input: u32, output: u32| {
            if model == "flat" {
                f64::from(input + output)
            } else {
                0.0
            }
        };
        assert_eq!(calc.calculate_price("flat", 5, 2), 7.0);
    }
}
