//! # Models
//!
//! LLM provider and model configuration shared by the specialist skills,
//! plus the per-model pricing table used for cost accounting.

use serde::{Deserialize, Serialize};

/// Fast, cheap model used for question generation
pub const CLAUDE_HAIKU: &str = "claude-haiku-4-5-20251001";
/// High-quality model used for specs and prompt packages
pub const CLAUDE_SONNET: &str = "claude-sonnet-4-20250514";
/// Model from a different vendor used by the critic to avoid self-review bias
pub const GPT_4O_MINI: &str = "gpt-4o-mini";

/// Supported LLM providers
///
/// - Anthropic (Claude) - `ANTHROPIC_API_KEY`
/// - OpenAI (GPT) - `OPENAI_API_KEY`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
}

impl LlmProvider {
    /// Get all available providers
    pub fn all() -> Vec<LlmProvider> {
        vec![LlmProvider::Anthropic, LlmProvider::OpenAI]
    }

    /// Display name for logs
    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "Anthropic",
            LlmProvider::OpenAI => "OpenAI",
        }
    }

    /// Environment variable holding the API key
    pub fn api_key_var(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::OpenAI => "OPENAI_API_KEY",
        }
    }

    /// Infer the provider from a model id
    pub fn for_model(model: &str) -> Option<LlmProvider> {
        if model.starts_with("claude") {
            Some(LlmProvider::Anthropic)
        } else if model.starts_with("gpt") || model.starts_with("o1") || model.starts_with("o3") {
            Some(LlmProvider::OpenAI)
        } else {
            None
        }
    }
}

/// Configuration for one specialist's model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    /// LLM provider to use
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model name (e.g., "claude-sonnet-4-20250514", "gpt-4o-mini")
    pub model: String,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Optional base URL override (proxies, OpenAI-compatible endpoints)
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::new(CLAUDE_SONNET)
    }
}

impl ModelConfig {
    /// Create a config, inferring the provider from the model id
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            provider: LlmProvider::for_model(&model).unwrap_or_default(),
            model,
            temperature: default_temperature(),
            base_url: None,
        }
    }

    /// Create config for a specific provider
    pub fn with_provider(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            ..Self::new(model)
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// Price of one million tokens in USD
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
}

/// Pricing for a known model, `None` for anything else
pub fn pricing_for(model: &str) -> Option<ModelPricing> {
    match model {
        CLAUDE_HAIKU => Some(ModelPricing {
            input: 0.80,
            output: 4.00,
        }),
        CLAUDE_SONNET => Some(ModelPricing {
            input: 3.00,
            output: 15.00,
        }),
        GPT_4O_MINI => Some(ModelPricing {
            input: 0.15,
            output: 0.60,
        }),
        _ => None,
    }
}

/// USD cost of a single call. Unknown models cost nothing.
pub fn calculate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let Some(pricing) = pricing_for(model) else {
        return 0.0;
    };
    let input_cost = (input_tokens as f64 / 1_000_000.0) * pricing.input;
    let output_cost = (output_tokens as f64 / 1_000_000.0) * pricing.output;
    round_to(input_cost + output_cost, 6)
}

/// Round to a fixed number of decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ModelConfig::default();
        assert_eq!(config.provider, LlmProvider::Anthropic);
        assert!(config.model.contains("claude"));
    }

    #[test]
    fn test_provider_inferred_from_model() {
        assert_eq!(ModelConfig::new(GPT_4O_MINI).provider, LlmProvider::OpenAI);
        assert_eq!(ModelConfig::new(CLAUDE_HAIKU).provider, LlmProvider::Anthropic);
        assert_eq!(LlmProvider::for_model("llama-3"), None);
    }

    #[test]
    fn test_provider_display_names() {
        assert_eq!(LlmProvider::Anthropic.display_name(), "Anthropic");
        assert_eq!(LlmProvider::OpenAI.display_name(), "OpenAI");
    }

    #[test]
    fn test_model_config_serialization() {
        let config = ModelConfig::with_provider(LlmProvider::OpenAI, "gpt-4o");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("openai"));
        assert!(json.contains("gpt-4o"));
    }

    #[test]
    fn test_calculate_cost() {
        // 1M input + 1M output on sonnet = 3 + 15
        assert_eq!(calculate_cost(CLAUDE_SONNET, 1_000_000, 1_000_000), 18.0);
        assert_eq!(calculate_cost(GPT_4O_MINI, 2_000, 1_000), 0.0009);
        assert_eq!(calculate_cost("unknown-model", 5_000, 5_000), 0.0);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.123456789, 4), 0.1235);
        assert_eq!(round_to(1.0, 6), 1.0);
    }
}
