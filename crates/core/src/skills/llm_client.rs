//! # LLM Client
//!
//! One text-in/text-out call to a hosted model. Anthropic models go through
//! the Messages API and OpenAI models through Chat Completions.
//!
//! Timeouts, connection errors and HTTP 429 are retried with exponential
//! backoff (`2^attempt` seconds). Any other API error fails immediately.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

use crate::models::{calculate_cost, LlmProvider, ModelConfig};
use crate::skills::Usage;

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A single system + user message exchange
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub user_message: String,
    pub max_tokens: u32,
}

impl LlmRequest {
    pub fn new(system_prompt: impl Into<String>, user_message: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_message: user_message.into(),
            max_tokens,
        }
    }
}

/// Raw provider answer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: f64,
}

/// Provider-agnostic completion backend
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, config: &ModelConfig, request: &LlmRequest) -> anyhow::Result<LlmResponse>;
}

/// Model text plus the usage it cost
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub usage: Usage,
}

/// Run one completion and price it.
pub async fn complete_with_usage(
    llm: &dyn LlmBackend,
    config: &ModelConfig,
    request: &LlmRequest,
    caller: &str,
) -> anyhow::Result<Completion> {
    tracing::info!(skill = caller, model = %config.model, "Calling LLM");

    let response = llm.complete(config, request).await?;
    let model = if response.model.is_empty() {
        config.model.clone()
    } else {
        response.model.clone()
    };
    let cost = calculate_cost(&model, response.input_tokens, response.output_tokens);
    let mut usage = Usage::new(model, response.input_tokens, response.output_tokens, cost);
    usage.latency_ms = response.latency_ms;

    tracing::info!(
        skill = caller,
        tokens = usage.total_tokens,
        cost_usd = cost,
        latency_ms = usage.latency_ms,
        "LLM call done"
    );

    Ok(Completion {
        content: response.content,
        usage,
    })
}

/// Failure classification for the retry loop
enum CallError {
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            CallError::Retryable(err.into())
        } else {
            CallError::Fatal(err.into())
        }
    }
}

/// `reqwest`-backed client for Anthropic and OpenAI
pub struct HttpLlmClient {
    client: reqwest::Client,
    anthropic_key: Option<String>,
    openai_key: Option<String>,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn new(anthropic_key: Option<String>, openai_key: Option<String>, max_retries: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            anthropic_key,
            openai_key,
            max_retries: max_retries.max(1),
        }
    }

    /// Read API keys from `ANTHROPIC_API_KEY` / `OPENAI_API_KEY`.
    pub fn from_env(max_retries: u32) -> Self {
        let key = |provider: LlmProvider| {
            std::env::var(provider.api_key_var())
                .ok()
                .filter(|k| !k.is_empty())
        };
        Self::new(
            key(LlmProvider::Anthropic),
            key(LlmProvider::OpenAI),
            max_retries,
        )
    }

    fn api_key(&self, provider: LlmProvider) -> anyhow::Result<&str> {
        let key = match provider {
            LlmProvider::Anthropic => self.anthropic_key.as_deref(),
            LlmProvider::OpenAI => self.openai_key.as_deref(),
        };
        key.ok_or_else(|| anyhow::anyhow!("{} is not set", provider.api_key_var()))
    }

    async fn call_once(
        &self,
        config: &ModelConfig,
        request: &LlmRequest,
        api_key: &str,
    ) -> Result<LlmResponse, CallError> {
        let start = Instant::now();
        let (url, body) = match config.provider {
            LlmProvider::Anthropic => (
                format!("{}/v1/messages", base_url(config, ANTHROPIC_BASE_URL)),
                anthropic_body(config, request),
            ),
            LlmProvider::OpenAI => (
                format!("{}/v1/chat/completions", base_url(config, OPENAI_BASE_URL)),
                openai_body(config, request),
            ),
        };

        let builder = self.client.post(&url).json(&body);
        let builder = match config.provider {
            LlmProvider::Anthropic => builder
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            LlmProvider::OpenAI => builder.bearer_auth(api_key),
        };

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CallError::Retryable(anyhow::anyhow!(
                "rate limited ({}): {}",
                status,
                text
            )));
        }
        if !status.is_success() {
            return Err(CallError::Fatal(anyhow::anyhow!(
                "API returned {}: {}",
                status,
                text
            )));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| CallError::Fatal(anyhow::anyhow!("Failed to parse response JSON: {}", e)))?;
        let mut parsed = match config.provider {
            LlmProvider::Anthropic => parse_anthropic_response(&json),
            LlmProvider::OpenAI => parse_openai_response(&json),
        }
        .map_err(CallError::Fatal)?;
        if parsed.model.is_empty() {
            parsed.model = config.model.clone();
        }
        parsed.latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        Ok(parsed)
    }
}

#[async_trait]
impl LlmBackend for HttpLlmClient {
    async fn complete(&self, config: &ModelConfig, request: &LlmRequest) -> anyhow::Result<LlmResponse> {
        let api_key = self.api_key(config.provider)?;
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            match self.call_once(config, request, api_key).await {
                Ok(response) => return Ok(response),
                Err(CallError::Fatal(e)) => {
                    tracing::error!(
                        provider = config.provider.display_name(),
                        "API error (non-retryable): {:#}",
                        e
                    );
                    return Err(e);
                }
                Err(CallError::Retryable(e)) => {
                    let wait = backoff_delay(attempt);
                    tracing::warn!(
                        provider = config.provider.display_name(),
                        attempt = attempt + 1,
                        max = self.max_retries,
                        "API error: {:#}. Retrying in {}s",
                        e,
                        wait.as_secs()
                    );
                    last_error = Some(e);
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        Err(anyhow::anyhow!(
            "{} API failed after {} retries: {}",
            config.provider.display_name(),
            self.max_retries,
            last_error.map(|e| format!("{:#}", e)).unwrap_or_default()
        ))
    }
}

fn base_url<'a>(config: &'a ModelConfig, default: &'a str) -> &'a str {
    config
        .base_url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
}

/// Wait before retry number `attempt + 1`
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

fn anthropic_body(config: &ModelConfig, request: &LlmRequest) -> Value {
    json!({
        "model": config.model,
        "max_tokens": request.max_tokens,
        "temperature": config.temperature,
        "system": request.system_prompt,
        "messages": [{ "role": "user", "content": request.user_message }],
    })
}

fn openai_body(config: &ModelConfig, request: &LlmRequest) -> Value {
    json!({
        "model": config.model,
        "max_tokens": request.max_tokens,
        "temperature": config.temperature,
        "messages": [
            { "role": "system", "content": request.system_prompt },
            { "role": "user", "content": request.user_message },
        ],
    })
}

fn parse_anthropic_response(json: &Value) -> anyhow::Result<LlmResponse> {
    let content = json
        .get("content")
        .and_then(|c| c.as_array())
        .and_then(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .map(str::to_string)
                .reduce(|a, b| format!("{}\n{}", a, b))
        })
        .ok_or_else(|| anyhow::anyhow!("Anthropic response has no text content"))?;

    let usage = json.get("usage");
    let tokens = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };

    Ok(LlmResponse {
        content,
        model: string_field(json, "model"),
        input_tokens: tokens("input_tokens"),
        output_tokens: tokens("output_tokens"),
        latency_ms: 0.0,
    })
}

fn parse_openai_response(json: &Value) -> anyhow::Result<LlmResponse> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("OpenAI response has no message content"))?
        .to_string();

    let usage = json.get("usage");
    let tokens = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };

    Ok(LlmResponse {
        content,
        model: string_field(json, "model"),
        input_tokens: tokens("prompt_tokens"),
        output_tokens: tokens("completion_tokens"),
        latency_ms: 0.0,
    })
}

fn string_field(json: &Value, key: &str) -> String {
    json.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CLAUDE_HAIKU, GPT_4O_MINI};

    struct CannedBackend(LlmResponse);

    #[async_trait]
    impl LlmBackend for CannedBackend {
        async fn complete(&self, _config: &ModelConfig, _request: &LlmRequest) -> anyhow::Result<LlmResponse> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_parse_anthropic_response() {
        let json = json!({
            "model": CLAUDE_HAIKU,
            "content": [
                { "type": "text", "text": "## Question 1: Users" },
                { "type": "tool_use", "id": "x" },
                { "type": "text", "text": "Who uses it?" }
            ],
            "usage": { "input_tokens": 40, "output_tokens": 12 }
        });
        let parsed = parse_anthropic_response(&json).unwrap();
        assert_eq!(parsed.content, "## Question 1: Users\nWho uses it?");
        assert_eq!(parsed.input_tokens, 40);
        assert_eq!(parsed.output_tokens, 12);
        assert_eq!(parsed.model, CLAUDE_HAIKU);
    }

    #[test]
    fn test_parse_openai_response() {
        let json = json!({
            "model": GPT_4O_MINI,
            "choices": [{ "message": { "role": "assistant", "content": "{\"issues_found\": false}" } }],
            "usage": { "prompt_tokens": 900, "completion_tokens": 100, "total_tokens": 1000 }
        });
        let parsed = parse_openai_response(&json).unwrap();
        assert_eq!(parsed.content, "{\"issues_found\": false}");
        assert_eq!(parsed.input_tokens, 900);
        assert_eq!(parsed.output_tokens, 100);
    }

    #[test]
    fn test_missing_content_is_an_error() {
        assert!(parse_openai_response(&json!({ "choices": [] })).is_err());
        assert!(parse_anthropic_response(&json!({ "content": [] })).is_err());
    }

    #[test]
    fn test_request_bodies() {
        let config = ModelConfig::new(GPT_4O_MINI).with_temperature(0.3);
        let request = LlmRequest::new("be strict", "audit this", 2048);

        let body = openai_body(&config, &request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["max_tokens"], 2048);

        let body = anthropic_body(&ModelConfig::new(CLAUDE_HAIKU), &request);
        assert_eq!(body["system"], "be strict");
        assert_eq!(body["messages"][0]["content"], "audit this");
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_base_url_override() {
        let config = ModelConfig::new(GPT_4O_MINI).with_base_url("http://localhost:8080/");
        assert_eq!(base_url(&config, OPENAI_BASE_URL), "http://localhost:8080");
        assert_eq!(
            base_url(&ModelConfig::new(GPT_4O_MINI), OPENAI_BASE_URL),
            OPENAI_BASE_URL
        );
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let client = HttpLlmClient::new(None, None, 3);
        let err = client
            .complete(&ModelConfig::new(CLAUDE_HAIKU), &LlmRequest::new("s", "u", 16))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[tokio::test]
    async fn test_complete_with_usage_prices_the_call() {
        let backend = CannedBackend(LlmResponse {
            content: "ok".to_string(),
            model: GPT_4O_MINI.to_string(),
            input_tokens: 2_000,
            output_tokens: 1_000,
            latency_ms: 12.5,
        });
        let completion = complete_with_usage(
            &backend,
            &ModelConfig::new(GPT_4O_MINI),
            &LlmRequest::new("s", "u", 16),
            "critic",
        )
        .await
        .unwrap();

        assert_eq!(completion.content, "ok");
        assert_eq!(completion.usage.total_tokens, 3_000);
        assert_eq!(completion.usage.cost_usd, 0.0009);
        assert_eq!(completion.usage.latency_ms, 12.5);
    }
}
