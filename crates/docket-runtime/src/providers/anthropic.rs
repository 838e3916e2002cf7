//! Anthropic Messages API provider with tool use.
//!
//! The API key is held as an [`ApiCredential`] and only exposed when the
//! `x-api-key` header is written.

use super::{
    factory::ProviderFactory, ChatMessage, CompletionConfig, CompletionResponse, LlmProvider,
    ProviderError, TokenUsage, ToolChoice, ToolUse,
};
use crate::config::LlmConfig;
use crate::secrets::{ApiCredential, CredentialSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    credential: ApiCredential,
    base_url: String,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            credential: ApiCredential::new(
                api_key,
                CredentialSource::Programmatic,
                "Anthropic API key",
            ),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Read `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::from_config(&LlmConfig::default())
    }

    /// `llm.api_key` if set, else `ANTHROPIC_API_KEY`; `llm.base_url` if set.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config.api_key.as_deref(),
            ANTHROPIC_API_KEY_ENV,
            "Anthropic API key",
        )?;

        Ok(Self {
            credential,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn client() -> &'static reqwest::Client {
        static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
        CLIENT.get_or_init(|| {
            reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new())
        })
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<SystemBlock>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<AnthropicToolChoice>,
}

#[derive(Debug, Serialize)]
struct AnthropicToolChoice {
    #[serde(rename = "type")]
    type_: &'static str,
}

#[derive(Debug, Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    type_: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    type_: &'static str,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ResponseBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

/// Split out system text and convert the rest to API messages.
fn to_api_messages(
    messages: Vec<ChatMessage>,
    prompt_caching: bool,
) -> (Vec<SystemBlock>, Vec<AnthropicMessage>) {
    let mut system = Vec::new();
    let mut api_messages = Vec::new();

    for msg in messages {
        if msg.role == "system" {
            system.push(SystemBlock {
                type_: "text",
                text: msg.content,
                cache_control: None,
            });
            continue;
        }

        let mut content = Vec::new();
        if !msg.content.is_empty() {
            content.push(ContentBlock::Text { text: msg.content });
        }
        content.extend(msg.tool_calls.into_iter().map(|c| ContentBlock::ToolUse {
            id: c.id,
            name: c.name,
            input: c.input,
        }));
        content.extend(msg.tool_results.into_iter().map(|r| ContentBlock::ToolResult {
            tool_use_id: r.tool_use_id,
            content: r.content,
            is_error: r.is_error,
        }));

        if !content.is_empty() {
            api_messages.push(AnthropicMessage {
                role: msg.role,
                content,
            });
        }
    }

    // One breakpoint on the (stable) system prompt.
    if prompt_caching {
        if let Some(last) = system.last_mut() {
            last.cache_control = Some(CacheControl { type_: "ephemeral" });
        }
    }

    (system, api_messages)
}

fn build_request(messages: Vec<ChatMessage>, config: &CompletionConfig) -> AnthropicRequest {
    let (system, messages) = to_api_messages(messages, config.prompt_caching);
    let tool_choice = (!config.tools.is_empty()).then(|| AnthropicToolChoice {
        type_: match config.tool_choice {
            ToolChoice::Auto => "auto",
            ToolChoice::None => "none",
        },
    });
    AnthropicRequest {
        model: config.model.clone(),
        max_tokens: config.max_tokens,
        system,
        messages,
        temperature: if config.temperature == 0.0 {
            None
        } else {
            Some(config.temperature)
        },
        tools: config
            .tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect(),
        tool_choice,
    }
}

fn into_completion(body: AnthropicResponse) -> CompletionResponse {
    let mut text = Vec::new();
    let mut tool_calls = Vec::new();
    for block in body.content {
        match block {
            ResponseBlock::Text { text: t } => text.push(t),
            ResponseBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolUse { id, name, input })
            }
            ResponseBlock::Other => {}
        }
    }

    CompletionResponse {
        content: text.join(""),
        tool_calls,
        usage: TokenUsage {
            prompt_tokens: body.usage.input_tokens,
            completion_tokens: body.usage.output_tokens,
            cache_read_tokens: body.usage.cache_read_input_tokens,
            cache_creation_tokens: body.usage.cache_creation_input_tokens,
        },
        model: body.model,
        stop_reason: body.stop_reason,
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = build_request(messages, config);

        let response = Self::client()
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(config.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthError);
        }

        if !status.is_success() {
            let error_body = response
                .json::<AnthropicError>()
                .await
                .map_err(|e| ProviderError::ParseError(e.to_string()))?;

            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: error_body.error.message,
            });
        }

        let body: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        tracing::debug!(
            model = %body.model,
            input_tokens = body.usage.input_tokens,
            output_tokens = body.usage.output_tokens,
            "anthropic completion"
        );

        Ok(into_completion(body))
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

pub struct AnthropicProviderFactory;

impl ProviderFactory for AnthropicProviderFactory {
    fn provider_type(&self) -> &'static str {
        "anthropic"
    }

    fn create(&self, config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(AnthropicProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &LlmConfig) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(config.api_key.as_deref(), ANTHROPIC_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "Anthropic API key required: set 'llm.api_key' in config or {} env",
                ANTHROPIC_API_KEY_ENV
            )));
        }

        if let Some(url) = config.base_url.as_deref() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn description(&self) -> &'static str {
        "Anthropic Messages API with tool use"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ToolResult;
    use docket_core::tool_specs;
    use serde_json::json;

    #[test]
    fn test_api_key_not_in_debug_output() {
        let secret_key = "sk-ant-REDACTED";
        let provider = AnthropicProvider::new(secret_key);

        let debug_output = format!("{:?}", provider);
        assert!(!debug_output.contains(secret_key));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_health_check_requires_key() {
        assert!(AnthropicProvider::new("key").health_check().await);
        assert!(!AnthropicProvider::new("").health_check().await);
    }

    #[test]
    fn test_from_config_uses_configured_key_and_url() {
        let config = LlmConfig {
            api_key: Some("config-api-key".to_string()),
            base_url: Some("https://proxy.example/v1".to_string()),
            ..LlmConfig::default()
        };
        let provider = AnthropicProvider::from_config(&config).unwrap();
        assert_eq!(provider.base_url, "https://proxy.example/v1");
        assert_eq!(provider.credential.expose(), "config-api-key");
        assert_eq!(provider.credential.source(), CredentialSource::Config);
    }

    #[test]
    fn test_factory_rejects_bad_base_url() {
        let config = LlmConfig {
            api_key: Some("k".to_string()),
            base_url: Some("api.anthropic.com".to_string()),
            ..LlmConfig::default()
        };
        assert!(AnthropicProviderFactory.validate_config(&config).is_err());
    }

    #[test]
    fn test_request_shape_with_tools_and_results() {
        let config = CompletionConfig::default().with_tools(tool_specs().unwrap().to_vec());
        let messages = vec![
            ChatMessage::system("be calm"),
            ChatMessage::user("when was I arraigned?"),
            ChatMessage::assistant_tool_calls(
                "",
                vec![ToolUse {
                    id: "toolu_1".into(),
                    name: "search_case_record".into(),
                    input: json!({"query_type": "dates"}),
                }],
            ),
            ChatMessage::tool_results(vec![ToolResult {
                tool_use_id: "toolu_1".into(),
                content: "{\"match_count\":1}".into(),
                is_error: false,
            }]),
        ];

        let value = serde_json::to_value(build_request(messages, &config)).unwrap();

        assert_eq!(value["system"][0]["text"], "be calm");
        assert_eq!(value["system"][0]["cache_control"]["type"], "ephemeral");
        assert_eq!(value["messages"].as_array().unwrap().len(), 3);
        assert_eq!(value["messages"][1]["content"][0]["type"], "tool_use");
        assert_eq!(value["messages"][2]["role"], "user");
        assert_eq!(value["messages"][2]["content"][0]["type"], "tool_result");
        assert!(value["messages"][2]["content"][0].get("is_error").is_none());
        assert_eq!(value["tools"][0]["name"], "search_case_record");
        assert_eq!(value["tool_choice"]["type"], "auto");
        assert!((value["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_request_omits_tools_when_none_offered() {
        let value =
            serde_json::to_value(build_request(vec![ChatMessage::user("hi")], &CompletionConfig::default()))
                .unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("tool_choice").is_none());
        assert!(value.get("system").is_none());
    }

    #[test]
    fn test_follow_up_forbids_new_tool_calls() {
        let config = CompletionConfig::default()
            .with_tools(tool_specs().unwrap().to_vec())
            .without_tool_calls();
        let value = serde_json::to_value(build_request(vec![ChatMessage::user("hi")], &config)).unwrap();
        assert_eq!(value["tools"].as_array().unwrap().len(), 2);
        assert_eq!(value["tool_choice"]["type"], "none");
    }

    #[test]
    fn test_response_parsing_collects_tool_calls() {
        let body: AnthropicResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_9", "name": "get_outcome_stats", "input": {"stage_id": "CASE_CLOSED"}},
                {"type": "thinking", "thinking": "..."}
            ],
            "model": "claude-test",
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }))
        .unwrap();

        let completion = into_completion(body);
        assert_eq!(completion.content, "Let me check.");
        assert!(completion.wants_tools());
        assert_eq!(completion.tool_calls[0].name, "get_outcome_stats");
        assert_eq!(completion.usage.total(), 15);
    }
}
