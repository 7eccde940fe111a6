//! OpenAI 兼容结构化调用客户端
//!
//! 通过 reqwest 直接 POST `{base_url}/chat/completions`，携带 tools / tool_choice；
//! 支持 DeepSeek、Moonshot、OpenAI 及自建代理。HTTP 429 映射为 LlmError::RateLimited
//! （解析 Retry-After），本客户端不做重试。
//!
//! 未使用 async-openai：它会自行重试 429 且不暴露 Retry-After 响应头，
//! 限流退避需要由 RetryPolicy 统一控制，tool_choice 也需要逐请求设置 required / 指定函数。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::LlmSection;
use crate::llm::{CallRequest, CallResponse, LlmError, RawToolCall, StructuredCallClient, ToolChoice};
use crate::memory::Role;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const MOONSHOT_8K: &str = "moonshot-v1-8k";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn get(&self) -> (u64, u64, u64) {
        let p = self.prompt_tokens.load(Ordering::Relaxed);
        let c = self.completion_tokens.load(Ordering::Relaxed);
        (p, c, p + c)
    }
}

/// 根据 base_url 推断默认模型
pub fn default_model_for(base_url: &str) -> &'static str {
    let url = base_url.to_lowercase();
    if url.contains("moonshot") {
        MOONSHOT_8K
    } else if url.contains("deepseek") {
        DEEPSEEK_CHAT
    } else {
        DEFAULT_MODEL
    }
}

pub struct OpenAiCompatClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    pub usage: TokenUsage,
}

impl OpenAiCompatClient {
    pub fn new(base_url: Option<&str>, model: Option<&str>, api_key: &str, timeout: Duration) -> Self {
        let base_url = base_url
            .unwrap_or(OPENAI_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let model = model
            .map(String::from)
            .unwrap_or_else(|| default_model_for(&base_url).to_string());
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();
        tracing::info!(base_url = %base_url, model = %model, "structured call client ready");
        Self {
            client,
            base_url,
            model,
            api_key: api_key.to_string(),
            usage: TokenUsage::default(),
        }
    }

    /// 从配置与环境变量构建；未找到 API Key 时返回 None
    ///
    /// 环境变量优先级：OPENAI_API_KEY > DEEPSEEK_API_KEY > MOONSHOT_API_KEY
    pub fn from_config(llm: &LlmSection) -> Option<Self> {
        let api_key = ["OPENAI_API_KEY", "DEEPSEEK_API_KEY", "MOONSHOT_API_KEY"]
            .iter()
            .find_map(|k| std::env::var(k).ok().filter(|v| !v.trim().is_empty()))?;
        let base_url = llm
            .base_url
            .clone()
            .or_else(|| std::env::var("OPENAI_BASE_URL").ok());
        Some(Self::new(
            base_url.as_deref(),
            llm.model.as_deref(),
            &api_key,
            Duration::from_secs(llm.request_timeout_secs),
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_body(&self, request: &CallRequest) -> Value {
        let messages: Vec<Value> = request
            .messages()
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                json!({ "role": role, "content": m.content })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.0,
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = match &request.choice {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::Required => json!("required"),
                ToolChoice::Function(name) => json!({ "type": "function", "function": { "name": name } }),
            };
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Retry-After 秒数 → 毫秒
fn parse_retry_after(value: &str) -> Option<u64> {
    let secs: f64 = value.trim().parse().ok()?;
    (secs >= 0.0).then(|| (secs * 1000.0) as u64)
}

fn into_call_response(parsed: ChatResponse) -> Result<CallResponse, LlmError> {
    let message = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| LlmError::InvalidResponse("no choices".to_string()))?;
    Ok(CallResponse {
        tool_calls: message
            .tool_calls
            .into_iter()
            .map(|tc| RawToolCall::new(tc.function.name, tc.function.arguments))
            .collect(),
        content: message.content.filter(|c| !c.trim().is_empty()),
    })
}

#[async_trait]
impl StructuredCallClient for OpenAiCompatClient {
    async fn call(&self, request: CallRequest) -> Result<CallResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Api(format!("Request failed: {e}"))
                }
            })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            tracing::warn!(?retry_after_ms, model = %self.model, "rate limited by provider");
            return Err(LlmError::RateLimited { retry_after_ms });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {status}: {text}")));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        if let Some(usage) = &parsed.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }
        into_call_response(parsed)
    }
}
