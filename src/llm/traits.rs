//! 结构化调用服务抽象
//!
//! 请求 = system 指令 + 历史消息 + 用户文本 + 候选操作 schema + 选择策略；
//! 响应 = 若干操作调用（名称 + JSON 参数串）或一段自由文本。
//! 所有后端（OpenAI 兼容 / Mock / 限流包装）实现 StructuredCallClient，且自身不做重试。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::Message;
use crate::tools::OperationSchema;

/// 结构化调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// 服务端限流（HTTP 429）；由调用方决定退避与重试
    #[error("Rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("API error: {0}")]
    Api(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }
}

/// 操作选择策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// 由模型决定是否调用操作
    Auto,
    /// 必须调用候选中的某个操作
    Required,
    /// 必须调用指定操作
    Function(String),
}

/// 一次结构化调用请求
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub system: String,
    pub history: Vec<Message>,
    pub user: String,
    pub tools: Vec<OperationSchema>,
    pub choice: ToolChoice,
}

impl CallRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            history: Vec::new(),
            user: user.into(),
            tools: Vec::new(),
            choice: ToolChoice::Auto,
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_tools(mut self, tools: Vec<OperationSchema>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_choice(mut self, choice: ToolChoice) -> Self {
        self.choice = choice;
        self
    }

    /// 拼接后的完整消息序列：system + history + user
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(Message::system(self.system.clone()));
        messages.extend(self.history.iter().cloned());
        messages.push(Message::user(self.user.clone()));
        messages
    }
}

/// 模型选中的一个操作调用（参数为原始 JSON 字符串，由解释器负责解析）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawToolCall {
    pub name: String,
    pub arguments: String,
}

impl RawToolCall {
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// 结构化调用响应
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallResponse {
    pub tool_calls: Vec<RawToolCall>,
    pub content: Option<String>,
}

impl CallResponse {
    pub fn tool_call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            tool_calls: vec![RawToolCall::new(name, arguments)],
            content: None,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self {
            tool_calls: Vec::new(),
            content: Some(content.into()),
        }
    }
}

/// 结构化调用客户端 trait
#[async_trait]
pub trait StructuredCallClient: Send + Sync {
    async fn call(&self, request: CallRequest) -> Result<CallResponse, LlmError>;
}
