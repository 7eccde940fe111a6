//! 翻译结果：封闭的变体集合，每个实例恰好一种

use serde::{Deserialize, Serialize};

use crate::engine::Parameters;

/// 一个待执行的操作调用（参数保持模型返回的键顺序）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub operation_name: String,
    pub parameters: Parameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// 参数 JSON 解析失败
    ParseFailed,
    /// 结构化调用服务出错（非限流）
    TranslationFailed,
    UnexpectedResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranslationResponse {
    ToolCalls { calls: Vec<ToolCall> },
    Clarification { question: String, options: Vec<String> },
    Help { message: String },
    FriendlyMessage { message: String },
    TaskList { tasks: Vec<String> },
    Error { message: String, code: ErrorCode },
}

impl TranslationResponse {
    pub fn error(message: impl Into<String>, code: ErrorCode) -> Self {
        TranslationResponse::Error {
            message: message.into(),
            code,
        }
    }

    /// 变体名，与序列化的 type 标签一致
    pub fn kind(&self) -> &'static str {
        match self {
            TranslationResponse::ToolCalls { .. } => "tool_calls",
            TranslationResponse::Clarification { .. } => "clarification",
            TranslationResponse::Help { .. } => "help",
            TranslationResponse::FriendlyMessage { .. } => "friendly_message",
            TranslationResponse::TaskList { .. } => "task_list",
            TranslationResponse::Error { .. } => "error",
        }
    }
}
