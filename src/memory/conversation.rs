//! 对话消息与轮次
//!
//! Message 与 LLM API 的消息格式一致；Round 是一问一答（user + assistant），会话记忆以轮为单位保存。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 一轮对话：用户指令 + 执行摘要
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub user: String,
    pub assistant: String,
}

impl Round {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

/// 将若干轮展开为 LLM 消息序列（每轮两条）
pub fn rounds_to_messages(rounds: &[Round]) -> Vec<Message> {
    rounds
        .iter()
        .flat_map(|r| [Message::user(r.user.clone()), Message::assistant(r.assistant.clone())])
        .collect()
}
