//! 表格执行引擎边界
//!
//! 编排器只通过 TabularEngine 与表格交互：执行命名操作、保存状态快照、把快照提升为最终产物、读取列名。
//! 列变换、统计、持久化格式都属于引擎实现；MemoryTable 是用于演示与测试的内存实现。

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use memory::MemoryTable;

/// 操作参数：有序的 key → JSON 值
pub type Parameters = serde_json::Map<String, serde_json::Value>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Snapshot failed: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// 已持久化状态的不透明引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateHandle(pub String);

impl StateHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StateHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 单次操作执行结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationOutcome {
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
    pub suggestion: Option<String>,
    /// 分析类操作：只读，不改变表格，执行后本次运行直接成功结束
    pub analysis_only: bool,
}

impl OperationOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            suggestion: None,
            analysis_only: false,
        }
    }

    pub fn analysis(message: impl Into<String>) -> Self {
        Self {
            analysis_only: true,
            ..Self::ok(message)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: String::new(),
            error: Some(error.into()),
            suggestion: None,
            analysis_only: false,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// 面向用户的失败描述（错误 + 建议）
    pub fn failure_text(&self) -> String {
        let error = self.error.as_deref().unwrap_or("执行失败");
        match &self.suggestion {
            Some(s) => format!("{error}\n\n{s}"),
            None => error.to_string(),
        }
    }
}

/// 表格执行引擎 trait
#[async_trait]
pub trait TabularEngine: Send + Sync {
    /// 执行命名操作；引擎拒绝（如列不存在）通过 OperationOutcome::failed 表达，而不是 Err
    async fn execute_operation(&self, name: &str, parameters: &Parameters) -> OperationOutcome;

    /// 保存当前状态，返回快照句柄
    async fn save_state(&self, location_hint: &str) -> Result<StateHandle, EngineError>;

    /// 将某个已保存的快照提升为最终产物
    async fn promote_state(
        &self,
        snapshot: &StateHandle,
        location_hint: &str,
    ) -> Result<StateHandle, EngineError>;

    /// 当前列名（有序）
    fn list_columns(&self) -> Vec<String>;
}
