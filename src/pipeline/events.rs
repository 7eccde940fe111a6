//! 运行进度事件：同一次运行内严格按产生顺序投递

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    /// 单任务翻译中
    Translating,
    TranslationDone,
    /// 复合指令已拆分
    TaskSplit,
    TranslatingSubtask,
    SubtaskTranslated,
    SubtaskTranslateFailed,
    TaskStart,
    TaskSuccess,
    TaskError,
    AnalysisResult,
    /// 需要用户澄清（终止事件，之后不再发送 done）
    Clarify,
    Hint,
    Saving,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionEvent {
    pub kind: EventKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tasks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ExecutionEvent {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            task_index: None,
            total_tasks: None,
            payload: None,
        }
    }

    /// task_index 从 1 开始
    pub fn task(mut self, index: usize, total: usize) -> Self {
        self.task_index = Some(index);
        self.total_tasks = Some(total);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Done | EventKind::Clarify | EventKind::Error)
    }
}

/// 发送事件；接收端已关闭时忽略
pub(crate) fn send_event(tx: Option<&UnboundedSender<ExecutionEvent>>, ev: ExecutionEvent) {
    tracing::debug!(kind = ?ev.kind, task_index = ?ev.task_index, message = %ev.message, "event");
    if let Some(tx) = tx {
        let _ = tx.send(ev);
    }
}
