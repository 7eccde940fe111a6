//! Mock 结构化调用客户端（用于测试，无需 API）
//!
//! 按顺序返回预置的响应脚本，并记录收到的每个请求；脚本耗尽后回显用户文本。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CallRequest, CallResponse, LlmError, StructuredCallClient};

#[derive(Debug, Default)]
pub struct MockStructuredClient {
    script: Mutex<VecDeque<Result<CallResponse, LlmError>>>,
    requests: Mutex<Vec<CallRequest>>,
}

impl MockStructuredClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: Vec<Result<CallResponse, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的请求（按调用顺序）
    pub fn requests(&self) -> Vec<CallRequest> {
        self.requests.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[async_trait]
impl StructuredCallClient for MockStructuredClient {
    async fn call(&self, request: CallRequest) -> Result<CallResponse, LlmError> {
        let echo = format!("Echo from Mock: {}", request.user);
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request);
        let next = self.script.lock().unwrap_or_else(|p| p.into_inner()).pop_front();
        next.unwrap_or_else(|| Ok(CallResponse::text(echo)))
    }
}
