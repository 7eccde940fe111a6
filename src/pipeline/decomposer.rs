//! 复合指令拆分：强制调用 execute_tasks_in_order，得到有序子任务列表
//!
//! 无调用、空列表、只有一个任务都视为「不可拆分」（Ok(None)），由调用方回退到单任务翻译。
//! 限流错误原样返回，退避由调用方负责。

use std::sync::Arc;

use crate::llm::{CallRequest, LlmError, StructuredCallClient, ToolChoice};
use crate::memory::{rounds_to_messages, Round};
use crate::tools::{split_tasks_schema, SplitTasksArgs, SPLIT_TASKS_OPERATION};

pub struct TaskDecomposer {
    client: Arc<dyn StructuredCallClient>,
    system_prompt: String,
}

impl TaskDecomposer {
    pub fn new(client: Arc<dyn StructuredCallClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            client,
            system_prompt: system_prompt.into(),
        }
    }

    pub async fn decompose(
        &self,
        command: &str,
        history: &[Round],
    ) -> Result<Option<Vec<String>>, LlmError> {
        let request = CallRequest::new(self.system_prompt.clone(), command)
            .with_history(rounds_to_messages(history))
            .with_tools(vec![split_tasks_schema()])
            .with_choice(ToolChoice::Function(SPLIT_TASKS_OPERATION.to_string()));

        let response = match self.client.call(request).await {
            Ok(r) => r,
            Err(e) if e.is_rate_limited() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "decomposition call failed, treating as unavailable");
                return Ok(None);
            }
        };

        let Some(call) = response
            .tool_calls
            .iter()
            .find(|c| c.name == SPLIT_TASKS_OPERATION)
        else {
            tracing::debug!("decomposition returned no structured call");
            return Ok(None);
        };

        let tasks: Vec<String> = match serde_json::from_str::<SplitTasksArgs>(&call.arguments) {
            Ok(args) => args
                .tasks
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "decomposition arguments unparsable");
                return Ok(None);
            }
        };

        if tasks.len() < 2 {
            tracing::debug!(count = tasks.len(), "decomposition degenerate");
            return Ok(None);
        }
        tracing::info!(count = tasks.len(), "command decomposed");
        Ok(Some(tasks))
    }
}
