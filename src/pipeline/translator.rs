//! 指令翻译：帮助短路 → 路由选候选操作 → 结构化调用 → 解释为 TranslationResponse
//!
//! 只有限流以 Err 返回（由编排器退避重试）；其他服务错误转为 Error 变体。

use std::sync::Arc;

use crate::config::PipelineSettings;
use crate::llm::{CallRequest, LlmError, StructuredCallClient, ToolChoice};
use crate::memory::{rounds_to_messages, Round};
use crate::pipeline::interpreter::{help_shortcut, interpret};
use crate::pipeline::{ErrorCode, RoutingDecision, ToolRouter, TranslationResponse};
use crate::tools::clarification_schema;

/// 一次翻译的结果；帮助短路时 routing 为 None
#[derive(Debug, Clone)]
pub struct Translation {
    pub response: TranslationResponse,
    pub routing: Option<RoutingDecision>,
}

pub struct Translator {
    client: Arc<dyn StructuredCallClient>,
    router: ToolRouter,
    settings: Arc<PipelineSettings>,
}

/// 把 `{headers}` 替换为列名列表
pub fn render_system_prompt(template: &str, columns: &[String]) -> String {
    template.replace("{headers}", &columns.join(", "))
}

impl Translator {
    pub fn new(client: Arc<dyn StructuredCallClient>, settings: Arc<PipelineSettings>) -> Self {
        let config = &settings.config;
        let router = ToolRouter::new(
            client.clone(),
            config.routing.clone(),
            settings.catalog.clone(),
            config.prompts.router.clone(),
        );
        Self {
            client,
            router,
            settings,
        }
    }

    pub async fn translate(
        &self,
        command: &str,
        history: &[Round],
        columns: &[String],
    ) -> Result<Translation, LlmError> {
        let prompts = &self.settings.config.prompts;
        if let Some(help) = help_shortcut(command, prompts) {
            return Ok(Translation {
                response: help,
                routing: None,
            });
        }

        let routing = self.router.route(command).await?;
        let mut tools = self.settings.catalog.select(&routing.selected_operations);
        tools.push(clarification_schema());

        let request = CallRequest::new(render_system_prompt(&prompts.general_base, columns), command)
            .with_history(rounds_to_messages(history))
            .with_tools(tools)
            .with_choice(ToolChoice::Auto);

        let response = match self.client.call(request).await {
            Ok(raw) => interpret(raw, prompts),
            Err(e) if e.is_rate_limited() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "translation call failed");
                TranslationResponse::error(e.to_string(), ErrorCode::TranslationFailed)
            }
        };
        tracing::debug!(
            kind = response.kind(),
            path = ?routing.path,
            candidates = routing.selected_operations.len(),
            "command translated"
        );
        Ok(Translation {
            response,
            routing: Some(routing),
        })
    }
}
