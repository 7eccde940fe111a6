//! 翻译结果解释器：把结构化调用的原始输出转换为 TranslationResponse
//!
//! 规则依次为：帮助短语短路 → 无调用则友好回复 → 首个调用为澄清则只返回澄清 → 逐个解析参数。

use serde_json::Value;

use crate::config::PromptsSection;
use crate::engine::Parameters;
use crate::llm::CallResponse;
use crate::pipeline::{ErrorCode, ToolCall, TranslationResponse};
use crate::tools::{ClarificationArgs, SplitTasksArgs, CLARIFICATION_OPERATION, SPLIT_TASKS_OPERATION};

/// 指令与帮助短语完全相同（忽略大小写与首尾空白）时返回帮助信息，不调用服务
pub fn help_shortcut(command: &str, prompts: &PromptsSection) -> Option<TranslationResponse> {
    let normalized = command.trim().to_lowercase();
    prompts
        .help_phrases
        .iter()
        .any(|p| p.trim().to_lowercase() == normalized)
        .then(|| TranslationResponse::Help {
            message: prompts.help_message.clone(),
        })
}

fn parse_arguments(raw: &str) -> Result<Parameters, String> {
    if raw.trim().is_empty() {
        return Ok(Parameters::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("参数不是 JSON 对象: {other}")),
        Err(e) => Err(e.to_string()),
    }
}

pub fn interpret(response: CallResponse, prompts: &PromptsSection) -> TranslationResponse {
    let Some(first) = response.tool_calls.first() else {
        let message = response
            .content
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| prompts.friendly_fallback.clone());
        return TranslationResponse::FriendlyMessage { message };
    };

    if first.name == CLARIFICATION_OPERATION {
        return match serde_json::from_str::<ClarificationArgs>(&first.arguments) {
            Ok(args) => TranslationResponse::Clarification {
                question: args.question_to_user,
                options: args.ambiguous_options,
            },
            Err(e) => TranslationResponse::error(format!("澄清参数解析失败: {e}"), ErrorCode::ParseFailed),
        };
    }

    if first.name == SPLIT_TASKS_OPERATION {
        return match serde_json::from_str::<SplitTasksArgs>(&first.arguments) {
            Ok(args) => TranslationResponse::TaskList { tasks: args.tasks },
            Err(e) => TranslationResponse::error(format!("任务列表解析失败: {e}"), ErrorCode::ParseFailed),
        };
    }

    let mut calls = Vec::with_capacity(response.tool_calls.len());
    for raw in &response.tool_calls {
        match parse_arguments(&raw.arguments) {
            Ok(parameters) => calls.push(ToolCall {
                operation_name: raw.name.clone(),
                parameters,
            }),
            Err(e) => {
                tracing::warn!(operation = %raw.name, error = %e, "tool call arguments unparsable");
                return TranslationResponse::error(
                    format!("操作 {} 的参数解析失败: {e}", raw.name),
                    ErrorCode::ParseFailed,
                );
            }
        }
    }
    TranslationResponse::ToolCalls { calls }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::RawToolCall;

    fn prompts() -> PromptsSection {
        PromptsSection::default()
    }

    #[test]
    fn test_help_shortcut_case_insensitive() {
        assert!(matches!(help_shortcut("  HELP ", &prompts()), Some(TranslationResponse::Help { .. })));
        assert!(help_shortcut("help me set prices", &prompts()).is_none());
    }

    #[test]
    fn test_no_call_uses_text_or_fallback() {
        let p = prompts();
        assert_eq!(
            interpret(CallResponse::text("你好"), &p),
            TranslationResponse::FriendlyMessage { message: "你好".into() }
        );
        assert_eq!(
            interpret(CallResponse::default(), &p),
            TranslationResponse::FriendlyMessage { message: p.friendly_fallback.clone() }
        );
    }

    #[test]
    fn test_clarification_short_circuits() {
        let response = CallResponse {
            tool_calls: vec![
                RawToolCall::new(
                    CLARIFICATION_OPERATION,
                    r#"{"question_to_user":"哪一列？","ambiguous_options":["单价","总价"]}"#,
                ),
                RawToolCall::new("set_column_value", r#"{"column":"单价","value":1}"#),
            ],
            content: None,
        };
        assert_eq!(
            interpret(response, &prompts()),
            TranslationResponse::Clarification {
                question: "哪一列？".into(),
                options: vec!["单价".into(), "总价".into()],
            }
        );
    }

    #[test]
    fn test_tool_calls_keep_order() {
        let response = CallResponse {
            tool_calls: vec![
                RawToolCall::new("add_column", r#"{"column":"税率"}"#),
                RawToolCall::new("set_column_value", r#"{"column":"税率","value":0.13}"#),
            ],
            content: None,
        };
        let TranslationResponse::ToolCalls { calls } = interpret(response, &prompts()) else {
            panic!("Expected ToolCalls");
        };
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].operation_name, "add_column");
        assert_eq!(calls[1].parameters["value"], 0.13);
    }

    #[test]
    fn test_parse_failure_is_error() {
        let response = CallResponse::tool_call("set_column_value", "{not json");
        match interpret(response, &prompts()) {
            TranslationResponse::Error { code, .. } => assert_eq!(code, ErrorCode::ParseFailed),
            other => panic!("Expected Error, got {other:?}"),
        }
    }

    #[test]
    fn test_parameter_order_preserved() {
        let response = CallResponse::tool_call("f", r#"{"z":1,"a":2,"m":3}"#);
        let TranslationResponse::ToolCalls { calls } = interpret(response, &prompts()) else {
            panic!("Expected ToolCalls");
        };
        let keys: Vec<_> = calls[0].parameters.keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }
}
