//! 保留操作的参数结构与 JSON Schema（schemars 自动生成）
//!
//! - execute_tasks_in_order：复合指令拆分为有序子任务
//! - ask_clarification_question：模型无法确定意图时向用户提问
//! - route_to_<group>：两级路由的第二级选择器

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;

use crate::tools::OperationSchema;

pub const SPLIT_TASKS_OPERATION: &str = "execute_tasks_in_order";
pub const CLARIFICATION_OPERATION: &str = "ask_clarification_question";

/// execute_tasks_in_order 的参数
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SplitTasksArgs {
    /// 按执行顺序排列的原子指令，每条只做一件事
    #[serde(default)]
    pub tasks: Vec<String>,
}

/// ask_clarification_question 的参数
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ClarificationArgs {
    /// 向用户提出的问题
    #[serde(default)]
    pub question_to_user: String,
    /// 可供用户选择的候选项（如可能的列名）
    #[serde(default)]
    pub ambiguous_options: Vec<String>,
}

fn schema_value<T: JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
}

pub fn split_tasks_schema() -> OperationSchema {
    OperationSchema::new(
        SPLIT_TASKS_OPERATION,
        "将用户的复合指令拆分为按顺序执行的子任务列表",
        schema_value::<SplitTasksArgs>(),
    )
}

pub fn clarification_schema() -> OperationSchema {
    OperationSchema::new(
        CLARIFICATION_OPERATION,
        "当指令存在歧义（如无法确定目标列）时，向用户提出澄清问题并给出候选项",
        schema_value::<ClarificationArgs>(),
    )
}

/// 路由选择器：route_to_<group>
pub fn selector_schema(prefix: &str, group: &str) -> OperationSchema {
    OperationSchema::without_parameters(
        format!("{prefix}{group}"),
        format!("将指令交给 {group} 组的操作处理"),
    )
}
