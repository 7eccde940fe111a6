//! 操作目录与保留操作 schema

pub mod catalog;
pub mod schema;

pub use catalog::{OperationSchema, ToolCatalog};
pub use schema::{
    clarification_schema, selector_schema, split_tasks_schema, ClarificationArgs, SplitTasksArgs,
    CLARIFICATION_OPERATION, SPLIT_TASKS_OPERATION,
};
