//! 操作目录
//!
//! 所有可提供给结构化调用服务的操作 schema（name / description / parameters），
//! 从 config/tools.toml 的 [[operations]] 加载；按名查找时保持目录声明顺序。

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::PipelineError;

/// 单个操作的 schema（parameters 为 JSON Schema 对象）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_parameters")]
    pub parameters: Value,
}

fn empty_parameters() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

impl OperationSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// 无参数操作（如路由选择器）
    pub fn without_parameters(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, empty_parameters())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogToml {
    #[serde(default)]
    operations: Vec<OperationSchema>,
}

/// 操作目录（全量候选集）
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    operations: Vec<OperationSchema>,
}

impl ToolCatalog {
    pub fn new(operations: Vec<OperationSchema>) -> Self {
        Self { operations }
    }

    /// 解析 TOML 文本
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        let parsed: CatalogToml =
            toml::from_str(text).map_err(|e| PipelineError::Config(format!("tools catalog: {e}")))?;
        Ok(Self::new(parsed.operations))
    }

    /// 从文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("read {}: {e}", path.display())))?;
        let catalog = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), operations = catalog.len(), "tool catalog loaded");
        Ok(catalog)
    }

    /// 按名过滤（保持目录顺序，忽略未知名）
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Vec<OperationSchema> {
        self.operations
            .iter()
            .filter(|op| names.iter().any(|n| n.as_ref() == op.name))
            .cloned()
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.operations.iter().map(|op| op.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
