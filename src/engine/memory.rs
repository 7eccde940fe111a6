//! 内存表引擎（演示与测试用）
//!
//! 支持 set_column_value / add_column / delete_column / get_summary（分析类）；
//! 快照以 JSON 写入 snapshot_dir，每次调用输出结构化审计日志。

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{EngineError, OperationOutcome, Parameters, StateHandle, TabularEngine};

/// 表数据（列名 + 行，行内值与列一一对应）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TableData {
    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// 读取某列全部值
    pub fn column_values(&self, column: &str) -> Option<Vec<Value>> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().map(|r| r.get(idx).cloned().unwrap_or(Value::Null)).collect())
    }
}

pub struct MemoryTable {
    table: Mutex<TableData>,
    snapshot_dir: PathBuf,
}

impl MemoryTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            table: Mutex::new(TableData { columns, rows }),
            snapshot_dir: snapshot_dir.into(),
        }
    }

    /// 当前表数据副本
    pub fn data(&self) -> TableData {
        self.lock().clone()
    }

    /// 读取快照内容
    pub async fn load_snapshot(handle: &StateHandle) -> Result<TableData, EngineError> {
        let text = tokio::fs::read_to_string(handle.as_str())
            .await
            .map_err(|e| EngineError::Io(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| EngineError::Snapshot(e.to_string()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TableData> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot_path(&self, location_hint: &str) -> PathBuf {
        self.snapshot_dir.join(format!("{location_hint}.json"))
    }

    fn apply(&self, name: &str, parameters: &Parameters) -> OperationOutcome {
        let mut table = self.lock();
        match name {
            "set_column_value" => {
                let column = match str_param(parameters, "column") {
                    Ok(c) => c,
                    Err(outcome) => return outcome,
                };
                let value = parameters.get("value").cloned().unwrap_or(Value::Null);
                let Some(idx) = table.column_index(column) else {
                    return unknown_column(&table, column);
                };
                let count = table.rows.len();
                for row in table.rows.iter_mut() {
                    if row.len() <= idx {
                        row.resize(idx + 1, Value::Null);
                    }
                    row[idx] = value.clone();
                }
                OperationOutcome::ok(format!("已将 {count} 行的「{column}」设置为 {}", display(&value)))
            }
            "add_column" => {
                let column = match str_param(parameters, "column") {
                    Ok(c) => c.to_string(),
                    Err(outcome) => return outcome,
                };
                if table.column_index(&column).is_some() {
                    return OperationOutcome::failed(format!("列「{column}」已存在"));
                }
                let default = parameters.get("default_value").cloned().unwrap_or(Value::Null);
                table.columns.push(column.clone());
                for row in table.rows.iter_mut() {
                    row.push(default.clone());
                }
                OperationOutcome::ok(format!("已新增列「{column}」"))
            }
            "delete_column" => {
                let column = match str_param(parameters, "column") {
                    Ok(c) => c,
                    Err(outcome) => return outcome,
                };
                let Some(idx) = table.column_index(column) else {
                    return unknown_column(&table, column);
                };
                table.columns.remove(idx);
                for row in table.rows.iter_mut() {
                    if idx < row.len() {
                        row.remove(idx);
                    }
                }
                OperationOutcome::ok(format!("已删除列「{column}」"))
            }
            "get_summary" => {
                let column = match str_param(parameters, "column") {
                    Ok(c) => c,
                    Err(outcome) => return outcome,
                };
                let Some(values) = table.column_values(column) else {
                    return unknown_column(&table, column);
                };
                let numbers: Vec<f64> = values.iter().filter_map(as_number).collect();
                let non_empty = values.iter().filter(|v| !v.is_null()).count();
                let message = if numbers.is_empty() {
                    format!("「{column}」共 {non_empty} 个非空值")
                } else {
                    let sum: f64 = numbers.iter().sum();
                    format!(
                        "「{column}」共 {non_empty} 个非空值，合计 {sum}，平均 {:.2}",
                        sum / numbers.len() as f64
                    )
                };
                OperationOutcome::analysis(message)
            }
            other => OperationOutcome::failed(format!("未知工具: {other}")),
        }
    }
}

#[async_trait]
impl TabularEngine for MemoryTable {
    async fn execute_operation(&self, name: &str, parameters: &Parameters) -> OperationOutcome {
        let start = Instant::now();
        let outcome = self.apply(name, parameters);
        let audit = serde_json::json!({
            "event": "operation_audit",
            "operation": name,
            "ok": outcome.success,
            "analysis_only": outcome.analysis_only,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(parameters),
        });
        tracing::info!(audit = %audit.to_string(), "operation");
        outcome
    }

    async fn save_state(&self, location_hint: &str) -> Result<StateHandle, EngineError> {
        let data = self.data();
        let text = serde_json::to_string_pretty(&data).map_err(|e| EngineError::Snapshot(e.to_string()))?;
        tokio::fs::create_dir_all(&self.snapshot_dir)
            .await
            .map_err(|e| EngineError::Io(e.to_string()))?;
        let path = self.snapshot_path(location_hint);
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| EngineError::Io(e.to_string()))?;
        tracing::debug!(path = %path.display(), "snapshot saved");
        Ok(StateHandle(path.to_string_lossy().into_owned()))
    }

    async fn promote_state(
        &self,
        snapshot: &StateHandle,
        location_hint: &str,
    ) -> Result<StateHandle, EngineError> {
        let target = self.snapshot_path(location_hint);
        tokio::fs::copy(snapshot.as_str(), &target)
            .await
            .map_err(|e| EngineError::Io(e.to_string()))?;
        tracing::info!(from = %snapshot, to = %target.display(), "snapshot promoted");
        Ok(StateHandle(target.to_string_lossy().into_owned()))
    }

    fn list_columns(&self) -> Vec<String> {
        self.lock().columns.clone()
    }
}

fn str_param<'a>(parameters: &'a Parameters, key: &str) -> Result<&'a str, OperationOutcome> {
    parameters
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| OperationOutcome::failed(EngineError::InvalidParameter(format!("缺少参数 {key}")).to_string()))
}

fn unknown_column(table: &TableData, column: &str) -> OperationOutcome {
    OperationOutcome::failed(EngineError::UnknownColumn(column.to_string()).to_string())
        .with_suggestion(format!("可用列：{}", table.columns.join("、")))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn args_preview(parameters: &Parameters) -> String {
    let s = serde_json::to_string(parameters).unwrap_or_default();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
