//! 管线集成测试：Mock 结构化调用 + 内存表格，覆盖直接翻译、拆分执行、部分失败、模型路由、澄清、分析与限流

use std::sync::Arc;

use merlin::config::{AppConfig, PipelineSettings, SettingsHandle, ToolGroup};
use merlin::engine::{MemoryTable, TabularEngine};
use merlin::llm::{CallResponse, LlmError, MockStructuredClient, ToolChoice};
use merlin::memory::SessionMemory;
use merlin::pipeline::{EventKind, ExecutionEvent, Orchestrator, RunStatus};
use merlin::tools::{OperationSchema, ToolCatalog, CLARIFICATION_OPERATION, SPLIT_TASKS_OPERATION};
use merlin::{DocumentRegistry, PipelineError};
use serde_json::json;
use tokio::sync::mpsc;

const DOC: &str = "doc1";

fn settings() -> PipelineSettings {
    let mut config = AppConfig::default();
    config.routing.groups = vec![
        ToolGroup {
            name: "filling".into(),
            keywords: vec!["设为".into()],
            operations: vec!["set_column_value".into()],
        },
        ToolGroup {
            name: "analysis".into(),
            keywords: vec!["统计".into()],
            operations: vec!["get_summary".into()],
        },
    ];
    config.rate_limit.base_backoff_ms = 10;
    config.rate_limit.max_backoff_ms = 50;
    let catalog = ToolCatalog::new(vec![
        OperationSchema::without_parameters("set_column_value", "整列赋值"),
        OperationSchema::without_parameters("add_column", "新增列"),
        OperationSchema::without_parameters("get_summary", "统计"),
    ]);
    PipelineSettings::new(config, catalog)
}

fn table(dir: &std::path::Path) -> MemoryTable {
    MemoryTable::new(
        vec!["A".into(), "B".into(), "税率".into(), "单价".into()],
        vec![
            vec![json!(0), json!(0), json!(null), json!(10)],
            vec![json!(0), json!(0), json!(null), json!(20)],
        ],
        dir,
    )
}

fn set(column: &str, value: serde_json::Value) -> Result<CallResponse, LlmError> {
    Ok(CallResponse::tool_call(
        "set_column_value",
        json!({ "column": column, "value": value }).to_string(),
    ))
}

fn split(tasks: &[&str]) -> Result<CallResponse, LlmError> {
    Ok(CallResponse::tool_call(SPLIT_TASKS_OPERATION, json!({ "tasks": tasks }).to_string()))
}

struct Harness {
    mock: Arc<MockStructuredClient>,
    memory: Arc<SessionMemory>,
    orchestrator: Orchestrator,
}

fn harness(script: Vec<Result<CallResponse, LlmError>>) -> Harness {
    let mock = Arc::new(MockStructuredClient::with_script(script));
    let memory = Arc::new(SessionMemory::new(10, 3));
    let orchestrator = Orchestrator::new(mock.clone(), SettingsHandle::new(settings()), memory.clone());
    Harness {
        mock,
        memory,
        orchestrator,
    }
}

async fn run_collect(
    h: &Harness,
    engine: &MemoryTable,
    command: &str,
) -> (Result<merlin::RunReport, PipelineError>, Vec<ExecutionEvent>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = h.orchestrator.run(DOC, command, engine, Some(&tx)).await;
    drop(tx);
    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    (result, events)
}

fn kinds(events: &[ExecutionEvent]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind).collect()
}

#[tokio::test]
async fn test_direct_translation_single_task() {
    let dir = tempfile::tempdir().unwrap();
    let engine = table(dir.path());
    let h = harness(vec![set("税率", json!(0.13))]);

    let (result, events) = run_collect(&h, &engine, "把税率设为0.13").await;
    let report = result.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.checkpoint, 1);
    assert_eq!(
        kinds(&events),
        vec![
            EventKind::Start,
            EventKind::Translating,
            EventKind::TranslationDone,
            EventKind::TaskStart,
            EventKind::TaskSuccess,
            EventKind::Saving,
            EventKind::Done,
        ]
    );
    let done = events.last().unwrap().payload.clone().unwrap();
    assert_eq!(done["success"], true);
    assert_eq!(done["checkpoint"], 1);

    // 直接路径不携带历史；关键词命中不调用路由
    let requests = h.mock.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].history.is_empty());

    let saved = MemoryTable::load_snapshot(report.artifact.as_ref().unwrap()).await.unwrap();
    assert_eq!(saved.column_values("税率").unwrap(), vec![json!(0.13), json!(0.13)]);

    let history = h.memory.get(DOC);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].user, "把税率设为0.13");
}

#[tokio::test]
async fn test_decomposed_run_carries_history_between_subtasks() {
    let dir = tempfile::tempdir().unwrap();
    let engine = table(dir.path());
    let h = harness(vec![
        split(&["把A设为1", "把B设为2"]),
        set("A", json!(1)),
        set("B", json!(2)),
    ]);

    let (result, events) = run_collect(&h, &engine, "把A设为1然后把B设为2").await;
    let report = result.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.checkpoint, 2);
    assert_eq!(report.completed_tasks, 2);
    assert!(kinds(&events).contains(&EventKind::TaskSplit));

    let requests = h.mock.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[1].history.is_empty());
    // 第二个子任务能看到第一个子任务的执行摘要
    assert_eq!(requests[2].history.len(), 2);
    assert_eq!(requests[2].history[0].content, "把A设为1");

    let saved = MemoryTable::load_snapshot(report.artifact.as_ref().unwrap()).await.unwrap();
    assert_eq!(saved.column_values("A").unwrap(), vec![json!(1), json!(1)]);
    assert_eq!(saved.column_values("B").unwrap(), vec![json!(2), json!(2)]);

    let history = h.memory.get(DOC);
    assert_eq!(history.last().unwrap().user, "把A设为1然后把B设为2");
}

#[tokio::test]
async fn test_failed_subtask_keeps_previous_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let engine = table(dir.path());
    let h = harness(vec![
        split(&["把A设为1", "把C设为2"]),
        set("A", json!(1)),
        set("C", json!(2)),
    ]);

    let (result, events) = run_collect(&h, &engine, "把A设为1然后把C设为2").await;
    let report = result.unwrap();

    assert_eq!(report.status, RunStatus::PartialSuccess);
    assert_eq!(report.checkpoint, 1);

    let error = events.iter().find(|e| e.kind == EventKind::TaskError).unwrap();
    assert_eq!(error.task_index, Some(2));
    let suggestion = error.payload.as_ref().unwrap()["suggestion"].as_str().unwrap().to_string();
    assert!(suggestion.contains("B"));

    let tail: Vec<_> = kinds(&events).into_iter().rev().take(3).collect();
    assert_eq!(tail, vec![EventKind::Done, EventKind::Hint, EventKind::Saving]);
    let done = events.last().unwrap().payload.clone().unwrap();
    assert_eq!(done["success"], false);
    assert_eq!(done["partial_success"], true);

    // 最终产物只包含第一个子任务的修改
    let saved = MemoryTable::load_snapshot(report.artifact.as_ref().unwrap()).await.unwrap();
    assert_eq!(saved.column_values("A").unwrap(), vec![json!(1), json!(1)]);
    assert_eq!(saved.column_values("B").unwrap(), vec![json!(0), json!(0)]);
}

#[tokio::test]
async fn test_total_failure_has_no_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let engine = table(dir.path());
    let h = harness(vec![set("不存在", json!(1))]);

    let (result, events) = run_collect(&h, &engine, "把不存在设为1").await;
    let report = result.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.artifact.is_none());
    assert!(!kinds(&events).contains(&EventKind::Saving));
    assert!(h.memory.get(DOC).is_empty());
}

#[tokio::test]
async fn test_single_subtask_decomposition_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let engine = table(dir.path());
    let h = harness(vec![split(&["把A设为1"]), set("A", json!(1))]);

    let command = "把A设为1然后就这样吧";
    let (result, events) = run_collect(&h, &engine, command).await;
    let report = result.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.total_tasks, 1);
    assert!(!kinds(&events).contains(&EventKind::TaskSplit));
    // 回退后翻译的是原始指令
    let requests = h.mock.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].user, command);
}

#[tokio::test]
async fn test_clarification_suspends_run() {
    let dir = tempfile::tempdir().unwrap();
    let engine = table(dir.path());
    let h = harness(vec![Ok(CallResponse::tool_call(
        CLARIFICATION_OPERATION,
        json!({ "question_to_user": "要修改哪一列？", "ambiguous_options": ["A", "B"] }).to_string(),
    ))]);

    let (result, events) = run_collect(&h, &engine, "把那个设为1").await;
    let report = result.unwrap();

    assert_eq!(
        report.status,
        RunStatus::ClarificationPending {
            question: "要修改哪一列？".into(),
            options: vec!["A".into(), "B".into()],
        }
    );
    assert_eq!(events.last().unwrap().kind, EventKind::Clarify);
    assert!(!kinds(&events).contains(&EventKind::Done));
}

#[tokio::test]
async fn test_analysis_ends_run_as_success() {
    let dir = tempfile::tempdir().unwrap();
    let engine = table(dir.path());
    let h = harness(vec![Ok(CallResponse::tool_call(
        "get_summary",
        json!({ "column": "单价" }).to_string(),
    ))]);

    let (result, events) = run_collect(&h, &engine, "统计一下单价这一列").await;
    let report = result.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.checkpoint, 0);
    assert!(report.artifact.is_none());
    assert!(kinds(&events).contains(&EventKind::AnalysisResult));
    assert_eq!(events.last().unwrap().kind, EventKind::Done);
    assert_eq!(h.memory.get(DOC).len(), 1);
}

#[tokio::test]
async fn test_help_makes_no_calls() {
    let dir = tempfile::tempdir().unwrap();
    let engine = table(dir.path());
    let h = harness(vec![]);

    let (result, events) = run_collect(&h, &engine, "帮助").await;
    assert!(result.unwrap().is_success());
    assert!(kinds(&events).contains(&EventKind::Hint));
    assert_eq!(h.mock.call_count(), 0);
}

#[tokio::test]
async fn test_contextual_command_sends_history() {
    let dir = tempfile::tempdir().unwrap();
    let engine = table(dir.path());
    let h = harness(vec![set("A", json!(1)), set("B", json!(1))]);

    run_collect(&h, &engine, "把A设为1").await.0.unwrap();
    run_collect(&h, &engine, "B列也设为1").await.0.unwrap();

    let requests = h.mock.requests();
    assert!(requests[0].history.is_empty());
    assert_eq!(requests[1].history.len(), 2);
}

#[tokio::test]
async fn test_rate_limit_retried_then_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let engine = table(dir.path());
    let h = harness(vec![
        Err(LlmError::RateLimited { retry_after_ms: Some(5) }),
        set("A", json!(1)),
    ]);

    let (result, _) = run_collect(&h, &engine, "把A设为1").await;
    assert!(result.unwrap().is_success());
    assert_eq!(h.mock.call_count(), 2);
}

#[tokio::test]
async fn test_rate_limit_exhausted_surfaces_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = table(dir.path());
    let limited = || Err(LlmError::RateLimited { retry_after_ms: Some(5) });
    let h = harness(vec![limited(), limited(), limited()]);

    let (result, events) = run_collect(&h, &engine, "把A设为1").await;
    let err = result.unwrap_err();
    assert!(matches!(err, PipelineError::RateLimited { .. }));
    let partial = err.partial_report().unwrap();
    assert_eq!(partial.status, RunStatus::Failed);
    assert_eq!(partial.checkpoint, 0);
    assert!(partial.artifact.is_none());
    assert_eq!(events.last().unwrap().kind, EventKind::Error);
    assert!(!kinds(&events).contains(&EventKind::Saving));
    assert_eq!(h.mock.call_count(), 3);
}

#[tokio::test]
async fn test_rate_limit_after_checkpoint_keeps_saved_result() {
    let dir = tempfile::tempdir().unwrap();
    let engine = table(dir.path());
    let limited = || Err(LlmError::RateLimited { retry_after_ms: Some(1) });
    let h = harness(vec![
        split(&["把A设为1", "把B设为2"]),
        set("A", json!(1)),
        limited(),
        limited(),
        limited(),
    ]);

    let command = "把A设为1然后把B设为2";
    let (result, events) = run_collect(&h, &engine, command).await;
    assert_eq!(
        kinds(&events),
        vec![
            EventKind::Start,
            EventKind::Translating,
            EventKind::TaskSplit,
            EventKind::TranslatingSubtask,
            EventKind::SubtaskTranslated,
            EventKind::TaskStart,
            EventKind::TaskSuccess,
            EventKind::TranslatingSubtask,
            EventKind::Saving,
            EventKind::Hint,
            EventKind::Error,
        ]
    );

    let err = result.unwrap_err();
    assert!(matches!(err, PipelineError::RateLimited { retry_after_ms: Some(1), .. }));
    let partial = err.partial_report().unwrap();
    assert_eq!(partial.status, RunStatus::PartialSuccess);
    assert_eq!(partial.checkpoint, 1);
    assert_eq!(partial.completed_tasks, 1);
    assert_eq!(partial.total_tasks, 2);

    let payload = events.last().unwrap().payload.clone().unwrap();
    assert_eq!(payload["checkpoint"], 1);
    assert_eq!(payload["completed_tasks"], 1);
    assert_eq!(payload["total_tasks"], 2);
    assert!(!payload["artifact"].is_null());

    let saved = MemoryTable::load_snapshot(partial.artifact.as_ref().unwrap()).await.unwrap();
    assert_eq!(saved.column_values("A").unwrap(), vec![json!(1), json!(1)]);
    assert_eq!(saved.column_values("B").unwrap(), vec![json!(0), json!(0)]);
    assert_eq!(h.memory.get(DOC).last().unwrap().user, command);
}

#[tokio::test]
async fn test_subtask_translation_failure_stops_remaining_subtasks() {
    let dir = tempfile::tempdir().unwrap();
    let engine = table(dir.path());
    let h = harness(vec![
        split(&["把A设为1", "把B设为2", "把税率设为0.1"]),
        set("A", json!(1)),
        Ok(CallResponse::tool_call("set_column_value", "{not json")),
    ]);

    let (result, events) = run_collect(&h, &engine, "把A设为1然后把B设为2然后把税率设为0.1").await;
    let report = result.unwrap();

    assert_eq!(report.status, RunStatus::PartialSuccess);
    assert_eq!(report.checkpoint, 1);
    assert_eq!(report.total_tasks, 3);
    // 第三个子任务从未被翻译
    assert_eq!(h.mock.call_count(), 3);
    assert!(!events
        .iter()
        .any(|e| e.kind == EventKind::TranslatingSubtask && e.task_index == Some(3)));

    let failed = events
        .iter()
        .find(|e| e.kind == EventKind::SubtaskTranslateFailed)
        .unwrap();
    assert_eq!(failed.task_index, Some(2));
    assert_eq!(failed.payload.as_ref().unwrap()["code"], "parse_failed");
    assert_eq!(events.last().unwrap().kind, EventKind::Done);

    let saved = MemoryTable::load_snapshot(report.artifact.as_ref().unwrap()).await.unwrap();
    assert_eq!(saved.column_values("B").unwrap(), vec![json!(0), json!(0)]);
}

#[tokio::test]
async fn test_model_routed_translation() {
    let dir = tempfile::tempdir().unwrap();
    let engine = table(dir.path());
    let h = harness(vec![
        Ok(CallResponse::tool_call("route_to_filling", "{}")),
        set("A", json!(1)),
    ]);

    let (result, events) = run_collect(&h, &engine, "把A列的内容全部替换成1").await;
    assert!(result.unwrap().is_success());

    let requests = h.mock.requests();
    assert_eq!(requests.len(), 2);
    // 先选择工具组，再携带该组操作翻译
    assert_eq!(requests[0].choice, ToolChoice::Required);
    let selectors: Vec<_> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(selectors, vec!["route_to_filling", "route_to_analysis"]);

    assert_eq!(requests[1].choice, ToolChoice::Auto);
    let candidates: Vec<_> = requests[1].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(candidates, vec!["set_column_value", CLARIFICATION_OPERATION]);

    let translated = events.iter().find(|e| e.kind == EventKind::TranslationDone).unwrap();
    let routing = &translated.payload.as_ref().unwrap()["routing"];
    assert_eq!(routing["path"], "ai_routed");
    assert_eq!(routing["group"], "filling");
}

#[tokio::test]
async fn test_clarification_after_checkpoint_promotes_result() {
    let dir = tempfile::tempdir().unwrap();
    let engine = table(dir.path());
    let h = harness(vec![
        split(&["把A设为1", "把那个设为2"]),
        set("A", json!(1)),
        Ok(CallResponse::tool_call(
            CLARIFICATION_OPERATION,
            json!({ "question_to_user": "要修改哪一列？", "ambiguous_options": ["B", "税率"] }).to_string(),
        )),
    ]);

    let command = "把A设为1然后把那个设为2";
    let (result, events) = run_collect(&h, &engine, command).await;
    let report = result.unwrap();

    assert!(matches!(report.status, RunStatus::ClarificationPending { .. }));
    assert_eq!(report.checkpoint, 1);
    assert_eq!(report.completed_tasks, 1);
    let tail: Vec<_> = kinds(&events).into_iter().rev().take(2).collect();
    assert_eq!(tail, vec![EventKind::Clarify, EventKind::Saving]);
    assert!(!kinds(&events).contains(&EventKind::Done));

    let saved = MemoryTable::load_snapshot(report.artifact.as_ref().unwrap()).await.unwrap();
    assert_eq!(saved.column_values("A").unwrap(), vec![json!(1), json!(1)]);
    assert_eq!(h.memory.get(DOC).last().unwrap().user, command);
}

#[tokio::test]
async fn test_same_document_runs_are_serialized() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockStructuredClient::with_script(vec![set("A", json!(1)), set("B", json!(2))]));
    let memory = Arc::new(SessionMemory::new(10, 3));
    let orchestrator = Orchestrator::new(mock, SettingsHandle::new(settings()), memory.clone());
    let registry = Arc::new(DocumentRegistry::new(Arc::new(orchestrator)));
    let engine = Arc::new(table(dir.path()));
    let id = registry.ingest(engine.clone());

    let (_rx1, first) = registry.spawn_run(id.clone(), "把A设为1");
    let (_rx2, second) = registry.spawn_run(id.clone(), "把B设为2");
    assert!(first.await.unwrap().unwrap().is_success());
    assert!(second.await.unwrap().unwrap().is_success());

    let data = engine.data();
    assert_eq!(data.column_values("A").unwrap(), vec![json!(1), json!(1)]);
    assert_eq!(data.column_values("B").unwrap(), vec![json!(2), json!(2)]);
    let users: Vec<_> = memory.get(&id).into_iter().map(|r| r.user).collect();
    assert_eq!(users, vec!["把A设为1", "把B设为2"]);
    assert_eq!(engine.list_columns().len(), 4);
}
