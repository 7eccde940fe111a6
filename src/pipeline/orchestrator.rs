//! 执行编排：分类 → （拆分）→ 逐个子任务「翻译后立即执行」→ 保存
//!
//! 状态机：START → CLASSIFYING → ROUTE_DECISION → {直接翻译 | 带上下文翻译 | 拆分}
//! → TRANSLATE(i) → EXECUTE(i) → {TRANSLATE(i+1) | SAVE → DONE} | FAILED。
//!
//! - 每个子任务成功后保存中间快照 `{doc}_temp_{i}` 作为检查点；结束时把最后一个检查点提升为 `{doc}_result`
//! - 子任务失败时停止，之前的检查点保留（部分成功）
//! - 分析类操作立即以成功结束；澄清立即挂起，等待用户下一次输入
//! - 限流由本模块按 RetryPolicy 退避重试；耗尽后先保存已有检查点，再发送 error 事件，
//!   返回携带部分结果的 PipelineError::RateLimited

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::{PipelineSettings, SettingsHandle};
use crate::core::PipelineError;
use crate::engine::{StateHandle, TabularEngine};
use crate::llm::{LlmError, RetryPolicy, StructuredCallClient};
use crate::memory::{Round, SessionMemory};
use crate::pipeline::events::send_event;
use crate::pipeline::{
    CommandClassifier, ErrorCode, EventKind, ExecutionEvent, TaskDecomposer, TranslationResponse,
    Translator,
};

/// 检查点：最近一个成功子任务的序号（从 1 开始）与其快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub subtask_index: usize,
    pub state_handle: StateHandle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Failed,
    ClarificationPending { question: String, options: Vec<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub completed_tasks: usize,
    pub total_tasks: usize,
    /// 最后一个检查点的子任务序号，0 表示没有
    pub checkpoint: usize,
    pub artifact: Option<StateHandle>,
    pub execution_log: Vec<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// 单次运行的可变状态
struct RunState<'a> {
    document_id: &'a str,
    command: &'a str,
    events: Option<&'a UnboundedSender<ExecutionEvent>>,
    engine: &'a dyn TabularEngine,
    checkpoint: Option<Checkpoint>,
    completed: usize,
    summaries: Vec<String>,
    execution_log: Vec<String>,
}

impl RunState<'_> {
    fn emit(&self, ev: ExecutionEvent) {
        send_event(self.events, ev);
    }

    fn checkpoint_index(&self) -> usize {
        self.checkpoint.as_ref().map_or(0, |c| c.subtask_index)
    }
}

pub struct Orchestrator {
    client: Arc<dyn StructuredCallClient>,
    settings: SettingsHandle,
    memory: Arc<SessionMemory>,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn StructuredCallClient>,
        settings: SettingsHandle,
        memory: Arc<SessionMemory>,
    ) -> Self {
        Self {
            client,
            settings,
            memory,
        }
    }

    pub fn memory(&self) -> &Arc<SessionMemory> {
        &self.memory
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// 执行一条用户指令；子任务失败不是 Err，只有限流耗尽等无法继续的情况才返回 Err
    pub async fn run(
        &self,
        document_id: &str,
        command: &str,
        engine: &dyn TabularEngine,
        events: Option<&UnboundedSender<ExecutionEvent>>,
    ) -> Result<RunReport, PipelineError> {
        let settings: Arc<PipelineSettings> = self.settings.current();
        let config = &settings.config;
        let retry = RetryPolicy::from_config(&config.rate_limit);
        let mut state = RunState {
            document_id,
            command,
            events,
            engine,
            checkpoint: None,
            completed: 0,
            summaries: Vec::new(),
            execution_log: Vec::new(),
        };
        tracing::info!(document_id, command, "run started");
        state.emit(ExecutionEvent::new(EventKind::Start, format!("开始处理指令：{command}")));

        self.memory
            .set_limits(config.session.max_concurrent_sessions, config.session.max_history_rounds);
        let history = self.memory.get(document_id);
        let classifier = CommandClassifier::new(config.classifier.clone());
        let classification = classifier.classify(command, &history);
        tracing::debug!(?classification, history_rounds = history.len(), "command classified");

        let mut decomposed = false;
        let mut tasks = vec![command.to_string()];
        let mut use_history = classification.is_context_dependent;

        if classification.is_compound {
            state.emit(ExecutionEvent::new(EventKind::Translating, "正在拆分指令"));
            let decomposer = TaskDecomposer::new(self.client.clone(), config.prompts.coordinator.clone());
            let decomposer = &decomposer;
            let history_ref = history.as_slice();
            match retry
                .run("decompose", move || decomposer.decompose(command, history_ref))
                .await
            {
                Ok(Some(subtasks)) => {
                    decomposed = true;
                    use_history = true;
                    tasks = subtasks;
                    state.emit(
                        ExecutionEvent::new(EventKind::TaskSplit, format!("已拆分为 {} 个子任务", tasks.len()))
                            .with_payload(json!({ "tasks": tasks })),
                    );
                }
                Ok(None) => {
                    // 不可拆分：按带上下文的单任务处理
                    use_history = true;
                }
                Err(e) => return self.fail_rate_limited(&mut state, e, tasks.len()).await,
            }
        }

        let total = tasks.len();
        let mut run_history: Vec<Round> = if use_history { history } else { Vec::new() };
        let translator = Translator::new(self.client.clone(), settings.clone());
        let mut failed = false;

        for (offset, task) in tasks.iter().enumerate() {
            let index = offset + 1;
            if decomposed {
                state.emit(
                    ExecutionEvent::new(EventKind::TranslatingSubtask, format!("正在理解第 {index} 个任务：{task}"))
                        .task(index, total),
                );
            } else {
                state.emit(ExecutionEvent::new(EventKind::Translating, "正在理解指令"));
            }

            let columns = engine.list_columns();
            let translation = {
                let translator = &translator;
                let history_ref = run_history.as_slice();
                let columns_ref = columns.as_slice();
                let task = task.as_str();
                retry
                    .run("translate", move || translator.translate(task, history_ref, columns_ref))
                    .await
            };
            let translation = match translation {
                Ok(t) => t,
                Err(e) => return self.fail_rate_limited(&mut state, e, total).await,
            };
            let routing = translation.routing.as_ref().map(|r| json!(r));

            let calls = match translation.response {
                TranslationResponse::ToolCalls { calls } => calls,
                TranslationResponse::Help { message } | TranslationResponse::FriendlyMessage { message } => {
                    state.emit(ExecutionEvent::new(EventKind::Hint, message.clone()).task(index, total));
                    state.execution_log.push(format!("任务{index}: {message}"));
                    state.completed += 1;
                    continue;
                }
                TranslationResponse::Clarification { question, options } => {
                    return Ok(self.suspend_for_clarification(&mut state, question, options, total).await);
                }
                TranslationResponse::Error { message, code } => {
                    state.emit(
                        ExecutionEvent::new(EventKind::SubtaskTranslateFailed, format!("第 {index} 个任务理解失败：{message}"))
                            .task(index, total)
                            .with_payload(json!({ "code": code })),
                    );
                    state.execution_log.push(format!("任务{index} 理解失败: {message}"));
                    failed = true;
                    break;
                }
                TranslationResponse::TaskList { .. } => {
                    state.emit(
                        ExecutionEvent::new(EventKind::SubtaskTranslateFailed, format!("第 {index} 个任务理解失败：意外的任务列表"))
                            .task(index, total)
                            .with_payload(json!({ "code": ErrorCode::UnexpectedResponse })),
                    );
                    state.execution_log.push(format!("任务{index} 理解失败: 意外的任务列表"));
                    failed = true;
                    break;
                }
            };

            let payload = json!({ "tool_calls": calls, "routing": routing });
            if decomposed {
                state.emit(
                    ExecutionEvent::new(EventKind::SubtaskTranslated, format!("第 {index} 个任务已理解"))
                        .task(index, total)
                        .with_payload(payload),
                );
            } else {
                state.emit(ExecutionEvent::new(EventKind::TranslationDone, "指令已理解").with_payload(payload));
            }

            state.emit(ExecutionEvent::new(EventKind::TaskStart, format!("执行第 {index} 个任务：{task}")).task(index, total));
            let mut messages = Vec::with_capacity(calls.len());
            let mut task_failed = false;
            for call in &calls {
                let outcome = engine.execute_operation(&call.operation_name, &call.parameters).await;
                if outcome.analysis_only {
                    return Ok(self.finish_with_analysis(&mut state, outcome.message, total).await);
                }
                if !outcome.success {
                    let text = outcome.failure_text();
                    state.emit(
                        ExecutionEvent::new(EventKind::TaskError, format!("第 {index} 个任务执行失败：{text}"))
                            .task(index, total)
                            .with_payload(json!({
                                "operation": call.operation_name,
                                "error": outcome.error,
                                "suggestion": outcome.suggestion,
                            })),
                    );
                    state.execution_log.push(format!("任务{index} 执行失败: {text}"));
                    task_failed = true;
                    break;
                }
                messages.push(outcome.message);
            }
            if task_failed {
                failed = true;
                break;
            }

            let summary = messages.join("；");
            match engine.save_state(&format!("{document_id}_temp_{index}")).await {
                Ok(handle) => {
                    state.checkpoint = Some(Checkpoint {
                        subtask_index: index,
                        state_handle: handle,
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, index, "saving intermediate snapshot failed");
                    state.emit(
                        ExecutionEvent::new(EventKind::TaskError, format!("第 {index} 个任务保存失败：{e}"))
                            .task(index, total),
                    );
                    state.execution_log.push(format!("任务{index} 保存失败: {e}"));
                    failed = true;
                    break;
                }
            }

            run_history.push(Round::new(task.as_str(), summary.as_str()));
            if decomposed {
                self.memory.append(document_id, task, &summary);
            }
            state.completed += 1;
            state.summaries.push(summary.clone());
            state.execution_log.push(format!("任务{index}: {summary}"));
            state.emit(
                ExecutionEvent::new(EventKind::TaskSuccess, format!("第 {index} 个任务完成：{summary}"))
                    .task(index, total),
            );
        }

        let artifact = self.finalize(&mut state).await;
        let cp = state.checkpoint_index();
        if failed && cp >= 1 {
            state.emit(ExecutionEvent::new(
                EventKind::Hint,
                format!("前 {cp} 个任务已成功执行并保存"),
            ));
        }

        let status = if !failed {
            RunStatus::Success
        } else if cp >= 1 {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Failed
        };
        let report = RunReport {
            status,
            completed_tasks: state.completed,
            total_tasks: total,
            checkpoint: cp,
            artifact,
            execution_log: state.execution_log.clone(),
        };
        self.emit_done(&state, &report);
        tracing::info!(
            document_id,
            status = ?report.status,
            completed = report.completed_tasks,
            total = report.total_tasks,
            "run finished"
        );
        Ok(report)
    }

    /// 把最后一个检查点提升为最终产物
    async fn promote(&self, state: &mut RunState<'_>) -> Option<StateHandle> {
        let checkpoint = state.checkpoint.clone()?;
        state.emit(ExecutionEvent::new(EventKind::Saving, "正在保存结果"));
        match state
            .engine
            .promote_state(&checkpoint.state_handle, &format!("{}_result", state.document_id))
            .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "promoting checkpoint failed");
                state.execution_log.push(format!("保存结果失败: {e}"));
                None
            }
        }
    }

    /// 有检查点时提升产物，并写入整条指令的汇总历史
    async fn finalize(&self, state: &mut RunState<'_>) -> Option<StateHandle> {
        if state.checkpoint.is_none() {
            return None;
        }
        let artifact = self.promote(state).await;
        self.memory
            .append(state.document_id, state.command, &state.summaries.join("\n"));
        artifact
    }

    /// 分析类操作：立即以成功结束，无检查点时也写入历史
    async fn finish_with_analysis(&self, state: &mut RunState<'_>, message: String, total: usize) -> RunReport {
        state.emit(ExecutionEvent::new(EventKind::AnalysisResult, message.clone()));
        let artifact = self.promote(state).await;
        state.completed += 1;
        state.execution_log.push(format!("分析: {message}"));
        state.summaries.push(message);
        self.memory
            .append(state.document_id, state.command, &state.summaries.join("\n"));

        let report = RunReport {
            status: RunStatus::Success,
            completed_tasks: state.completed,
            total_tasks: total,
            checkpoint: state.checkpoint_index(),
            artifact,
            execution_log: state.execution_log.clone(),
        };
        self.emit_done(state, &report);
        report
    }

    async fn suspend_for_clarification(
        &self,
        state: &mut RunState<'_>,
        question: String,
        options: Vec<String>,
        total: usize,
    ) -> RunReport {
        let artifact = self.finalize(state).await;
        state.emit(
            ExecutionEvent::new(EventKind::Clarify, question.clone())
                .with_payload(json!({ "question": question, "options": options })),
        );
        tracing::info!(document_id = state.document_id, "run suspended for clarification");
        RunReport {
            status: RunStatus::ClarificationPending { question, options },
            completed_tasks: state.completed,
            total_tasks: total,
            checkpoint: state.checkpoint_index(),
            artifact,
            execution_log: state.execution_log.clone(),
        }
    }

    /// 调用重试耗尽：保存已有检查点，最后发送带部分结果的 error 事件
    async fn fail_rate_limited(
        &self,
        state: &mut RunState<'_>,
        err: LlmError,
        total: usize,
    ) -> Result<RunReport, PipelineError> {
        tracing::warn!(error = %err, document_id = state.document_id, "run aborted by rate limit");
        state.execution_log.push(format!("调用中断: {err}"));
        let artifact = self.finalize(state).await;
        let cp = state.checkpoint_index();
        if cp >= 1 {
            state.emit(ExecutionEvent::new(
                EventKind::Hint,
                format!("前 {cp} 个任务已成功执行并保存"),
            ));
        }

        let report = RunReport {
            status: if cp >= 1 {
                RunStatus::PartialSuccess
            } else {
                RunStatus::Failed
            },
            completed_tasks: state.completed,
            total_tasks: total,
            checkpoint: cp,
            artifact,
            execution_log: state.execution_log.clone(),
        };
        state.emit(
            ExecutionEvent::new(EventKind::Error, "请求过于频繁，请稍后再试").with_payload(json!({
                "checkpoint": report.checkpoint,
                "completed_tasks": report.completed_tasks,
                "total_tasks": report.total_tasks,
                "artifact": report.artifact,
            })),
        );
        match err {
            LlmError::RateLimited { retry_after_ms } => Err(PipelineError::RateLimited {
                retry_after_ms,
                partial: Some(Box::new(report)),
            }),
            other => Err(PipelineError::Llm(other)),
        }
    }

    fn emit_done(&self, state: &RunState<'_>, report: &RunReport) {
        let success = report.status == RunStatus::Success;
        let partial = report.status == RunStatus::PartialSuccess;
        let message = if success {
            "全部任务执行完成".to_string()
        } else if partial {
            format!("部分完成：{}/{} 个任务成功", report.checkpoint, report.total_tasks)
        } else {
            "执行失败，未保存任何修改".to_string()
        };
        state.emit(
            ExecutionEvent::new(EventKind::Done, message).with_payload(json!({
                "success": success,
                "partial_success": partial,
                "checkpoint": report.checkpoint,
                "artifact": report.artifact,
                "execution_log": report.execution_log,
            })),
        );
    }
}
