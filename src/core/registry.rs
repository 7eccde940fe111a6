//! 文档注册表：文档生命周期与同文档串行执行
//!
//! 每个文档持有一把 tokio Mutex，同一文档的运行按到达顺序串行；不同文档的运行可以并发。
//! destroy 时同时清除该文档的会话记忆。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::PipelineError;
use crate::engine::TabularEngine;
use crate::pipeline::{ExecutionEvent, Orchestrator, RunReport};

#[derive(Clone)]
struct DocumentEntry {
    engine: Arc<dyn TabularEngine>,
    run_lock: Arc<Mutex<()>>,
}

pub struct DocumentRegistry {
    orchestrator: Arc<Orchestrator>,
    documents: RwLock<HashMap<String, DocumentEntry>>,
}

impl DocumentRegistry {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            documents: RwLock::new(HashMap::new()),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// 登记一个文档，返回新的文档 ID
    pub fn ingest(&self, engine: Arc<dyn TabularEngine>) -> String {
        let id = Uuid::new_v4().simple().to_string();
        self.documents
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(
                id.clone(),
                DocumentEntry {
                    engine,
                    run_lock: Arc::new(Mutex::new(())),
                },
            );
        tracing::info!(document_id = %id, "document ingested");
        id
    }

    pub fn get(&self, document_id: &str) -> Option<Arc<dyn TabularEngine>> {
        self.entry(document_id).map(|e| e.engine)
    }

    fn entry(&self, document_id: &str) -> Option<DocumentEntry> {
        self.documents
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(document_id)
            .cloned()
    }

    /// 移除文档并清除其会话记忆；文档不存在时返回 false
    pub fn destroy(&self, document_id: &str) -> bool {
        let removed = self
            .documents
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(document_id)
            .is_some();
        self.orchestrator.memory().clear(document_id);
        if removed {
            tracing::info!(document_id, "document destroyed");
        }
        removed
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .documents
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// 在文档锁内执行一条指令
    pub async fn run(
        &self,
        document_id: &str,
        command: &str,
        events: Option<&UnboundedSender<ExecutionEvent>>,
    ) -> Result<RunReport, PipelineError> {
        let entry = self
            .entry(document_id)
            .ok_or_else(|| PipelineError::UnknownDocument(document_id.to_string()))?;
        let _guard = entry.run_lock.lock().await;
        self.orchestrator
            .run(document_id, command, entry.engine.as_ref(), events)
            .await
    }

    /// 后台执行，返回事件接收端与任务句柄
    pub fn spawn_run(
        self: &Arc<Self>,
        document_id: impl Into<String>,
        command: impl Into<String>,
    ) -> (
        UnboundedReceiver<ExecutionEvent>,
        JoinHandle<Result<RunReport, PipelineError>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::clone(self);
        let document_id = document_id.into();
        let command = command.into();
        let handle = tokio::spawn(async move { registry.run(&document_id, &command, Some(&tx)).await });
        (rx, handle)
    }
}
