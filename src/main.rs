//! Merlin - 自然语言表格指令编排引擎
//!
//! 入口：初始化日志、加载配置与操作目录、登记演示表格，从 stdin 逐行读取指令，
//! 事件以 JSON 行输出到 stdout。
//! 设置了 OPENAI_API_KEY / DEEPSEEK_API_KEY / MOONSHOT_API_KEY 时使用 OpenAI 兼容服务，否则使用 Mock。
//!
//! 内置命令：`:stats` 会话与 Token 统计，`:columns` 当前列名，`:reload` 重新加载配置，`:quit` 退出。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use merlin::config::{PipelineSettings, SettingsHandle};
use merlin::engine::{MemoryTable, TabularEngine};
use merlin::llm::{
    MockStructuredClient, OpenAiCompatClient, RateLimiter, StructuredCallClient, ThrottledClient, TokenUsage,
};
use merlin::memory::SessionMemory;
use merlin::{observability, DocumentRegistry, Orchestrator};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

fn demo_table(snapshot_dir: PathBuf) -> MemoryTable {
    MemoryTable::new(
        vec!["名称".into(), "单价".into(), "数量".into(), "税率".into()],
        vec![
            vec![json!("苹果"), json!(5.5), json!(10), json!(null)],
            vec![json!("香蕉"), json!(3.2), json!(24), json!(null)],
            vec![json!("橙子"), json!(4.8), json!(15), json!(null)],
        ],
        snapshot_dir,
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let settings = PipelineSettings::load(config_path.clone()).context("Failed to load settings")?;
    let config = settings.config.clone();
    let handle = SettingsHandle::new(settings);

    let mut usage: Option<TokenUsage> = None;
    let mut model = "mock".to_string();
    let client: Arc<dyn StructuredCallClient> = match OpenAiCompatClient::from_config(&config.llm) {
        Some(client) => {
            usage = Some(client.usage.clone());
            model = client.model().to_string();
            let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
            Arc::new(ThrottledClient::new(Arc::new(client), limiter))
        }
        None => {
            tracing::warn!("no API key found, using mock client");
            Arc::new(MockStructuredClient::new())
        }
    };

    let memory = Arc::new(SessionMemory::new(
        config.session.max_concurrent_sessions,
        config.session.max_history_rounds,
    ));
    let orchestrator = Arc::new(Orchestrator::new(client, handle.clone(), memory.clone()));
    let registry = Arc::new(DocumentRegistry::new(orchestrator));

    let table = Arc::new(demo_table(config.engine.snapshot_dir.clone()));
    let document_id = registry.ingest(table.clone());
    println!(
        "{}",
        json!({ "document_id": document_id, "model": model, "columns": table.list_columns() })
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let command = line.trim();
        match command {
            "" => continue,
            ":quit" => break,
            ":stats" => {
                let tokens = usage.as_ref().map(|u| {
                    let (prompt, completion, total) = u.get();
                    json!({ "prompt": prompt, "completion": completion, "total": total })
                });
                println!("{}", json!({ "session": memory.stats(), "tokens": tokens }));
                continue;
            }
            ":columns" => {
                println!("{}", json!({ "columns": table.list_columns() }));
                continue;
            }
            ":reload" => {
                match handle.reload(config_path.clone()) {
                    Ok(()) => println!("{}", json!({ "reloaded": true })),
                    Err(e) => println!("{}", json!({ "reloaded": false, "error": e.to_string() })),
                }
                continue;
            }
            _ => {}
        }

        let (mut rx, run) = registry.spawn_run(document_id.clone(), command);
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            let mut value = serde_json::to_value(&event)?;
            value["ts"] = json!(chrono::Local::now().to_rfc3339());
            println!("{value}");
            if terminal {
                break;
            }
        }
        match run.await.context("Run task panicked")? {
            Ok(report) => println!("{}", json!({ "report": report })),
            Err(e) => println!(
                "{}",
                json!({ "error": e.to_string(), "report": e.partial_report() })
            ),
        }
    }

    registry.destroy(&document_id);
    Ok(())
}
