//! Merlin - 自然语言表格指令编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）与热更新句柄
//! - **core**: 运行级错误、文档注册表（同文档串行）
//! - **engine**: 表格执行引擎边界与内存实现
//! - **llm**: 结构化调用客户端（OpenAI 兼容 / Mock）、令牌桶限流、退避重试
//! - **memory**: 对话轮次与文档级会话记忆（LRU）
//! - **observability**: tracing 日志初始化
//! - **pipeline**: 分类、拆分、路由、翻译、编排执行与进度事件
//! - **tools**: 操作目录与保留操作 schema

pub mod config;
pub mod core;
pub mod engine;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod tools;

pub use crate::core::{DocumentRegistry, PipelineError};
pub use config::{AppConfig, PipelineSettings, SettingsHandle};
pub use pipeline::{EventKind, ExecutionEvent, Orchestrator, RunReport, RunStatus};
