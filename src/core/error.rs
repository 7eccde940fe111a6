//! 运行级错误类型
//!
//! PipelineError 只用于「整次运行无法继续」的情况（文档不存在、限流重试耗尽、配置错误）；
//! 子任务翻译失败 / 执行失败属于正常的运行结果，记录在 RunReport 中而不是作为 Err 返回。

use thiserror::Error;

use crate::llm::LlmError;
use crate::pipeline::RunReport;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unknown document: {0}")]
    UnknownDocument(String),

    /// 结构化调用服务限流，且编排器的退避重试已耗尽
    ///
    /// partial 为中断前的运行结果（已完成的子任务数、检查点与已保存的产物）
    #[error("Rate limited by structured-call service (retry after {retry_after_ms:?} ms)")]
    RateLimited {
        retry_after_ms: Option<u64>,
        partial: Option<Box<RunReport>>,
    },

    #[error("LLM error: {0}")]
    Llm(LlmError),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<LlmError> for PipelineError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::RateLimited { retry_after_ms } => PipelineError::RateLimited {
                retry_after_ms,
                partial: None,
            },
            other => PipelineError::Llm(other),
        }
    }
}

impl PipelineError {
    /// 中断前已完成部分的运行结果
    pub fn partial_report(&self) -> Option<&RunReport> {
        match self {
            PipelineError::RateLimited { partial, .. } => partial.as_deref(),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}
