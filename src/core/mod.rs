//! 核心层：运行级错误与文档注册表

pub mod error;
pub mod registry;

pub use error::PipelineError;
pub use registry::DocumentRegistry;
