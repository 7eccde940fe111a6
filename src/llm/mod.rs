//! LLM 层：结构化调用抽象与实现（OpenAI 兼容 / Mock / 限流包装 / 重试策略）

pub mod mock;
pub mod openai;
pub mod rate_limit;
pub mod retry;
pub mod traits;

pub use mock::MockStructuredClient;
pub use openai::{default_model_for, OpenAiCompatClient, TokenUsage};
pub use rate_limit::{RateLimiter, ThrottledClient};
pub use retry::RetryPolicy;
pub use traits::{CallRequest, CallResponse, LlmError, RawToolCall, StructuredCallClient, ToolChoice};
