//! 指令处理管线：分类、拆分、路由、翻译、解释、编排执行

pub mod classifier;
pub mod decomposer;
pub mod events;
pub mod interpreter;
pub mod orchestrator;
pub mod response;
pub mod router;
pub mod translator;

pub use classifier::{Classification, CommandClassifier};
pub use decomposer::TaskDecomposer;
pub use events::{EventKind, ExecutionEvent};
pub use interpreter::{help_shortcut, interpret};
pub use orchestrator::{Checkpoint, Orchestrator, RunReport, RunStatus};
pub use response::{ErrorCode, ToolCall, TranslationResponse};
pub use router::{RoutePath, RoutingDecision, ToolRouter};
pub use translator::{render_system_prompt, Translation, Translator};
