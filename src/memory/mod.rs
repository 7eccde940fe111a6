//! 记忆层：对话消息与轮次、文档级会话记忆（LRU + 轮数上限）

pub mod conversation;
pub mod session;

pub use conversation::{rounds_to_messages, Message, Role, Round};
pub use session::{SessionMemory, SessionStats};
