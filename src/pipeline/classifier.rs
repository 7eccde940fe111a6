//! 指令分类器：判断是否为复合指令、是否依赖上下文
//!
//! 纯函数，不访问外部服务；标记词表来自 [classifier] 配置。

use std::sync::OnceLock;

use regex::Regex;

use crate::config::ClassifierSection;
use crate::memory::Round;

static QUOTED_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 引号包裹的片段（直引号、弯引号、中文书名号式引号）
fn has_quoted_substring(text: &str) -> bool {
    QUOTED_RE
        .get_or_init(|| Regex::new(r#""[^"]+"|'[^']+'|“[^”]+”|‘[^’]+’|「[^」]+」"#).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(text))
}

fn contains_any(haystack: &str, markers: &[String]) -> bool {
    markers
        .iter()
        .filter(|m| !m.is_empty())
        .any(|m| haystack.contains(&m.to_lowercase()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub is_compound: bool,
    pub is_context_dependent: bool,
}

#[derive(Debug, Clone)]
pub struct CommandClassifier {
    cfg: ClassifierSection,
}

impl CommandClassifier {
    pub fn new(cfg: ClassifierSection) -> Self {
        Self { cfg }
    }

    /// 含复合标记词，或字符数 ≥ compound_min_chars
    pub fn is_compound(&self, command: &str) -> bool {
        let lower = command.to_lowercase();
        contains_any(&lower, &self.cfg.complex_markers)
            || command.chars().count() >= self.cfg.compound_min_chars
    }

    pub fn is_context_dependent(&self, command: &str, history: &[Round]) -> bool {
        let lower = command.to_lowercase();
        if contains_any(&lower, &self.cfg.contextual_markers)
            || contains_any(&lower, &self.cfg.continuation_markers)
        {
            return true;
        }
        if history.is_empty() {
            return false;
        }
        has_quoted_substring(command) || command.chars().count() < self.cfg.short_command_chars
    }

    pub fn classify(&self, command: &str, history: &[Round]) -> Classification {
        Classification {
            is_compound: self.is_compound(command),
            is_context_dependent: self.is_context_dependent(command, history),
        }
    }
}
