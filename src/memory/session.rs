//! 会话记忆：按文档保存最近若干轮对话
//!
//! - 每个文档最多保留 max_history_rounds 轮（即 2*N 条消息），超出丢弃最旧的轮次
//! - 文档数超过 max_concurrent_sessions 时淘汰最久未访问的文档（LRU）
//! - 读取（get）与写入（append）都会刷新访问时间
//! - 两个上限可通过 set_limits 在运行期调整（编排器每次运行按当前配置设置）

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;

use crate::memory::Round;

/// 会话存储统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub max_sessions: usize,
    pub max_history_rounds: usize,
}

#[derive(Debug)]
struct SessionEntry {
    rounds: VecDeque<Round>,
    last_used: u64,
}

#[derive(Debug)]
struct SessionCache {
    entries: HashMap<String, SessionEntry>,
    /// 单调递增的访问计数，用作 LRU 时间戳
    tick: u64,
    max_history_rounds: usize,
    max_concurrent_sessions: usize,
}

impl SessionCache {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_over_capacity(&mut self) {
        while self.entries.len() > self.max_concurrent_sessions {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    self.entries.remove(&id);
                    tracing::warn!(document_id = %id, "session limit exceeded, evicted least recently used");
                }
                None => break,
            }
        }
    }
}

/// 文档级会话记忆（内存型，进程内共享）
#[derive(Debug)]
pub struct SessionMemory {
    inner: Mutex<SessionCache>,
}

impl SessionMemory {
    pub fn new(max_concurrent_sessions: usize, max_history_rounds: usize) -> Self {
        let max_history_rounds = max_history_rounds.max(1);
        let max_concurrent_sessions = max_concurrent_sessions.max(1);
        tracing::info!(
            max_sessions = max_concurrent_sessions,
            max_history_rounds,
            "SessionMemory initialized"
        );
        Self {
            inner: Mutex::new(SessionCache {
                entries: HashMap::new(),
                tick: 0,
                max_history_rounds,
                max_concurrent_sessions,
            }),
        }
    }

    /// 调整上限；缩小时立即截断历史并按 LRU 淘汰
    pub fn set_limits(&self, max_concurrent_sessions: usize, max_history_rounds: usize) {
        let max_history_rounds = max_history_rounds.max(1);
        let max_concurrent_sessions = max_concurrent_sessions.max(1);
        let mut cache = self.cache();
        if cache.max_history_rounds == max_history_rounds
            && cache.max_concurrent_sessions == max_concurrent_sessions
        {
            return;
        }
        cache.max_history_rounds = max_history_rounds;
        cache.max_concurrent_sessions = max_concurrent_sessions;
        for entry in cache.entries.values_mut() {
            while entry.rounds.len() > max_history_rounds {
                entry.rounds.pop_front();
            }
        }
        cache.evict_over_capacity();
        tracing::info!(
            max_sessions = max_concurrent_sessions,
            max_history_rounds,
            "session limits updated"
        );
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, SessionCache> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 获取文档的历史轮次（副本）；存在时刷新为最近使用
    pub fn get(&self, document_id: &str) -> Vec<Round> {
        let mut cache = self.cache();
        let tick = cache.next_tick();
        match cache.entries.get_mut(document_id) {
            Some(entry) => {
                entry.last_used = tick;
                tracing::debug!(document_id, rounds = entry.rounds.len(), "session history read");
                entry.rounds.iter().cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// 追加一轮对话，超出轮数上限时丢弃最旧轮次，随后执行 LRU 淘汰
    pub fn append(&self, document_id: &str, user_text: &str, assistant_summary: &str) {
        let mut cache = self.cache();
        let tick = cache.next_tick();
        let max_rounds = cache.max_history_rounds;

        let entry = cache
            .entries
            .entry(document_id.to_string())
            .or_insert_with(|| SessionEntry {
                rounds: VecDeque::new(),
                last_used: tick,
            });
        entry.rounds.push_back(Round::new(user_text, assistant_summary));
        let mut dropped = 0;
        while entry.rounds.len() > max_rounds {
            entry.rounds.pop_front();
            dropped += 1;
        }
        entry.last_used = tick;
        if dropped > 0 {
            tracing::info!(document_id, dropped, "session history truncated");
        }
        tracing::info!(
            document_id,
            rounds = entry.rounds.len(),
            user = %preview(user_text),
            assistant = %preview(assistant_summary),
            "session history updated"
        );

        cache.evict_over_capacity();
    }

    /// 清除文档的全部历史
    pub fn clear(&self, document_id: &str) {
        if self.cache().entries.remove(document_id).is_some() {
            tracing::info!(document_id, "session history cleared");
        }
    }

    /// 当前是否持有该文档的会话（不刷新访问时间）
    pub fn contains(&self, document_id: &str) -> bool {
        self.cache().entries.contains_key(document_id)
    }

    pub fn len(&self) -> usize {
        self.cache().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> SessionStats {
        let cache = self.cache();
        SessionStats {
            total_sessions: cache.entries.len(),
            max_sessions: cache.max_concurrent_sessions,
            max_history_rounds: cache.max_history_rounds,
        }
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > 50 {
        format!("{}...", text.chars().take(50).collect::<String>())
    } else {
        text.to_string()
    }
}
