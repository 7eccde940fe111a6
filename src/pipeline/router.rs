//! 两级工具路由，保证候选集非空
//!
//! 1. 关键词：按声明顺序扫描工具组，首个命中（忽略大小写的子串）的组胜出；
//!    该组在目录中没有任何操作时视为未命中，进入模型路由
//! 2. 模型路由：关键词未命中时，强制调用 route_to_<group> 选择器之一
//! 3. 兜底：仍无法确定组时使用完整操作目录

use std::sync::Arc;

use serde::Serialize;

use crate::config::{RoutingSection, ToolGroup};
use crate::llm::{CallRequest, LlmError, StructuredCallClient, ToolChoice};
use crate::tools::{selector_schema, ToolCatalog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePath {
    KeywordHit,
    AiRouted,
    FallbackAll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub selected_operations: Vec<String>,
    pub path: RoutePath,
    pub group: Option<String>,
}

pub struct ToolRouter {
    client: Arc<dyn StructuredCallClient>,
    routing: RoutingSection,
    catalog: ToolCatalog,
    system_prompt: String,
}

impl ToolRouter {
    pub fn new(
        client: Arc<dyn StructuredCallClient>,
        routing: RoutingSection,
        catalog: ToolCatalog,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client,
            routing,
            catalog,
            system_prompt: system_prompt.into(),
        }
    }

    /// 组内在目录中存在的操作名
    fn members(&self, group: &ToolGroup) -> Vec<String> {
        self.catalog
            .select(&group.operations)
            .into_iter()
            .map(|op| op.name)
            .collect()
    }

    fn decision(&self, group: &ToolGroup, path: RoutePath) -> Option<RoutingDecision> {
        let selected_operations = self.members(group);
        if selected_operations.is_empty() {
            tracing::warn!(group = %group.name, "tool group has no cataloged operations");
            return None;
        }
        Some(RoutingDecision {
            selected_operations,
            path,
            group: Some(group.name.clone()),
        })
    }

    pub fn keyword_match(&self, command: &str) -> Option<RoutingDecision> {
        let lower = command.to_lowercase();
        let hit = self.routing.groups.iter().find(|g| {
            g.keywords
                .iter()
                .any(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
        })?;
        self.decision(hit, RoutePath::KeywordHit)
    }

    async fn ai_route(&self, command: &str) -> Result<Option<RoutingDecision>, LlmError> {
        let prefix = &self.routing.selector_prefix;
        let selectors = self
            .routing
            .groups
            .iter()
            .map(|g| selector_schema(prefix, &g.name))
            .collect();
        let request = CallRequest::new(self.system_prompt.clone(), command)
            .with_tools(selectors)
            .with_choice(ToolChoice::Required);

        let response = match self.client.call(request).await {
            Ok(r) => r,
            Err(e) if e.is_rate_limited() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "routing call failed");
                return Ok(None);
            }
        };

        let chosen = response
            .tool_calls
            .first()
            .and_then(|c| c.name.strip_prefix(prefix.as_str()))
            .and_then(|name| self.routing.groups.iter().find(|g| g.name == name));
        Ok(chosen.and_then(|g| self.decision(g, RoutePath::AiRouted)))
    }

    fn fallback_all(&self) -> RoutingDecision {
        RoutingDecision {
            selected_operations: self.catalog.names(),
            path: RoutePath::FallbackAll,
            group: None,
        }
    }

    pub async fn route(&self, command: &str) -> Result<RoutingDecision, LlmError> {
        if let Some(hit) = self.keyword_match(command) {
            tracing::debug!(group = ?hit.group, "routed by keyword");
            return Ok(hit);
        }
        if !self.routing.groups.is_empty() {
            if let Some(routed) = self.ai_route(command).await? {
                tracing::debug!(group = ?routed.group, "routed by model");
                return Ok(routed);
            }
        }
        tracing::debug!("routing fell back to full catalog");
        Ok(self.fallback_all())
    }
}
