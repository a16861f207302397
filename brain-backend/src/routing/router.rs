//! Two-tier request router
//!
//! Tier 1 matches whole words of the request against each agent's capability
//! tags. When one agent covers every matched tag and the request carries no
//! sequencing marker, that agent handles it alone. Everything else goes to the
//! planner. A planner failure degrades to the default agent; requests are
//! never dropped.

use super::planner::Planner;
use super::types::RouteDecision;
use crate::agents::{AgentDescriptor, CapabilityRegistry};
use crate::error::{BrainError, Result};
use crate::models::{Request, Session};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Phrases that signal an ordered, multi-step request
const MULTI_STEP_MARKERS: &[&str] = &[
    "and then",
    "after that",
    "followed by",
    "afterwards",
    ", then",
    "; then",
];

pub struct Router {
    planner: Arc<dyn Planner>,
}

/// Lowercased words of `text` joined by single spaces and padded, so that
/// `" tag "` containment is a whole-word (or whole-phrase) match
fn normalize_words(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    format!(" {} ", words.join(" "))
}

pub fn has_multi_step_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    MULTI_STEP_MARKERS.iter().any(|m| lower.contains(m))
}

/// Tags of `descriptor` that occur as whole words in the normalized text
fn matched_tags<'a>(descriptor: &'a AgentDescriptor, words: &str) -> BTreeSet<&'a str> {
    descriptor
        .capability_tags
        .iter()
        .filter(|tag| words.contains(&normalize_words(tag)))
        .map(|tag| tag.as_str())
        .collect()
}

/// Pick one agent among those covering the matched tags: fewest tags, then the
/// default agent, then the smallest id
fn break_tie<'a>(candidates: &[&'a AgentDescriptor], default_agent: &str) -> Option<&'a AgentDescriptor> {
    let fewest = candidates.iter().map(|d| d.capability_tags.len()).min()?;
    let narrowest: Vec<&'a AgentDescriptor> = candidates
        .iter()
        .copied()
        .filter(|d| d.capability_tags.len() == fewest)
        .collect();

    if let Some(default) = narrowest.iter().find(|d| d.agent_id == default_agent) {
        return Some(*default);
    }
    narrowest.into_iter().min_by(|a, b| a.agent_id.cmp(&b.agent_id))
}

/// Tier 1 classification. `None` means the request needs the planner.
pub fn match_single_agent(text: &str, registry: &CapabilityRegistry) -> Option<String> {
    if has_multi_step_marker(text) {
        return None;
    }

    let words = normalize_words(text);
    let mut all_matched: BTreeSet<&str> = BTreeSet::new();
    for descriptor in registry.descriptors() {
        all_matched.extend(matched_tags(descriptor, &words));
    }
    if all_matched.is_empty() {
        return None;
    }

    let covering: Vec<&AgentDescriptor> = registry
        .descriptors()
        .filter(|d| all_matched.iter().all(|tag| d.capability_tags.contains(*tag)))
        .collect();

    break_tie(&covering, registry.default_agent()).map(|d| d.agent_id.clone())
}

impl Router {
    pub fn new(planner: Arc<dyn Planner>) -> Self {
        Self { planner }
    }

    /// Classify a request. Reads the session, never mutates anything.
    pub async fn route(
        &self,
        request: &Request,
        session: &Session,
        registry: &CapabilityRegistry,
    ) -> Result<RouteDecision> {
        let default_agent = registry.default_agent();
        if !registry.contains(default_agent) {
            return Err(BrainError::Routing(format!(
                "default agent '{}' missing from registry",
                default_agent
            )));
        }

        if let Some(agent_id) = match_single_agent(&request.text, registry) {
            log::info!("[ROUTER] Tag match -> single agent '{}'", agent_id);
            return Ok(RouteDecision::Single { agent_id });
        }

        match self.planner.plan(request, session, registry).await {
            Ok(plan) if plan.len() == 1 => {
                let agent_id = plan.steps[0].agent_id.clone();
                log::info!("[ROUTER] Planner chose single agent '{}'", agent_id);
                Ok(RouteDecision::Single { agent_id })
            }
            Ok(plan) => {
                log::info!(
                    "[ROUTER] Planner produced {} steps: {}",
                    plan.len(),
                    plan.steps
                        .iter()
                        .map(|s| s.agent_id.as_str())
                        .collect::<Vec<_>>()
                        .join(" -> ")
                );
                Ok(RouteDecision::Multi { plan })
            }
            Err(e) => {
                log::warn!(
                    "[ROUTER] Planning failed ({}), falling back to '{}'",
                    e,
                    default_agent
                );
                Ok(RouteDecision::single(default_agent))
            }
        }
    }
}
