//! Runtime-level data model: the pieces of §3 that don't already live in
//! `agc-model` (messages/tool calls) or `agc-session` (persisted rows).
//!
//! Agents and Teams are immutable once loaded; nothing here mutates after
//! construction except `Session`, which the runtime owns exclusively while
//! driving it (see `agc_core::runtime`).

use std::collections::HashMap;

use agc_config::AgentConfig;
use agc_model::ThinkingBudget;
use serde::{Deserialize, Serialize};

/// An immutable agent definition resolved from configuration. Carries no
/// runtime state — iteration counters, active toolsets, and history all
/// live in the `Session` or the in-flight conversation loop.
#[derive(Debug, Clone)]
pub struct Agent {
    pub name: String,
    pub instruction: String,
    pub model_ref: String,
    pub toolset_refs: Vec<String>,
    pub sub_agent_names: Vec<String>,
    pub handoff_names: Vec<String>,
    pub commands_map: HashMap<String, String>,
    pub welcome_message: Option<String>,
    pub structured_output_schema: Option<serde_json::Value>,
    pub max_iterations: u32,
    pub num_history_items: u32,
}

impl Agent {
    pub fn from_config(cfg: &AgentConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            instruction: cfg.instruction.clone(),
            model_ref: cfg.model.clone(),
            toolset_refs: cfg.toolsets.clone(),
            sub_agent_names: cfg.sub_agents.clone(),
            handoff_names: cfg.handoffs.clone(),
            commands_map: cfg.commands.clone(),
            welcome_message: cfg.welcome_message.clone(),
            structured_output_schema: cfg.structured_output_schema.clone(),
            max_iterations: cfg.max_iterations,
            num_history_items: cfg.num_history_items,
        }
    }
}

/// A named collection of agents with a designated root. Cycles in
/// `sub_agents` and mutual references in `handoffs` are both legal — the
/// runtime only ever transfers control one level at a time, so it never
/// needs to materialize the reference graph.
#[derive(Debug, Clone)]
pub struct Team {
    pub root_agent: String,
    pub agents: HashMap<String, Agent>,
}

impl Team {
    pub fn new(root_agent: impl Into<String>, agents: HashMap<String, Agent>) -> Self {
        Self { root_agent: root_agent.into(), agents }
    }

    pub fn get(&self, name: &str) -> Option<&Agent> {
        self.agents.get(name)
    }

    pub fn root(&self) -> Option<&Agent> {
        self.agents.get(&self.root_agent)
    }

    /// Validate that every name referenced in `sub_agents`/`handoffs`
    /// resolves within this Team. Run once at load time; the runtime
    /// trusts a `Team` that passed this check.
    pub fn validate(&self) -> Result<(), String> {
        if !self.agents.contains_key(&self.root_agent) {
            return Err(format!("root agent '{}' not found in team", self.root_agent));
        }
        for agent in self.agents.values() {
            for name in agent.sub_agent_names.iter().chain(agent.handoff_names.iter()) {
                if name != &agent.name && !self.agents.contains_key(name) {
                    return Err(format!(
                        "agent '{}' references unknown agent '{}'",
                        agent.name, name
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Non-persisted, per-session runtime settings a caller may toggle. The
/// durable form of the same fields lives in `agc_session::SessionRow`'s
/// `config_json`; the runtime hydrates one of these from it at session
/// open and writes it back on `update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub tools_approved: bool,
    #[serde(default)]
    pub thinking_enabled: bool,
    #[serde(default)]
    pub hide_tool_results: bool,
    #[serde(default)]
    pub permissions_overlay: agc_permissions::Policy,
    #[serde(default)]
    pub agent_model_overrides: HashMap<String, String>,
    #[serde(default)]
    pub custom_models_used: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Populated on suspend (`S_suspend`), cleared on resume. Lets a
    /// restarted process re-enter `awaiting_tool_approval` instead of
    /// losing the pause.
    #[serde(default)]
    pub pending_tool_calls: Vec<PendingApprovalCall>,
    /// Ids within `pending_tool_calls` whose arguments failed to parse at
    /// assembly time; carried across suspend so resume still frames them
    /// as `tool_arguments_invalid` instead of dispatching them.
    #[serde(default)]
    pub pending_invalid_argument_ids: Vec<String>,
    /// The iteration count in flight when `pending_tool_calls` was
    /// populated, so `resume()` continues counting toward
    /// `max_iterations` instead of resetting it.
    #[serde(default)]
    pub pending_iteration: u32,
    /// Name of the agent currently driving the conversation. Starts as the
    /// team's root and changes on `agent_handoff`.
    #[serde(default)]
    pub active_agent: Option<String>,
}

/// One tool call awaiting approval, durable enough to survive a process
/// restart while the session is parked in `S_suspend`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApprovalCall {
    pub id: String,
    pub name: String,
    pub arguments_json: String,
}

/// Resolves an agent's model reference plus any session-level override, as
/// required by §3 ("`agent_model_overrides` is authoritative over
/// agent-file defaults for this session's lifetime").
pub fn resolve_model_ref<'a>(agent: &'a Agent, settings: &'a SessionSettings) -> &'a str {
    settings
        .agent_model_overrides
        .get(&agent.name)
        .map(|s| s.as_str())
        .unwrap_or(&agent.model_ref)
}

/// Parse a config's `thinking_budget` string into the shape `agc-model`
/// expects: an integer token count if it parses as one, otherwise an
/// effort-level string passed through verbatim.
pub fn parse_thinking_budget(raw: &str) -> ThinkingBudget {
    match raw.parse::<u32>() {
        Ok(tokens) => ThinkingBudget::Tokens(tokens),
        Err(_) => ThinkingBudget::Effort(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str, sub_agents: &[&str], handoffs: &[&str]) -> Agent {
        Agent {
            name: name.into(),
            instruction: String::new(),
            model_ref: "fast".into(),
            toolset_refs: Vec::new(),
            sub_agent_names: sub_agents.iter().map(|s| s.to_string()).collect(),
            handoff_names: handoffs.iter().map(|s| s.to_string()).collect(),
            commands_map: HashMap::new(),
            welcome_message: None,
            structured_output_schema: None,
            max_iterations: 20,
            num_history_items: 0,
        }
    }

    #[test]
    fn team_validate_accepts_self_referential_sub_agent() {
        let mut agents = HashMap::new();
        agents.insert("root".to_string(), agent("root", &["root"], &[]));
        let team = Team::new("root", agents);
        assert!(team.validate().is_ok());
    }

    #[test]
    fn team_validate_accepts_mutual_handoffs() {
        let mut agents = HashMap::new();
        agents.insert("a".to_string(), agent("a", &[], &["b"]));
        agents.insert("b".to_string(), agent("b", &[], &["a"]));
        let team = Team::new("a", agents);
        assert!(team.validate().is_ok());
    }

    #[test]
    fn team_validate_rejects_unknown_reference() {
        let mut agents = HashMap::new();
        agents.insert("root".to_string(), agent("root", &[], &["ghost"]));
        let team = Team::new("root", agents);
        assert!(team.validate().is_err());
    }

    #[test]
    fn team_validate_rejects_missing_root() {
        let agents = HashMap::new();
        let team = Team::new("root", agents);
        assert!(team.validate().is_err());
    }

    #[test]
    fn model_override_takes_precedence_over_agent_default() {
        let a = agent("root", &[], &[]);
        let mut settings = SessionSettings::default();
        settings.agent_model_overrides.insert("root".to_string(), "custom".to_string());
        assert_eq!(resolve_model_ref(&a, &settings), "custom");
    }

    #[test]
    fn no_override_falls_back_to_agent_default() {
        let a = agent("root", &[], &[]);
        let settings = SessionSettings::default();
        assert_eq!(resolve_model_ref(&a, &settings), "fast");
    }

    #[test]
    fn thinking_budget_parses_integer_as_tokens() {
        assert!(matches!(parse_thinking_budget("4096"), ThinkingBudget::Tokens(4096)));
    }

    #[test]
    fn thinking_budget_falls_back_to_effort_string() {
        assert!(matches!(parse_thinking_budget("medium"), ThinkingBudget::Effort(ref s) if s == "medium"));
    }
}
