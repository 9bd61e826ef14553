//! Permission Engine: a pure function over `(tool_id, policy, yolo_flag)`.
//!
//! No I/O, no session knowledge beyond what's passed in. The dispatcher in
//! `agc-core` owns the policy-overlay merge (team-level + session-level,
//! session first) and calls [`decide`] once per tool call.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Outcome of evaluating one tool call against a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Carries the pattern that matched, for the synthesized tool-result
    /// message ("permission denied: <rule>").
    Deny(String),
    Ask,
}

/// A single glob rule compiled once per policy load.
#[derive(Debug, Clone)]
struct CompiledPattern {
    source: String,
    regex: Regex,
}

impl CompiledPattern {
    fn compile(glob: &str) -> Self {
        CompiledPattern { source: glob.to_string(), regex: glob_to_regex(glob) }
    }

    fn matches(&self, id: &str) -> bool {
        self.regex.is_match(id)
    }
}

/// A policy: ordered deny and allow pattern lists. Patterns are glob-style
/// over a canonical tool identifier `<toolset_type>:<tool_name>` or
/// `<toolset_type>:<server>:<tool_name>` for MCP.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default)]
    pub allow: Vec<String>,
}

/// Compiled form of a [`Policy`], ready for repeated evaluation.
pub struct CompiledPolicy {
    deny: Vec<CompiledPattern>,
    allow: Vec<CompiledPattern>,
}

impl CompiledPolicy {
    pub fn compile(policy: &Policy) -> Self {
        Self {
            deny: policy.deny.iter().map(|p| CompiledPattern::compile(p)).collect(),
            allow: policy.allow.iter().map(|p| CompiledPattern::compile(p)).collect(),
        }
    }

    /// Evaluate one tool call. Order: deny beats allow beats
    /// yolo/tools_approved beats the default `ask`.
    pub fn decide(&self, tool_id: &str, yolo_or_tools_approved: bool) -> Decision {
        for pat in &self.deny {
            if pat.matches(tool_id) {
                return Decision::Deny(pat.source.clone());
            }
        }
        for pat in &self.allow {
            if pat.matches(tool_id) {
                return Decision::Allow;
            }
        }
        if yolo_or_tools_approved {
            return Decision::Allow;
        }
        Decision::Ask
    }
}

/// Convenience one-shot evaluation that compiles the policy on every call.
/// Prefer [`CompiledPolicy::compile`] once per session and reuse it when
/// evaluating many calls.
pub fn decide(tool_id: &str, policy: &Policy, yolo_or_tools_approved: bool) -> Decision {
    CompiledPolicy::compile(policy).decide(tool_id, yolo_or_tools_approved)
}

/// Compile a glob pattern (only `*` and `?` are special) into an anchored
/// regex. Every other regex metacharacter is escaped so authors can write
/// `mcp:github:*` without worrying about regex syntax.
fn glob_to_regex(glob: &str) -> Regex {
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            _ => {
                if regex_syntax::is_meta_character(c) {
                    out.push('\\');
                }
                out.push(c);
            }
        }
    }
    out.push('$');
    Regex::new(&out).unwrap_or_else(|_| Regex::new("$^").unwrap())
}

mod regex_syntax {
    pub fn is_meta_character(c: char) -> bool {
        matches!(
            c,
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\'
        )
    }
}
