//! Streaming tool-call assembly (§4.1, §9 "Streaming tool-call assembly").
//!
//! Providers emit tool-call arguments as JSON fragments keyed by a stream
//! `index`; `id` may only arrive on the first delta and `name` on a later
//! one. This accumulator concatenates fragments per index and defers JSON
//! parsing to `finish()`, the only place arguments are ever parsed.

use std::collections::HashMap;

use agc_model::Chunk;
use agc_tools::ToolCall;
use tracing::warn;

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingToolCall {
    /// Finalize into a dispatchable `ToolCall` plus whether its arguments
    /// were unparseable even after repair (§4.1: such calls produce a
    /// `tool_arguments_invalid` result instead of executing, while
    /// siblings in the same batch still run).
    fn finish(self) -> (ToolCall, bool) {
        if self.args_buf.trim().is_empty() {
            return (ToolCall { id: self.id, name: self.name, args: serde_json::Value::Object(Default::default()) }, false);
        }
        match serde_json::from_str(&self.args_buf) {
            Ok(v) => (ToolCall { id: self.id, name: self.name, args: v }, false),
            Err(parse_err) => match attempt_json_repair(&self.args_buf) {
                Ok(v) => {
                    warn!(tool_name = %self.name, tool_call_id = %self.id, "repaired invalid JSON arguments from model");
                    (ToolCall { id: self.id, name: self.name, args: v }, false)
                }
                Err(_) => {
                    warn!(
                        tool_name = %self.name,
                        tool_call_id = %self.id,
                        args_buf = %self.args_buf,
                        error = %parse_err,
                        "tool call arguments could not be parsed or repaired",
                    );
                    (
                        ToolCall { id: self.id, name: self.name, args: serde_json::Value::Object(Default::default()) },
                        true,
                    )
                }
            },
        }
    }
}

/// Result of assembling one provider turn.
#[derive(Debug, Default)]
pub struct AssembledTurn {
    pub text: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCall>,
    /// Ids (from `tool_calls`) whose arguments could not be parsed or
    /// repaired; the dispatcher must frame these as `tool_arguments_invalid`
    /// without ever invoking the backend.
    pub invalid_argument_ids: std::collections::HashSet<String>,
    pub usage: Option<agc_model::Usage>,
    pub finish: Option<agc_model::FinishReason>,
}

/// Accumulates chunks for a single turn. The caller feeds it every `Chunk`
/// from the provider stream and calls `finish()` once `Chunk::Finish` (or
/// end-of-stream) is observed.
#[derive(Default)]
pub struct TurnAssembler {
    text: String,
    reasoning: String,
    pending: HashMap<u32, PendingToolCall>,
    usage: Option<agc_model::Usage>,
    finish: Option<agc_model::FinishReason>,
}

impl TurnAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: Chunk) {
        match chunk {
            Chunk::TextDelta(delta) => self.text.push_str(&delta),
            Chunk::ReasoningDelta(delta) => self.reasoning.push_str(&delta),
            Chunk::ToolCallDelta { index, id, name, args_delta } => {
                let ptc = self.pending.entry(index).or_default();
                if let Some(id) = id.filter(|s| !s.is_empty()) {
                    ptc.id = id;
                }
                if let Some(name) = name.filter(|s| !s.is_empty()) {
                    ptc.name = name;
                }
                if let Some(delta) = args_delta {
                    ptc.args_buf.push_str(&delta);
                }
            }
            Chunk::Finish(reason) => self.finish = Some(reason),
            Chunk::Usage(usage) => self.usage = Some(usage),
        }
    }

    /// Flush accumulated tool calls in index order. Tool calls with an
    /// empty name are dropped (nothing to dispatch); those with an empty
    /// id get a synthesized one so the turn can still complete.
    pub fn finish(self) -> AssembledTurn {
        let mut ordered: Vec<(u32, PendingToolCall)> = self.pending.into_iter().collect();
        ordered.sort_by_key(|(index, _)| *index);

        let mut tool_calls = Vec::with_capacity(ordered.len());
        let mut invalid_argument_ids = std::collections::HashSet::new();
        for (i, (_, ptc)) in ordered.into_iter().enumerate() {
            if ptc.name.is_empty() {
                warn!(tool_call_id = %ptc.id, "dropping tool call with empty name from model");
                continue;
            }
            let (mut call, args_invalid) = ptc.finish();
            if call.id.is_empty() {
                call.id = format!("call_synthetic_{i}");
            }
            if args_invalid {
                invalid_argument_ids.insert(call.id.clone());
            }
            tool_calls.push(call);
        }

        AssembledTurn {
            text: self.text,
            reasoning: self.reasoning,
            tool_calls,
            invalid_argument_ids,
            usage: self.usage,
            finish: self.finish,
        }
    }
}

/// Attempt to repair common JSON syntax errors in streamed tool-call
/// arguments: invalid escape sequences, a missing comma between key-value
/// pairs, or a truncated trailing object.
fn attempt_json_repair(json_str: &str) -> anyhow::Result<serde_json::Value> {
    let fixed = fix_invalid_json_escapes(json_str);
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(&fixed) {
        return Ok(v);
    }

    let repaired = regex::Regex::new(r#""([^"]+)"([a-zA-Z_][a-zA-Z0-9_]*)":\s*"#)
        .unwrap()
        .replace_all(&fixed, r#""$1", "$2": "#);
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(&repaired) {
        return Ok(v);
    }

    if !fixed.trim().ends_with('}') {
        let mut completed = fixed.clone();
        let quote_count = fixed.chars().filter(|&c| c == '"').count();
        if quote_count % 2 == 1 {
            completed.push('"');
        }
        if !completed.trim().ends_with('}') {
            completed.push('}');
        }
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(&completed) {
            return Ok(v);
        }
    }

    anyhow::bail!("JSON repair failed: all repair strategies exhausted")
}

/// Replace invalid JSON escape sequences inside string values (e.g. `\c`,
/// `\p`) with a properly escaped backslash so the result round-trips
/// through `serde_json`.
fn fix_invalid_json_escapes(json_str: &str) -> String {
    let mut result = String::with_capacity(json_str.len() + 16);
    let mut chars = json_str.chars();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => match chars.next() {
                    Some(next) if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
                        result.push('\\');
                        result.push(next);
                    }
                    Some(next) => {
                        result.push('\\');
                        result.push('\\');
                        result.push(next);
                    }
                    None => result.push('\\'),
                },
                '"' => {
                    in_string = false;
                    result.push('"');
                }
                _ => result.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_single_tool_call_across_deltas() {
        let mut asm = TurnAssembler::new();
        asm.push(Chunk::ToolCallDelta {
            index: 0,
            id: Some("call_1".into()),
            name: Some("shell".into()),
            args_delta: Some("{\"cmd\":".into()),
        });
        asm.push(Chunk::ToolCallDelta { index: 0, id: None, name: None, args_delta: Some("\"ls\"}".into()) });
        asm.push(Chunk::Finish(agc_model::FinishReason::ToolCalls));
        let turn = asm.finish();
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].id, "call_1");
        assert_eq!(turn.tool_calls[0].args["cmd"], "ls");
    }

    #[test]
    fn interleaved_parallel_calls_assemble_independently() {
        let mut asm = TurnAssembler::new();
        asm.push(Chunk::ToolCallDelta { index: 0, id: Some("a".into()), name: Some("fs".into()), args_delta: Some("{\"x\":1".into()) });
        asm.push(Chunk::ToolCallDelta { index: 1, id: Some("b".into()), name: Some("shell".into()), args_delta: Some("{\"y\":2".into()) });
        asm.push(Chunk::ToolCallDelta { index: 0, id: None, name: None, args_delta: Some("}".into()) });
        asm.push(Chunk::ToolCallDelta { index: 1, id: None, name: None, args_delta: Some("}".into()) });
        let turn = asm.finish();
        assert_eq!(turn.tool_calls.len(), 2);
        assert_eq!(turn.tool_calls[0].id, "a");
        assert_eq!(turn.tool_calls[1].id, "b");
    }

    #[test]
    fn empty_name_call_is_dropped() {
        let mut asm = TurnAssembler::new();
        asm.push(Chunk::ToolCallDelta { index: 0, id: Some("a".into()), name: None, args_delta: Some("{}".into()) });
        let turn = asm.finish();
        assert!(turn.tool_calls.is_empty());
    }

    #[test]
    fn empty_id_gets_synthesized() {
        let mut asm = TurnAssembler::new();
        asm.push(Chunk::ToolCallDelta { index: 0, id: None, name: Some("fs".into()), args_delta: Some("{}".into()) });
        let turn = asm.finish();
        assert_eq!(turn.tool_calls[0].id, "call_synthetic_0");
    }

    #[test]
    fn empty_arguments_become_empty_object() {
        let mut asm = TurnAssembler::new();
        asm.push(Chunk::ToolCallDelta { index: 0, id: Some("a".into()), name: Some("think".into()), args_delta: None });
        let turn = asm.finish();
        assert_eq!(turn.tool_calls[0].args, serde_json::json!({}));
    }

    #[test]
    fn repairs_invalid_escape_sequence() {
        let broken = r#"{"path": "C:\cache\file"}"#;
        let v = attempt_json_repair(broken).unwrap();
        assert_eq!(v["path"], "C:\\cache\\file");
    }

    #[test]
    fn repairs_missing_comma_between_fields() {
        let broken = r#"{"a": "1"b": "2"}"#;
        let v = attempt_json_repair(broken).unwrap();
        assert_eq!(v["a"], "1");
        assert_eq!(v["b"], "2");
    }

    #[test]
    fn repairs_truncated_trailing_object() {
        let broken = r#"{"path": "/tmp/foo"#;
        let v = attempt_json_repair(broken).unwrap();
        assert_eq!(v["path"], "/tmp/foo");
    }

    #[test]
    fn unrepairable_json_returns_err() {
        let broken = "{{{{not json at all";
        assert!(attempt_json_repair(broken).is_err());
    }

    #[test]
    fn text_and_reasoning_deltas_concatenate() {
        let mut asm = TurnAssembler::new();
        asm.push(Chunk::TextDelta("hel".into()));
        asm.push(Chunk::TextDelta("lo".into()));
        asm.push(Chunk::ReasoningDelta("thinking".into()));
        let turn = asm.finish();
        assert_eq!(turn.text, "hello");
        assert_eq!(turn.reasoning, "thinking");
    }

    #[test]
    fn unparseable_arguments_after_repair_substitute_empty_object() {
        let mut asm = TurnAssembler::new();
        asm.push(Chunk::ToolCallDelta {
            index: 0,
            id: Some("a".into()),
            name: Some("shell".into()),
            args_delta: Some("{{{{garbage".into()),
        });
        let turn = asm.finish();
        assert_eq!(turn.tool_calls[0].args, serde_json::json!({}));
    }
}
