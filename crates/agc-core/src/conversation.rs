//! Conversation Loop (§4.1): drives one user prompt through the
//! `S0 call_model → S1 assembling → S2 dispatch → S3 execute → S4 append`
//! state machine to a terminal or suspended state.

use std::collections::HashMap;
use std::sync::Arc;

use agc_model::{CompletionRequest, FinishReason, Message, ModelProvider, Role, ToolSchema};
use agc_permissions::{CompiledPolicy, Decision};
use agc_tools::{ToolCall as DispatchCall, ToolRegistry};
use futures::StreamExt;
use tracing::warn;

use crate::assemble::TurnAssembler;
use crate::dispatcher::{Dispatcher, TRANSFER_TASK};
use crate::events::{error_kind, DoneReason, PendingCall, RuntimeEvent};
use crate::fanout::FanoutSender;
use crate::types::{Agent, PendingApprovalCall, SessionSettings, Team};

/// Terminal or suspended outcome of driving the loop.
#[derive(Debug)]
pub enum LoopOutcome {
    Done(DoneReason),
    AwaitingToolApproval,
    Error { kind: String, detail: String },
}

/// The action a caller passes to `resume()` on a suspended session.
#[derive(Debug, Clone)]
pub enum ResumeAction {
    ApproveOnce,
    ApproveAll,
    Reject { reason: String },
}

/// Everything the loop needs that lives outside the session itself:
/// the team definition, resolved model providers, the tool registry and
/// dispatcher, and the event sink. Built once per runtime, shared across
/// sessions.
pub struct RunContext {
    pub team: Arc<Team>,
    pub models: HashMap<String, Arc<dyn ModelProvider>>,
    pub tools: Arc<ToolRegistry>,
    pub dispatcher: Dispatcher,
    pub events: FanoutSender,
}

impl RunContext {
    fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .schemas()
            .into_iter()
            .map(|s| ToolSchema { name: s.name, description: s.description, parameters: s.parameters })
            .collect()
    }
}

/// Drive a fresh user turn. `messages` and `settings` are the session's
/// live state, mutated in place; the caller (runtime.rs) is responsible
/// for persisting them afterward.
pub async fn run(
    ctx: &RunContext,
    messages: &mut Vec<Message>,
    settings: &mut SessionSettings,
    user_input: &str,
) -> LoopOutcome {
    messages.push(Message::user(user_input));
    drive(ctx, messages, settings).await
}

/// Re-enter a suspended session after `resume(action)`. Only valid when
/// `settings.pending_tool_calls` is non-empty (i.e. the session is parked
/// in `S_suspend`).
pub async fn resume(
    ctx: &RunContext,
    messages: &mut Vec<Message>,
    settings: &mut SessionSettings,
    action: ResumeAction,
) -> LoopOutcome {
    if settings.pending_tool_calls.is_empty() {
        return LoopOutcome::Error {
            kind: error_kind::CONFIG_INVALID.into(),
            detail: "resume() called on a session with nothing pending".into(),
        };
    }

    if matches!(action, ResumeAction::ApproveAll) {
        settings.tools_approved = true;
    }

    let pending = std::mem::take(&mut settings.pending_tool_calls);
    let agent_name = settings.active_agent.clone().unwrap_or_else(|| ctx.team.root_agent.clone());
    let Some(agent) = ctx.team.get(&agent_name) else {
        return LoopOutcome::Error { kind: error_kind::CONFIG_INVALID.into(), detail: format!("unknown agent '{agent_name}'") };
    };

    let calls: Vec<DispatchCall> = pending
        .iter()
        .map(|p| DispatchCall {
            id: p.id.clone(),
            name: p.name.clone(),
            args: serde_json::from_str(&p.arguments_json).unwrap_or(serde_json::Value::Object(Default::default())),
        })
        .collect();
    let invalid_argument_ids: std::collections::HashSet<String> =
        std::mem::take(&mut settings.pending_invalid_argument_ids).into_iter().collect();

    let policy = compiled_policy(settings);
    let decisions = resolve_after_resume(ctx, &calls, &policy, settings.tools_approved, &action);

    match execute_and_append(ctx, agent, &calls, &decisions, &invalid_argument_ids, messages, settings).await {
        Ok(()) => continue_loop(ctx, messages, settings).await,
        Err(outcome) => outcome,
    }
}

/// Recompute decisions the way they'd have been evaluated originally, but
/// replace any `Ask` with the caller's resume action. Allow/Deny calls
/// keep their original verdict regardless of the action taken on the
/// asked ones (§4.1 scenario 3).
fn resolve_after_resume(
    ctx: &RunContext,
    calls: &[DispatchCall],
    policy: &CompiledPolicy,
    tools_approved: bool,
    action: &ResumeAction,
) -> Vec<Decision> {
    ctx.dispatcher
        .evaluate(calls, policy, tools_approved)
        .into_iter()
        .map(|d| match (d, action) {
            (Decision::Ask, ResumeAction::ApproveOnce) | (Decision::Ask, ResumeAction::ApproveAll) => Decision::Allow,
            (Decision::Ask, ResumeAction::Reject { reason }) => Decision::Deny(format!("user rejected: {reason}")),
            (other, _) => other,
        })
        .collect()
}

fn compiled_policy(settings: &SessionSettings) -> CompiledPolicy {
    CompiledPolicy::compile(&settings.permissions_overlay)
}

/// The shared tail of both `run()` and `resume()`: keep calling `S0` until
/// a terminal state or a fresh suspend.
async fn continue_loop(ctx: &RunContext, messages: &mut Vec<Message>, settings: &mut SessionSettings) -> LoopOutcome {
    drive(ctx, messages, settings).await
}

async fn drive(ctx: &RunContext, messages: &mut Vec<Message>, settings: &mut SessionSettings) -> LoopOutcome {
    loop {
        let agent_name = settings.active_agent.clone().unwrap_or_else(|| ctx.team.root_agent.clone());
        settings.active_agent = Some(agent_name.clone());
        let Some(agent) = ctx.team.get(&agent_name) else {
            return LoopOutcome::Error { kind: error_kind::CONFIG_INVALID.into(), detail: format!("unknown agent '{agent_name}'") };
        };

        let iteration = settings.pending_iteration;
        if iteration >= agent.max_iterations {
            return LoopOutcome::Done(DoneReason::MaxIterations);
        }

        ctx.events.send(RuntimeEvent::AgentInfo { agent_name: agent.name.clone() });

        let model_ref = crate::types::resolve_model_ref(agent, settings).to_string();
        let Some(provider) = ctx.models.get(&model_ref) else {
            return LoopOutcome::Error {
                kind: error_kind::CONFIG_INVALID.into(),
                detail: format!("unknown model '{model_ref}'"),
            };
        };

        let req = build_request(agent, messages, ctx);
        let stream_result = provider.stream(req).await;
        let mut stream = match stream_result {
            Ok(s) => s,
            Err(e) => return provider_error_outcome(e),
        };

        let mut assembler = TurnAssembler::new();
        let mut stream_err = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    emit_chunk(&ctx.events, &agent.name, &chunk);
                    assembler.push(chunk);
                }
                Err(e) => {
                    stream_err = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = stream_err {
            return provider_error_outcome(e);
        }

        let turn = assembler.finish();
        if let Some(usage) = &turn.usage {
            ctx.events.send(RuntimeEvent::Usage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                cache_read_tokens: usage.cache_read_tokens,
                cache_write_tokens: usage.cache_write_tokens,
                cost_estimate: usage.cost_estimate,
            });
        }

        let assistant_msg = Message {
            role: Role::Assistant,
            content: turn.text.clone(),
            parts: Vec::new(),
            tool_calls: turn
                .tool_calls
                .iter()
                .map(|c| agc_model::ToolCall {
                    id: c.id.clone(),
                    function_name: c.name.clone(),
                    arguments_json: c.args.to_string(),
                })
                .collect(),
            tool_call_id: None,
            reasoning: if turn.reasoning.is_empty() { None } else { Some(turn.reasoning.clone()) },
            agent_name: Some(agent.name.clone()),
        };
        messages.push(assistant_msg);

        if turn.tool_calls.is_empty() {
            let reason = if matches!(turn.finish, Some(FinishReason::Length)) {
                DoneReason::Truncated
            } else {
                DoneReason::Completed
            };
            return LoopOutcome::Done(reason);
        }

        for call in &turn.tool_calls {
            ctx.events.send(RuntimeEvent::ToolCall {
                agent_name: agent.name.clone(),
                id: call.id.clone(),
                name: call.name.clone(),
                arguments_json: call.args.to_string(),
            });
        }

        let policy = compiled_policy(settings);
        let decisions = ctx.dispatcher.evaluate(&turn.tool_calls, &policy, settings.tools_approved);

        if decisions.iter().any(|d| matches!(d, Decision::Ask)) {
            settings.pending_tool_calls = turn
                .tool_calls
                .iter()
                .map(|c| PendingApprovalCall { id: c.id.clone(), name: c.name.clone(), arguments_json: c.args.to_string() })
                .collect();
            settings.pending_iteration = iteration;
            settings.pending_invalid_argument_ids = turn.invalid_argument_ids.iter().cloned().collect();
            ctx.events.send(RuntimeEvent::AwaitingToolApproval {
                calls: turn
                    .tool_calls
                    .iter()
                    .map(|c| PendingCall { id: c.id.clone(), name: c.name.clone(), arguments_json: c.args.to_string() })
                    .collect(),
            });
            return LoopOutcome::AwaitingToolApproval;
        }

        match execute_and_append_inline(ctx, agent, &turn.tool_calls, &decisions, &turn.invalid_argument_ids, messages, settings)
            .await
        {
            Some(outcome) => return outcome,
            None => {
                settings.pending_iteration = iteration + 1;
                continue;
            }
        }
    }
}

/// S3+S4 for a batch that never needed approval: execute, append in call
/// order, and resolve any `transfer_task` handoff. Returns `Some(outcome)`
/// only when a handoff target is invalid (config error); otherwise `None`
/// and the caller loops back to S0.
async fn execute_and_append_inline(
    ctx: &RunContext,
    agent: &Agent,
    calls: &[DispatchCall],
    decisions: &[Decision],
    invalid_argument_ids: &std::collections::HashSet<String>,
    messages: &mut Vec<Message>,
    settings: &mut SessionSettings,
) -> Option<LoopOutcome> {
    match execute_batch_with_handoff(ctx, agent, calls, decisions, invalid_argument_ids, messages, settings).await {
        Ok(()) => None,
        Err(outcome) => Some(outcome),
    }
}

/// Shared executor used by both the fresh-batch path and `resume()`.
async fn execute_and_append(
    ctx: &RunContext,
    agent: &Agent,
    calls: &[DispatchCall],
    decisions: &[Decision],
    invalid_argument_ids: &std::collections::HashSet<String>,
    messages: &mut Vec<Message>,
    settings: &mut SessionSettings,
) -> Result<(), LoopOutcome> {
    execute_batch_with_handoff(ctx, agent, calls, decisions, invalid_argument_ids, messages, settings).await
}

async fn execute_batch_with_handoff(
    ctx: &RunContext,
    agent: &Agent,
    calls: &[DispatchCall],
    decisions: &[Decision],
    invalid_argument_ids: &std::collections::HashSet<String>,
    messages: &mut Vec<Message>,
    settings: &mut SessionSettings,
) -> Result<(), LoopOutcome> {
    // transfer_task never reaches a backend: synthesize its result and
    // remember the handoff, executing every other call through the
    // dispatcher as usual.
    let mut handoff: Option<(String, String)> = None;
    let mut backend_calls = Vec::with_capacity(calls.len());
    let mut backend_decisions = Vec::with_capacity(calls.len());
    let mut results: Vec<Option<agc_tools::ToolOutput>> = vec![None; calls.len()];

    for (i, call) in calls.iter().enumerate() {
        if call.name == TRANSFER_TASK {
            let target = call.args.get("target").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let task = call.args.get("task").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            if ctx.team.get(&target).is_none() {
                results[i] = Some(agc_tools::ToolOutput::err(
                    &call.id,
                    format!("error: {}: transfer target '{target}' not found", error_kind::TOOL_ARGUMENTS_INVALID),
                ));
            } else {
                results[i] = Some(agc_tools::ToolOutput::ok(&call.id, format!("transferred to {target}")));
                handoff = Some((target, task));
            }
        } else {
            backend_calls.push(call.clone());
            backend_decisions.push(decisions[i].clone());
        }
    }

    let backend_outputs = ctx.dispatcher.execute_batch(&backend_calls, &backend_decisions, invalid_argument_ids).await;
    let mut backend_iter = backend_outputs.into_iter();
    for slot in results.iter_mut() {
        if slot.is_none() {
            *slot = backend_iter.next();
        }
    }

    for (call, out) in calls.iter().zip(results.into_iter()) {
        let out = out.unwrap_or_else(|| agc_tools::ToolOutput::err(&call.id, "error: tool_backend: no result produced"));
        if out.is_error {
            ctx.events.send(RuntimeEvent::ToolResult { call_id: out.call_id.clone(), content: out.content.clone(), is_error: true });
        } else {
            ctx.events.send(RuntimeEvent::ToolResult { call_id: out.call_id.clone(), content: out.content.clone(), is_error: false });
        }
        messages.push(Message::tool_result(out.call_id, out.content));
    }

    if let Some((target, task)) = handoff {
        ctx.events.send(RuntimeEvent::AgentHandoff { from_agent: agent.name.clone(), to_agent: target.clone(), task: task.clone() });
        messages.push(Message::user(task));
        settings.active_agent = Some(target);
    }

    Ok(())
}

fn build_request(agent: &Agent, messages: &[Message], ctx: &RunContext) -> CompletionRequest {
    let mut req_messages = Vec::with_capacity(messages.len() + 1);
    req_messages.push(Message::system(&agent.instruction));
    let start = if agent.num_history_items > 0 && messages.len() > agent.num_history_items as usize {
        messages.len() - agent.num_history_items as usize
    } else {
        0
    };
    req_messages.extend_from_slice(&messages[start..]);

    CompletionRequest {
        messages: req_messages,
        tools: ctx.tool_schemas(),
        stream: true,
        thinking_budget: None,
        cache_key: None,
    }
}

fn emit_chunk(events: &FanoutSender, agent_name: &str, chunk: &agc_model::Chunk) {
    match chunk {
        agc_model::Chunk::TextDelta(text) => {
            events.send(RuntimeEvent::Choice { agent_name: agent_name.to_string(), text: text.clone() })
        }
        agc_model::Chunk::ReasoningDelta(text) => {
            events.send(RuntimeEvent::ChoiceReasoning { agent_name: agent_name.to_string(), text: text.clone() })
        }
        agc_model::Chunk::ToolCallDelta { index, args_delta, .. } => {
            if let Some(delta) = args_delta {
                events.send(RuntimeEvent::PartialToolCall {
                    agent_name: agent_name.to_string(),
                    index: *index,
                    args_delta: delta.clone(),
                });
            }
        }
        agc_model::Chunk::Finish(_) | agc_model::Chunk::Usage(_) => {}
    }
}

fn provider_error_outcome(e: anyhow::Error) -> LoopOutcome {
    warn!(error = %e, "provider stream failed");
    LoopOutcome::Error { kind: error_kind::PROVIDER_FATAL.into(), detail: e.to_string() }
}
