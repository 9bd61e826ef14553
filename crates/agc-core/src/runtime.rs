//! The `Runtime`: public entry point wiring together the Team, provider
//! bindings, tool registry, dispatcher, session store, and event fan-out
//! (§4.1's public contract). One `Runtime` instance serves every session;
//! per-session state is hydrated from the store on each call and a single
//! `tokio::sync::Mutex` per session id serializes drivers (§5: "exactly
//! one task owns the session state").

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use agc_model::{ContentPart, Message, ModelProvider, Role};
use agc_session::{MessageRecord, Session, SessionStore, SessionUpdate};
use agc_tools::ToolRegistry;
use chrono::Utc;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

use crate::conversation::{self, LoopOutcome, ResumeAction, RunContext};
use crate::dispatcher::Dispatcher;
use crate::events::{error_kind, RuntimeEvent};
use crate::fanout::Fanout;
use crate::types::{SessionSettings, Team};

/// Model binding used for title generation when no entry named `"title"`
/// exists in the configured model map — the lightest available provider
/// is used instead so generation never blocks on an unconfigured key.
const TITLE_MODEL_KEY: &str = "title";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("invalid cursor: {0}")]
    CursorInvalid(String),
    #[error("title generation already in progress for this session")]
    TitleGenerating,
    #[error(transparent)]
    Store(agc_session::StoreError),
}

impl RuntimeError {
    /// The stable, §7-taxonomy kind string for this error, used wherever a
    /// `RuntimeError` needs to surface as a `RuntimeEvent::Error` or a
    /// JSON-RPC `error.code`-equivalent rather than just a `Display` string.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::SessionNotFound(_) => error_kind::SESSION_NOT_FOUND,
            RuntimeError::CursorInvalid(_) => error_kind::CURSOR_INVALID,
            RuntimeError::TitleGenerating => error_kind::TITLE_GENERATING,
            // Sqlite/background-task failures aren't in §7's taxonomy (they
            // never reach a model or a tool) — a distinct literal rather
            // than overloading an unrelated taxonomy entry.
            RuntimeError::Store(_) => "store_error",
        }
    }
}

/// Store-layer errors that map onto a more specific `RuntimeError` variant
/// are pulled out by name; everything else keeps its generic `Store(..)`
/// wrapper.
impl From<agc_session::StoreError> for RuntimeError {
    fn from(e: agc_session::StoreError) -> Self {
        match e {
            agc_session::StoreError::NotFound(id) => RuntimeError::SessionNotFound(id),
            agc_session::StoreError::CursorInvalid(c) => RuntimeError::CursorInvalid(c),
            other => RuntimeError::Store(other),
        }
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = RuntimeEvent> + Send>>;

pub struct Runtime {
    team: Arc<Team>,
    models: HashMap<String, Arc<dyn ModelProvider>>,
    tools: Arc<ToolRegistry>,
    dispatcher: Dispatcher,
    store: Arc<SessionStore>,
    title_inflight: Mutex<HashSet<String>>,
    cancels: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

impl Runtime {
    pub fn new(
        team: Arc<Team>,
        models: HashMap<String, Arc<dyn ModelProvider>>,
        tools: Arc<ToolRegistry>,
        store: Arc<SessionStore>,
    ) -> Self {
        Self {
            team,
            models,
            dispatcher: Dispatcher::new(tools.clone()),
            tools,
            store,
            title_inflight: Mutex::new(HashSet::new()),
            cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Register the canonical permission identifier for a dispatch-name
    /// that doesn't equal it (MCP/A2A synthesized tools).
    pub fn register_tool_id(&mut self, dispatch_name: impl Into<String>, canonical_id: impl Into<String>) {
        self.dispatcher.register_tool_id(dispatch_name, canonical_id);
    }

    pub fn with_tool_timeout_secs(mut self, secs: u64) -> Self {
        self.dispatcher = self.dispatcher.with_timeout_secs(secs);
        self
    }

    pub async fn create_session(&self) -> Result<String, RuntimeError> {
        let id = Uuid::new_v4().to_string();
        let settings = SessionSettings { active_agent: Some(self.team.root_agent.clone()), ..Default::default() };
        self.store
            .create(Session { id: id.clone(), title: None, created_at: Utc::now(), config_json: serde_json::to_value(&settings).unwrap_or_default() })
            .await?;
        Ok(id)
    }

    /// Drive a fresh user turn to completion or suspension. The returned
    /// stream yields every event in order, ending with exactly one
    /// `Done`/`Error`.
    pub async fn run(&self, session_id: &str, user_input: &str) -> Result<EventStream, RuntimeError> {
        let (mut messages, mut settings, title) = self.hydrate(session_id).await?;
        let before_len = messages.len();

        let (events_tx, fanout) = Fanout::spawn();
        let ctx = self.context(events_tx.clone());
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.register_cancel(session_id, cancel_tx);

        let outcome = tokio::select! {
            outcome = conversation::run(&ctx, &mut messages, &mut settings, user_input) => outcome,
            _ = &mut cancel_rx => {
                events_tx.send(RuntimeEvent::Error { kind: error_kind::CANCELLED.into(), detail: "cancelled by caller".into() });
                self.persist(session_id, &messages[before_len..], &settings).await?;
                self.clear_cancel(session_id);
                return Ok(Box::pin(fanout_into_stream(fanout)));
            }
        };
        self.clear_cancel(session_id);

        self.persist(session_id, &messages[before_len..], &settings).await?;
        self.finish_turn(session_id, &messages, title, outcome, &events_tx).await;

        Ok(Box::pin(fanout_into_stream(fanout)))
    }

    /// Re-enter a session parked in `awaiting_tool_approval`.
    pub async fn resume(&self, session_id: &str, action: ResumeAction) -> Result<EventStream, RuntimeError> {
        let (mut messages, mut settings, title) = self.hydrate(session_id).await?;
        let before_len = messages.len();

        let (events_tx, fanout) = Fanout::spawn();
        let ctx = self.context(events_tx.clone());
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.register_cancel(session_id, cancel_tx);

        let outcome = tokio::select! {
            outcome = conversation::resume(&ctx, &mut messages, &mut settings, action) => outcome,
            _ = &mut cancel_rx => {
                events_tx.send(RuntimeEvent::Error { kind: error_kind::CANCELLED.into(), detail: "cancelled by caller".into() });
                self.persist(session_id, &messages[before_len..], &settings).await?;
                self.clear_cancel(session_id);
                return Ok(Box::pin(fanout_into_stream(fanout)));
            }
        };
        self.clear_cancel(session_id);

        self.persist(session_id, &messages[before_len..], &settings).await?;
        self.finish_turn(session_id, &messages, title, outcome, &events_tx).await;

        Ok(Box::pin(fanout_into_stream(fanout)))
    }

    /// Cooperative cancellation: signal the in-flight driver, if any, for
    /// this session. A no-op if nothing is running.
    pub fn cancel(&self, session_id: &str) {
        if let Some(tx) = self.cancels.lock().unwrap().remove(session_id) {
            let _ = tx.send(());
        }
    }

    /// Explicit title write. Fails with `TitleGenerating` while a detached
    /// generation is in flight for this session (§4.1).
    pub async fn set_title(&self, session_id: &str, title: &str) -> Result<(), RuntimeError> {
        if self.title_inflight.lock().unwrap().contains(session_id) {
            return Err(RuntimeError::TitleGenerating);
        }
        self.store.update(session_id, SessionUpdate { title: Some(title.to_string()), config_json: None }).await?;
        Ok(())
    }

    pub async fn page_messages(
        &self,
        session_id: &str,
        before_cursor: Option<String>,
        limit: Option<u32>,
    ) -> Result<(Vec<MessageRecord>, agc_session::PageMetadata), RuntimeError> {
        Ok(self.store.page_messages(session_id, before_cursor, limit).await?)
    }

    fn context(&self, events: crate::fanout::FanoutSender) -> RunContext {
        RunContext {
            team: self.team.clone(),
            models: self.models.clone(),
            tools: self.tools.clone(),
            dispatcher: self.dispatcher.clone(),
            events,
        }
    }

    fn register_cancel(&self, session_id: &str, tx: oneshot::Sender<()>) {
        self.cancels.lock().unwrap().insert(session_id.to_string(), tx);
    }

    fn clear_cancel(&self, session_id: &str) {
        self.cancels.lock().unwrap().remove(session_id);
    }

    async fn hydrate(&self, session_id: &str) -> Result<(Vec<Message>, SessionSettings, Option<String>), RuntimeError> {
        let session = self.store.get(session_id).await?;
        let settings: SessionSettings = serde_json::from_value(session.config_json).unwrap_or_default();

        let mut messages = Vec::new();
        let mut before_cursor = None;
        loop {
            let (page, meta) = self.store.page_messages(session_id, before_cursor.clone(), Some(200)).await?;
            if page.is_empty() {
                break;
            }
            let mut batch: Vec<Message> = page.into_iter().map(record_to_message).collect();
            messages.splice(0..0, batch.drain(..));
            match meta.prev_cursor {
                Some(cursor) => before_cursor = Some(cursor),
                None => break,
            }
        }

        Ok((messages, settings, session.title))
    }

    async fn persist(&self, session_id: &str, new_messages: &[Message], settings: &SessionSettings) -> Result<(), RuntimeError> {
        for message in new_messages {
            self.store.append_message(session_id, message_to_record(session_id, message)).await?;
        }
        self.store
            .update(session_id, SessionUpdate { title: None, config_json: Some(serde_json::to_value(settings).unwrap_or_default()) })
            .await?;
        Ok(())
    }

    async fn finish_turn(
        &self,
        session_id: &str,
        messages: &[Message],
        title: Option<String>,
        outcome: LoopOutcome,
        events: &crate::fanout::FanoutSender,
    ) {
        if title.is_none() {
            self.maybe_generate_title(session_id, messages, events).await;
        }

        match outcome {
            LoopOutcome::Done(reason) => events.send(RuntimeEvent::Done { reason }),
            LoopOutcome::AwaitingToolApproval => {
                // The suspend event itself was already emitted inside
                // `conversation::drive`; nothing further to send here.
            }
            LoopOutcome::Error { kind, detail } => events.send(RuntimeEvent::Error { kind, detail }),
        }
    }

    async fn maybe_generate_title(&self, session_id: &str, messages: &[Message], events: &crate::fanout::FanoutSender) {
        if !messages.iter().any(|m| m.role == Role::Assistant) {
            return;
        }
        {
            let mut guard = self.title_inflight.lock().unwrap();
            if guard.contains(session_id) {
                return;
            }
            guard.insert(session_id.to_string());
        }

        let provider = self.models.get(TITLE_MODEL_KEY).or_else(|| self.models.values().next()).cloned();
        let title = match provider {
            Some(provider) => generate_title(provider.as_ref(), messages).await,
            None => {
                warn!("no model configured for title generation; skipping");
                None
            }
        };

        self.title_inflight.lock().unwrap().remove(session_id);

        if let Some(title) = title {
            if self
                .store
                .update(session_id, SessionUpdate { title: Some(title.clone()), config_json: None })
                .await
                .is_ok()
            {
                events.send(RuntimeEvent::SessionTitle { title });
            }
        }
    }
}

async fn generate_title(provider: &dyn ModelProvider, messages: &[Message]) -> Option<String> {
    let first_user = messages.iter().find(|m| m.role == Role::User)?.as_text().to_string();
    let req = agc_model::CompletionRequest {
        messages: vec![
            Message::system("Generate a short (<=6 word) title for this conversation. Reply with the title only."),
            Message::user(first_user),
        ],
        tools: Vec::new(),
        stream: true,
        thinking_budget: None,
        cache_key: None,
    };
    let mut stream = provider.stream(req).await.ok()?;
    let mut title = String::new();
    while let Some(item) = stream.next().await {
        if let Ok(agc_model::Chunk::TextDelta(delta)) = item {
            title.push_str(&delta);
        }
    }
    let title = title.trim().trim_matches('"').to_string();
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

fn fanout_into_stream(fanout: Fanout) -> impl Stream<Item = RuntimeEvent> {
    let rx = fanout.subscribe();
    // Keep `fanout` alive for the duration of the stream so the broadcast
    // sender isn't dropped mid-run; the throttling task exits on its own
    // once the internal channel drains.
    let _keepalive = fanout;
    tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(move |item| {
        let _ = &_keepalive;
        async move {
            match item {
                Ok(event) => Some(event),
                Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
                    warn!(dropped = n, "event stream subscriber lagged");
                    None
                }
            }
        }
    })
}

fn message_to_record(session_id: &str, message: &Message) -> MessageRecord {
    MessageRecord {
        session_id: session_id.to_string(),
        seq: 0,
        created_at: Utc::now(),
        role: agc_model::normalize::role_str(message.role).to_string(),
        content: message.content.clone(),
        multipart_json: if message.parts.is_empty() { None } else { serde_json::to_value(&message.parts).ok() },
        tool_calls_json: if message.tool_calls.is_empty() { None } else { serde_json::to_value(&message.tool_calls).ok() },
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn record_to_message(record: MessageRecord) -> Message {
    Message {
        role: parse_role(&record.role),
        content: record.content,
        parts: record
            .multipart_json
            .and_then(|v| serde_json::from_value::<Vec<ContentPart>>(v).ok())
            .unwrap_or_default(),
        tool_calls: record
            .tool_calls_json
            .and_then(|v| serde_json::from_value::<Vec<agc_model::ToolCall>>(v).ok())
            .unwrap_or_default(),
        tool_call_id: record.tool_call_id,
        reasoning: None,
        agent_name: None,
    }
}

fn parse_role(s: &str) -> Role {
    match s {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agc_model::mock::MockProvider;
    use crate::types::Agent;

    async fn build_runtime() -> (Runtime, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SessionStore::open(dir.path().join("s.db")).await.unwrap());

        let agent = Agent {
            name: "root".into(),
            instruction: "be helpful".into(),
            model_ref: "mock".into(),
            toolset_refs: vec![],
            sub_agent_names: vec![],
            handoff_names: vec![],
            commands_map: HashMap::new(),
            welcome_message: None,
            structured_output_schema: None,
            max_iterations: 5,
            num_history_items: 0,
        };
        let mut agents = HashMap::new();
        agents.insert("root".to_string(), agent);
        let team = Arc::new(Team::new("root", agents));

        let mut models: HashMap<String, Arc<dyn ModelProvider>> = HashMap::new();
        models.insert("mock".into(), Arc::new(MockProvider));

        let tools = Arc::new(ToolRegistry::new());
        (Runtime::new(team, models, tools, store), dir)
    }

    #[tokio::test]
    async fn run_persists_user_and_assistant_messages() {
        let (runtime, _dir) = build_runtime().await;
        let session_id = runtime.create_session().await.unwrap();

        let mut events = runtime.run(&session_id, "hello").await.unwrap();
        let mut saw_done = false;
        while let Some(ev) = events.next().await {
            if matches!(ev, RuntimeEvent::Done { .. }) {
                saw_done = true;
            }
        }
        assert!(saw_done);

        let (page, _meta) = runtime.page_messages(&session_id, None, None).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].role, "user");
        assert_eq!(page[1].role, "assistant");
    }

    #[tokio::test]
    async fn run_on_missing_session_errors() {
        let (runtime, _dir) = build_runtime().await;
        let err = match runtime.run("ghost", "hi").await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(matches!(err, RuntimeError::SessionNotFound(_)));
        assert_eq!(err.kind(), error_kind::SESSION_NOT_FOUND);
    }

    #[tokio::test]
    async fn page_messages_on_malformed_cursor_surfaces_cursor_invalid_kind() {
        let (runtime, _dir) = build_runtime().await;
        let session_id = runtime.create_session().await.unwrap();
        let err = runtime.page_messages(&session_id, Some("not-a-number".into()), None).await.unwrap_err();
        assert!(matches!(err, RuntimeError::CursorInvalid(_)));
        assert_eq!(err.kind(), error_kind::CURSOR_INVALID);
    }

    #[tokio::test]
    async fn cancel_without_active_run_is_a_no_op() {
        let (runtime, _dir) = build_runtime().await;
        runtime.cancel("nonexistent");
    }

    #[tokio::test]
    async fn generates_title_after_first_assistant_message() {
        let (runtime, _dir) = build_runtime().await;
        let session_id = runtime.create_session().await.unwrap();
        let mut events = runtime.run(&session_id, "hello").await.unwrap();
        let mut saw_title = false;
        while let Some(ev) = events.next().await {
            if matches!(ev, RuntimeEvent::SessionTitle { .. }) {
                saw_title = true;
            }
        }
        assert!(saw_title);
        let session = runtime.store.get(&session_id).await.unwrap();
        assert!(session.title.is_some());
    }
}
