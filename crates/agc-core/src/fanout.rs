//! Event Fan-out (§4.8): a single writer (the Runtime) feeds one unbounded
//! internal channel; a background task throttles high-frequency deltas
//! into a 50ms window, merges consecutive same-kind same-agent deltas by
//! concatenation, and delivers to N subscribers with bounded mailboxes.
//! Slow subscribers lose events on overflow rather than blocking the loop.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::events::RuntimeEvent;

const THROTTLE_WINDOW: Duration = Duration::from_millis(50);
const SUBSCRIBER_MAILBOX: usize = 256;

/// Handle held by the Runtime to publish events. Cloning is cheap; only
/// the Runtime itself should ever hold a sender — it's the sole writer.
#[derive(Clone)]
pub struct FanoutSender {
    tx: mpsc::UnboundedSender<RuntimeEvent>,
}

impl FanoutSender {
    /// Never blocks: the internal channel is unbounded, so a slow fan-out
    /// task never backpressures the conversation loop.
    pub fn send(&self, event: RuntimeEvent) {
        let _ = self.tx.send(event);
    }
}

/// Owns the throttling task and hands out subscriptions. Dropping this
/// drops the internal sender, which lets the background task exit once
/// drained.
pub struct Fanout {
    publish: broadcast::Sender<RuntimeEvent>,
}

impl Fanout {
    /// Spawn the throttling task and return (sender, fanout-handle).
    pub fn spawn() -> (FanoutSender, Self) {
        let (tx, mut rx) = mpsc::unbounded_channel::<RuntimeEvent>();
        let (publish, _) = broadcast::channel(SUBSCRIBER_MAILBOX);
        let publish_task = publish.clone();

        tokio::spawn(async move {
            let mut pending: Option<RuntimeEvent> = None;
            let mut window = tokio::time::interval(THROTTLE_WINDOW);
            window.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    event = rx.recv() => {
                        match event {
                            Some(ev) => {
                                pending = Some(match pending.take() {
                                    Some(prev) => merge_or_flush(&publish_task, prev, ev),
                                    None => ev,
                                });
                            }
                            None => {
                                if let Some(ev) = pending.take() {
                                    let _ = publish_task.send(ev);
                                }
                                return;
                            }
                        }
                    }
                    _ = window.tick() => {
                        if let Some(ev) = pending.take() {
                            let _ = publish_task.send(ev);
                        }
                    }
                }
            }
        });

        (FanoutSender { tx }, Self { publish })
    }

    /// Subscribe a new reader. Each subscriber has its own bounded
    /// mailbox (via `tokio::sync::broadcast`'s lagging semantics): if it
    /// falls behind by more than the mailbox capacity it receives
    /// `RecvError::Lagged` and loses the oldest events rather than
    /// stalling the publisher.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.publish.subscribe()
    }
}

/// If `next` is mergeable with `prev` (same delta kind, same agent),
/// concatenate and keep buffering; otherwise flush `prev` and start
/// buffering `next`.
fn merge_or_flush(
    publish: &broadcast::Sender<RuntimeEvent>,
    prev: RuntimeEvent,
    next: RuntimeEvent,
) -> RuntimeEvent {
    match try_merge(&prev, &next) {
        Some(merged) => merged,
        None => {
            let _ = publish.send(prev);
            next
        }
    }
}

/// Merge two consecutive delta events of the same kind and agent by
/// string concatenation. Non-delta events (tool_call, done, ...) are
/// never merged — they flush immediately.
fn try_merge(a: &RuntimeEvent, b: &RuntimeEvent) -> Option<RuntimeEvent> {
    match (a, b) {
        (RuntimeEvent::Choice { agent_name: a1, text: t1 }, RuntimeEvent::Choice { agent_name: a2, text: t2 })
            if a1 == a2 =>
        {
            Some(RuntimeEvent::Choice { agent_name: a1.clone(), text: format!("{t1}{t2}") })
        }
        (
            RuntimeEvent::ChoiceReasoning { agent_name: a1, text: t1 },
            RuntimeEvent::ChoiceReasoning { agent_name: a2, text: t2 },
        ) if a1 == a2 => {
            Some(RuntimeEvent::ChoiceReasoning { agent_name: a1.clone(), text: format!("{t1}{t2}") })
        }
        (
            RuntimeEvent::PartialToolCall { agent_name: a1, index: i1, args_delta: d1 },
            RuntimeEvent::PartialToolCall { agent_name: a2, index: i2, args_delta: d2 },
        ) if a1 == a2 && i1 == i2 => Some(RuntimeEvent::PartialToolCall {
            agent_name: a1.clone(),
            index: *i1,
            args_delta: format!("{d1}{d2}"),
        }),
        _ => None,
    }
}

/// Count of subscribers that have dropped events due to a full mailbox.
/// Exposed so a caller (e.g. a TUI) can surface "you missed some output"
/// without the fan-out itself needing to know about UI concerns.
pub fn overflow_count(receiver_result: Result<RuntimeEvent, broadcast::error::RecvError>) -> Option<u64> {
    match receiver_result {
        Err(broadcast::error::RecvError::Lagged(n)) => {
            warn!(dropped = n, "fan-out subscriber lagged and lost events");
            Some(n)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let (tx, fanout) = Fanout::spawn();
        let mut rx = fanout.subscribe();
        tx.send(RuntimeEvent::Done { reason: crate::events::DoneReason::Completed });
        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev, RuntimeEvent::Done { .. }));
    }

    #[tokio::test]
    async fn consecutive_text_deltas_merge_by_concatenation() {
        let (tx, fanout) = Fanout::spawn();
        let mut rx = fanout.subscribe();
        tx.send(RuntimeEvent::Choice { agent_name: "root".into(), text: "hel".into() });
        tx.send(RuntimeEvent::Choice { agent_name: "root".into(), text: "lo".into() });
        tx.send(RuntimeEvent::Done { reason: crate::events::DoneReason::Completed });

        let first = rx.recv().await.unwrap();
        match first {
            RuntimeEvent::Choice { text, .. } => assert_eq!(text, "hello"),
            other => panic!("expected merged choice, got {other:?}"),
        }
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, RuntimeEvent::Done { .. }));
    }

    #[tokio::test]
    async fn deltas_from_different_agents_do_not_merge() {
        let (tx, fanout) = Fanout::spawn();
        let mut rx = fanout.subscribe();
        tx.send(RuntimeEvent::Choice { agent_name: "root".into(), text: "a".into() });
        tx.send(RuntimeEvent::Choice { agent_name: "web".into(), text: "b".into() });
        tx.send(RuntimeEvent::Done { reason: crate::events::DoneReason::Completed });

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, RuntimeEvent::Choice { ref agent_name, ref text } if agent_name == "root" && text == "a"));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, RuntimeEvent::Choice { ref agent_name, ref text } if agent_name == "web" && text == "b"));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_events() {
        let (tx, fanout) = Fanout::spawn();
        let mut rx1 = fanout.subscribe();
        let mut rx2 = fanout.subscribe();
        tx.send(RuntimeEvent::Done { reason: crate::events::DoneReason::Completed });
        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }

    #[test]
    fn overflow_count_extracts_lag_amount() {
        assert_eq!(overflow_count(Err(broadcast::error::RecvError::Lagged(5))), Some(5));
        assert_eq!(overflow_count(Err(broadcast::error::RecvError::Closed)), None);
    }
}
