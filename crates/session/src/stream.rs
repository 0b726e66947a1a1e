//! Cursor-based fan-out of session buffers to any number of subscribers.
//!
//! Transport-free: the gateway owns the WebSocket, this module owns the
//! per-subscriber cursor and the outbound message sequence. Each drain
//! emits every not-yet-sent action in log order, at most the single newest
//! screenshot, a status heartbeat, and exactly one final message when the
//! session reaches a terminal state.

use mimic_core::types::{Action, OwnerContext, SessionRole, SessionStatus};
use serde::Serialize;

use crate::session::Session;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Connected {
        session_id: String,
        role: SessionRole,
        status: SessionStatus,
        owner: OwnerContext,
    },
    Action {
        action: Action,
    },
    Screenshot {
        image: String,
        timestamp_ms: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<usize>,
    },
    Status {
        status: SessionStatus,
        action_count: usize,
        screenshot_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_step: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_steps: Option<usize>,
    },
    Stopped {
        total_actions: usize,
    },
    Completed {
        total_actions: usize,
    },
}

/// One subscriber's read position. Fresh cursors start at zero, so a late
/// subscriber's first drain delivers the whole action backlog and the
/// latest frame.
#[derive(Debug, Default)]
pub struct StreamCursor {
    actions_sent: usize,
    shots_seen: usize,
    finished: bool,
}

impl StreamCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the final stopped/completed message has been emitted. The
    /// transport should close after this turns true.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn connect(&mut self, session: &Session) -> StreamMessage {
        StreamMessage::Connected {
            session_id: session.id.clone(),
            role: session.role,
            status: session.status(),
            owner: session.owner.clone(),
        }
    }

    /// One tick: everything new since the last drain, in order, plus a
    /// heartbeat. Safe to call on an unchanged session; emits no action or
    /// screenshot twice.
    pub fn drain(&mut self, session: &Session) -> Vec<StreamMessage> {
        if self.finished {
            return Vec::new();
        }
        let delta = session.delta_since(self.actions_sent);
        let mut out = Vec::new();

        for action in delta.new_actions {
            out.push(StreamMessage::Action { action });
        }
        self.actions_sent = delta.action_count;

        // A trim shrinks the buffer under the cursor; clamp down rather
        // than waiting for the length to climb back past a stale count,
        // which would skip frames. Trims only happen inside a push, so the
        // newest frame after one is always unsent: land the cursor one
        // below the count so the comparison below still emits it.
        if self.shots_seen > delta.screenshot_count {
            self.shots_seen = delta.screenshot_count.saturating_sub(1);
        }
        if delta.screenshot_count > self.shots_seen {
            if let Some(shot) = delta.latest_screenshot {
                out.push(StreamMessage::Screenshot {
                    image: shot.image_b64,
                    timestamp_ms: shot.timestamp_ms,
                    step: shot.step,
                });
            }
            self.shots_seen = delta.screenshot_count;
        }

        out.push(StreamMessage::Status {
            status: delta.status,
            action_count: delta.action_count,
            screenshot_count: delta.screenshot_count,
            current_url: delta.current_url,
            current_step: delta.current_step,
            total_steps: delta.total_steps,
        });

        if delta.status.is_terminal() {
            self.finished = true;
            out.push(match delta.status {
                SessionStatus::Completed => StreamMessage::Completed {
                    total_actions: delta.action_count,
                },
                _ => StreamMessage::Stopped {
                    total_actions: delta.action_count,
                },
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_core::types::ActionKind;
    use serde_json::json;
    use std::sync::Arc;

    fn session_with(actions: usize, shots: usize) -> Arc<Session> {
        let session = Arc::new(Session::new(
            SessionRole::ObserveBrowser,
            OwnerContext::default(),
            Some(4),
        ));
        session.transition(SessionStatus::Active);
        for i in 0..actions {
            session.append_action(ActionKind::Click, json!({}), &format!("action {}", i));
        }
        for i in 0..shots {
            session.push_screenshot(format!("frame{}", i), None);
        }
        session
    }

    fn action_count(messages: &[StreamMessage]) -> usize {
        messages
            .iter()
            .filter(|m| matches!(m, StreamMessage::Action { .. }))
            .count()
    }

    fn screenshot_count(messages: &[StreamMessage]) -> usize {
        messages
            .iter()
            .filter(|m| matches!(m, StreamMessage::Screenshot { .. }))
            .count()
    }

    fn latest_image(messages: &[StreamMessage]) -> Option<&str> {
        messages.iter().find_map(|m| match m {
            StreamMessage::Screenshot { image, .. } => Some(image.as_str()),
            _ => None,
        })
    }

    #[test]
    fn late_subscriber_gets_backlog_then_only_new_items() {
        let session = session_with(5, 2);
        let mut cursor = StreamCursor::new();

        let first = cursor.drain(&session);
        assert_eq!(action_count(&first), 5);
        assert_eq!(screenshot_count(&first), 1);

        // Nothing changed: only the heartbeat.
        let second = cursor.drain(&session);
        assert_eq!(action_count(&second), 0);
        assert_eq!(screenshot_count(&second), 0);
        assert!(matches!(second[0], StreamMessage::Status { .. }));

        session.append_action(ActionKind::Scroll, json!({}), "new one");
        let third = cursor.drain(&session);
        assert_eq!(action_count(&third), 1);
    }

    #[test]
    fn actions_arrive_in_log_order() {
        let session = session_with(3, 0);
        let mut cursor = StreamCursor::new();
        let messages = cursor.drain(&session);
        let descriptions: Vec<&str> = messages
            .iter()
            .filter_map(|m| match m {
                StreamMessage::Action { action } => Some(action.description.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(descriptions, vec!["action 0", "action 1", "action 2"]);
    }

    #[test]
    fn buffer_trim_never_resends_or_skips() {
        let session = session_with(0, 4);
        let mut cursor = StreamCursor::new();
        let first = cursor.drain(&session);
        assert_eq!(screenshot_count(&first), 1);

        // Overflow: the 5th push trims the ring (cap 4) down to 2 entries,
        // below the cursor's count of 4. The frame that triggered the trim
        // was never sent and must still come through.
        session.push_screenshot("frame4".to_string(), None);
        let after_trim = cursor.drain(&session);
        assert_eq!(screenshot_count(&after_trim), 1);
        assert_eq!(latest_image(&after_trim), Some("frame4"));

        // Settled again: nothing to resend.
        let settled = cursor.drain(&session);
        assert_eq!(screenshot_count(&settled), 0);

        // The next push must surface its frame despite the earlier trim.
        session.push_screenshot("frame5".to_string(), None);
        let next = cursor.drain(&session);
        assert_eq!(screenshot_count(&next), 1);
        assert_eq!(latest_image(&next), Some("frame5"));
    }

    #[test]
    fn terminal_status_emits_exactly_one_final_message() {
        let session = session_with(2, 0);
        let mut cursor = StreamCursor::new();
        cursor.drain(&session);

        session.transition(SessionStatus::Completed);
        let final_batch = cursor.drain(&session);
        assert!(matches!(
            final_batch.last(),
            Some(StreamMessage::Completed { total_actions: 2 })
        ));
        assert!(cursor.is_finished());
        assert!(cursor.drain(&session).is_empty());
    }

    #[test]
    fn stopped_session_emits_stopped_not_completed() {
        let session = session_with(1, 0);
        let mut cursor = StreamCursor::new();
        session.transition(SessionStatus::Stopped);
        let batch = cursor.drain(&session);
        assert!(matches!(
            batch.last(),
            Some(StreamMessage::Stopped { total_actions: 1 })
        ));
    }

    #[test]
    fn messages_serialize_with_type_tag() {
        let message = StreamMessage::Stopped { total_actions: 7 };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "stopped");
        assert_eq!(value["total_actions"], 7);
    }
}
