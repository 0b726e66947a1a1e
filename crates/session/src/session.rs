//! The central session entity: one capture or replay run with its own
//! lifecycle, buffers, and (for browser roles) an exclusively owned page.

use chrono::{DateTime, Utc};
use mimic_browser::PageDriver;
use mimic_core::types::{
    Action, ActionKind, OwnerContext, Screenshot, SessionRole, SessionStatus, SessionSummary,
};
use mimic_core::{now_ms, ScreenshotRing};
use serde_json::Value;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Everything mutated by producer loops, behind one short-held lock.
/// Action indices are assigned under this lock, so appends from concurrent
/// loops never collide.
pub struct SessionState {
    pub status: SessionStatus,
    pub actions: Vec<Action>,
    pub screenshots: ScreenshotRing,
    pub ended_at: Option<DateTime<Utc>>,
    pub current_url: Option<String>,
    pub current_step: Option<usize>,
    pub total_steps: Option<usize>,
}

pub struct Session {
    pub id: String,
    pub role: SessionRole,
    pub owner: OwnerContext,
    pub started_at: DateTime<Utc>,
    state: StdMutex<SessionState>,
    /// The single serialized path to the page. Every page call holds this
    /// lock, and stop takes the driver out under it, so an in-flight loop
    /// iteration always finishes before the browser is closed.
    driver: Mutex<Option<Arc<dyn PageDriver>>>,
}

impl Session {
    pub fn new(role: SessionRole, owner: OwnerContext, buffer_capacity: Option<usize>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            owner,
            started_at: Utc::now(),
            state: StdMutex::new(SessionState {
                status: SessionStatus::Starting,
                actions: Vec::new(),
                screenshots: ScreenshotRing::new(buffer_capacity),
                ended_at: None,
                current_url: None,
                current_step: None,
                total_steps: None,
            }),
            driver: Mutex::new(None),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.state().status
    }

    /// Move to `next` if the transition is legal. Illegal transitions are
    /// logged and ignored; terminal states are sticky.
    pub fn transition(&self, next: SessionStatus) -> bool {
        let mut state = self.state();
        if !state.status.can_transition_to(next) {
            debug!(
                session = %self.id,
                from = %state.status,
                to = %next,
                "ignoring illegal status transition"
            );
            return false;
        }
        state.status = next;
        if next.is_terminal() {
            state.ended_at = Some(Utc::now());
        }
        true
    }

    /// Append one action, assigning the next contiguous index. Returns
    /// `None` without writing once the session has left `active`/`starting`.
    pub fn append_action(&self, kind: ActionKind, payload: Value, description: &str) -> Option<usize> {
        let mut state = self.state();
        if state.status.is_terminal() {
            return None;
        }
        let index = state.actions.len();
        state.actions.push(Action {
            index,
            kind,
            payload,
            description: description.to_string(),
            timestamp_ms: now_ms(),
        });
        Some(index)
    }

    /// Append one screenshot, subject to the ring's overflow trim. A no-op
    /// once the session is terminal.
    pub fn push_screenshot(&self, image_b64: String, step: Option<usize>) -> bool {
        let mut state = self.state();
        if state.status.is_terminal() {
            return false;
        }
        state.screenshots.push(Screenshot {
            timestamp_ms: now_ms(),
            image_b64,
            step,
        });
        true
    }

    pub fn set_current_url(&self, url: &str) {
        self.state().current_url = Some(url.to_string());
    }

    pub fn set_total_steps(&self, total: usize) {
        self.state().total_steps = Some(total);
    }

    pub fn set_current_step(&self, step: usize) {
        self.state().current_step = Some(step);
    }

    pub fn action_count(&self) -> usize {
        self.state().actions.len()
    }

    pub fn actions_snapshot(&self) -> Vec<Action> {
        self.state().actions.clone()
    }

    /// New actions from `from` onward, plus the current screenshot-buffer
    /// view, read atomically for the stream fan-out.
    pub fn delta_since(&self, from: usize) -> StateDelta {
        let state = self.state();
        StateDelta {
            new_actions: state.actions.get(from..).map(<[Action]>::to_vec).unwrap_or_default(),
            action_count: state.actions.len(),
            screenshot_count: state.screenshots.len(),
            latest_screenshot: state.screenshots.latest().cloned(),
            status: state.status,
            current_url: state.current_url.clone(),
            current_step: state.current_step,
            total_steps: state.total_steps,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let state = self.state();
        SessionSummary {
            id: self.id.clone(),
            role: self.role,
            status: state.status,
            owner: self.owner.clone(),
            started_at: self.started_at.to_rfc3339(),
            ended_at: state.ended_at.map(|t| t.to_rfc3339()),
            action_count: state.actions.len(),
            screenshot_count: state.screenshots.len(),
            current_url: state.current_url.clone(),
            current_step: state.current_step,
            total_steps: state.total_steps,
        }
    }

    pub async fn attach_driver(&self, driver: Arc<dyn PageDriver>) {
        *self.driver.lock().await = Some(driver);
    }

    /// Lock the page path. Loops hold the guard across their page calls.
    pub async fn driver_guard(&self) -> MutexGuard<'_, Option<Arc<dyn PageDriver>>> {
        self.driver.lock().await
    }

    /// Detach and close the driver if one is attached. Waits for any
    /// in-flight page call, then closes exactly once. Close failures are
    /// the driver's to log; this never fails.
    pub async fn release_driver(&self) {
        let taken = self.driver.lock().await.take();
        if let Some(driver) = taken {
            driver.close().await;
        } else if self.role.needs_browser() {
            warn!(session = %self.id, "release with no driver attached");
        }
    }
}

/// Atomic read of everything a stream subscriber needs for one tick.
pub struct StateDelta {
    pub new_actions: Vec<Action>,
    pub action_count: usize,
    pub screenshot_count: usize,
    pub latest_screenshot: Option<Screenshot>,
    pub status: SessionStatus,
    pub current_url: Option<String>,
    pub current_step: Option<usize>,
    pub total_steps: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observe_session() -> Arc<Session> {
        Arc::new(Session::new(
            SessionRole::ObserveBrowser,
            OwnerContext::default(),
            Some(60),
        ))
    }

    #[test]
    fn indices_are_contiguous_from_zero() {
        let session = observe_session();
        session.transition(SessionStatus::Active);
        for i in 0..20 {
            let idx = session
                .append_action(ActionKind::Click, json!({}), "click")
                .unwrap();
            assert_eq!(idx, i);
        }
        let actions = session.actions_snapshot();
        for (i, action) in actions.iter().enumerate() {
            assert_eq!(action.index, i);
        }
    }

    #[tokio::test]
    async fn indices_stay_contiguous_under_concurrent_appenders() {
        let session = observe_session();
        session.transition(SessionStatus::Active);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let s = session.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    s.append_action(ActionKind::Click, json!({}), "click");
                    tokio::task::yield_now().await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let actions = session.actions_snapshot();
        assert_eq!(actions.len(), 400);
        for (i, action) in actions.iter().enumerate() {
            assert_eq!(action.index, i, "gap or duplicate at position {}", i);
        }
    }

    #[test]
    fn terminal_sessions_reject_writes() {
        let session = observe_session();
        session.transition(SessionStatus::Active);
        session.transition(SessionStatus::Stopped);
        assert!(session.append_action(ActionKind::Click, json!({}), "late").is_none());
        assert!(!session.push_screenshot("img".to_string(), None));
        assert_eq!(session.action_count(), 0);
    }

    #[test]
    fn illegal_transitions_are_ignored() {
        let session = observe_session();
        session.transition(SessionStatus::Active);
        assert!(session.transition(SessionStatus::Stopped));
        assert!(!session.transition(SessionStatus::Active));
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert!(session.summary().ended_at.is_some());
    }
}
