use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a session is for: watching the desktop, watching a driven browser,
/// or replaying a learned workflow in a browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    ObserveDesktop,
    ObserveBrowser,
    ReplayBrowser,
}

impl SessionRole {
    /// Browser-backed roles hold a page handle for their whole active life.
    pub fn needs_browser(&self) -> bool {
        matches!(self, Self::ObserveBrowser | Self::ReplayBrowser)
    }
}

/// Session lifecycle. Transitions are monotonic: once a terminal state is
/// reached the session never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Active,
    Stopped,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Failed)
    }

    /// Whether moving to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        match self {
            Self::Starting => matches!(
                next,
                Self::Active | Self::Stopped | Self::Completed | Self::Failed
            ),
            Self::Active => matches!(next, Self::Stopped | Self::Completed | Self::Failed),
            // Terminal states never resurrect.
            Self::Stopped | Self::Completed | Self::Failed => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Caller-supplied metadata carried on a session and passed through
/// untouched to summaries and stream messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerContext {
    #[serde(default)]
    pub user_id: String,
    #[serde(default = "default_task_type")]
    pub task_type: String,
}

fn default_task_type() -> String {
    "general".to_string()
}

/// Closed vocabulary for the kinds the core understands, with an escape
/// hatch for observe-mode actions it only passes through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Type,
    Submit,
    Scroll,
    Navigate,
    Keystroke,
    Wait,
    Screenshot,
    Error,
    #[serde(untagged)]
    Other(String),
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Click => f.write_str("click"),
            Self::Type => f.write_str("type"),
            Self::Submit => f.write_str("submit"),
            Self::Scroll => f.write_str("scroll"),
            Self::Navigate => f.write_str("navigate"),
            Self::Keystroke => f.write_str("keystroke"),
            Self::Wait => f.write_str("wait"),
            Self::Screenshot => f.write_str("screenshot"),
            Self::Error => f.write_str("error"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// One timestamped, indexed record of user or agent activity.
///
/// `index` is assigned at append time under the session's state lock, so it
/// is contiguous from 0 no matter how many producer loops append.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub index: usize,
    pub kind: ActionKind,
    /// Raw event fields or step execution detail; the core never interprets
    /// this beyond the closed replay vocabulary.
    #[serde(default)]
    pub payload: Value,
    pub description: String,
    pub timestamp_ms: i64,
}

/// One captured frame. `step` is set only during replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screenshot {
    pub timestamp_ms: i64,
    pub image_b64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
}

/// Point-in-time view of a session, safe to hand to HTTP/WS clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub role: SessionRole,
    pub status: SessionStatus,
    pub owner: OwnerContext,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    pub action_count: usize,
    pub screenshot_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_never_resurrect() {
        for terminal in [
            SessionStatus::Stopped,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ] {
            for next in [
                SessionStatus::Starting,
                SessionStatus::Active,
                SessionStatus::Stopped,
                SessionStatus::Completed,
                SessionStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn starting_reaches_active_or_failed() {
        assert!(SessionStatus::Starting.can_transition_to(SessionStatus::Active));
        assert!(SessionStatus::Starting.can_transition_to(SessionStatus::Failed));
        assert!(!SessionStatus::Active.can_transition_to(SessionStatus::Starting));
    }

    #[test]
    fn action_kind_round_trips() {
        let a: ActionKind = serde_json::from_str("\"click\"").unwrap();
        assert_eq!(a, ActionKind::Click);
        let b: ActionKind = serde_json::from_str("\"switch_app\"").unwrap();
        assert_eq!(b, ActionKind::Other("switch_app".to_string()));
        assert_eq!(serde_json::to_string(&b).unwrap(), "\"switch_app\"");
    }
}
