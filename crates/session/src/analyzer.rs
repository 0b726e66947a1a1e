//! On-demand frame interpretation for desktop sessions.
//!
//! A desktop capture only sees pixels and raw input; `FrameAnalyzer` sends
//! the latest frame plus a summary of recent input actions to the
//! reasoning service and gets back one structured action describing what
//! the user just did. A failed call degrades to an `unknown` action
//! carrying the error, never an aborted session.

use mimic_core::types::{Action, ActionKind};
use mimic_reasoning::{extract_json_object, CompletionRequest, ReasoningClient};
use serde_json::{json, Value};
use std::sync::Arc;
use std::sync::Mutex;
use tracing::{info, warn};

const CONTEXT_KEEP: usize = 10;
const CONTEXT_MAX: usize = 20;

pub struct FrameAnalyzer {
    client: Arc<dyn ReasoningClient>,
    /// Rolling descriptions of recent detections, fed back as context.
    context: Mutex<Vec<String>>,
}

/// One interpreted frame, ready to append to the action log.
#[derive(Debug)]
pub struct DetectedAction {
    pub kind: ActionKind,
    pub payload: Value,
    pub description: String,
}

impl FrameAnalyzer {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self {
            client,
            context: Mutex::new(Vec::new()),
        }
    }

    /// Interpret one frame given the recent input-derived actions.
    pub async fn analyze_frame(&self, image_b64: &str, recent: &[Action]) -> DetectedAction {
        let prompt = format!(
            "You are analyzing a screenshot of a user's screen along with their recent input events.\n\
             Determine exactly what action the user just performed and why.\n\n\
             Recent input events:\n{}\n\n\
             Previous actions (context):\n{}\n\n\
             Respond with ONLY a JSON object:\n\
             {{\"action_type\": \"click|type|navigate|scroll|submit|read|switch_app|other\",\n\
              \"target\": \"UI element interacted with\",\n\
              \"value\": \"what was typed or selected, empty if n/a\",\n\
              \"application\": \"the application or website visible\",\n\
              \"description\": \"concise description of what the user did\",\n\
              \"intent\": \"inferred reason for this action\"}}",
            summarize_recent(recent),
            self.rolling_context(),
        );

        let result = self
            .client
            .complete(CompletionRequest {
                system: None,
                prompt,
                images: vec![image_b64.to_string()],
            })
            .await
            .and_then(|reply| extract_json_object(&reply));

        match result {
            Ok(parsed) => {
                let description = parsed
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unrecognized activity")
                    .to_string();
                let kind = parsed
                    .get("action_type")
                    .and_then(|v| v.as_str())
                    .map(|t| {
                        serde_json::from_value(Value::String(t.to_string()))
                            .unwrap_or_else(|_| ActionKind::Other(t.to_string()))
                    })
                    .unwrap_or_else(|| ActionKind::Other("unknown".to_string()));
                self.push_context(&description);
                info!(description = %description, "frame analyzed");
                DetectedAction {
                    kind,
                    payload: parsed,
                    description,
                }
            }
            Err(e) => {
                warn!(error = %e, "frame analysis failed");
                DetectedAction {
                    kind: ActionKind::Other("unknown".to_string()),
                    payload: json!({"error": e.to_string()}),
                    description: format!("Detection failed: {}", e),
                }
            }
        }
    }

    fn rolling_context(&self) -> String {
        let context = match self.context.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if context.is_empty() {
            "Session just started".to_string()
        } else {
            let from = context.len().saturating_sub(5);
            context[from..].join(" -> ")
        }
    }

    fn push_context(&self, description: &str) {
        let mut context = match self.context.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        context.push(description.to_string());
        if context.len() > CONTEXT_MAX {
            let from = context.len() - CONTEXT_KEEP;
            context.drain(..from);
        }
    }
}

/// Readable single-line-per-item summary of recent actions for the prompt.
fn summarize_recent(recent: &[Action]) -> String {
    if recent.is_empty() {
        return "No input events detected".to_string();
    }
    let from = recent.len().saturating_sub(8);
    recent[from..]
        .iter()
        .map(|a| format!("- [{}] {}", a.kind, a.description))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mimic_core::{now_ms, Result};

    struct CannedClient {
        reply: Result<String>,
    }

    #[async_trait]
    impl ReasoningClient for CannedClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<String> {
            match &self.reply {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(mimic_core::Error::Reasoning(e.to_string())),
            }
        }
    }

    fn action(kind: ActionKind, description: &str) -> Action {
        Action {
            index: 0,
            kind,
            payload: json!({}),
            description: description.to_string(),
            timestamp_ms: now_ms(),
        }
    }

    #[tokio::test]
    async fn parsed_reply_becomes_a_typed_action() {
        let analyzer = FrameAnalyzer::new(Arc::new(CannedClient {
            reply: Ok(r#"{"action_type": "click", "target": "Save button", "description": "Clicked Save"}"#.to_string()),
        }));
        let detected = analyzer.analyze_frame("img", &[]).await;
        assert_eq!(detected.kind, ActionKind::Click);
        assert_eq!(detected.description, "Clicked Save");
        assert_eq!(detected.payload["target"], "Save button");
    }

    #[tokio::test]
    async fn failed_call_degrades_to_unknown() {
        let analyzer = FrameAnalyzer::new(Arc::new(CannedClient {
            reply: Err(mimic_core::Error::Reasoning("offline".to_string())),
        }));
        let detected = analyzer
            .analyze_frame("img", &[action(ActionKind::Click, "Clicked left button")])
            .await;
        assert_eq!(detected.kind, ActionKind::Other("unknown".to_string()));
        assert!(detected.description.contains("offline"));
        assert!(detected.payload["error"].is_string());
    }

    #[tokio::test]
    async fn context_rolls_between_frames() {
        let analyzer = FrameAnalyzer::new(Arc::new(CannedClient {
            reply: Ok(r#"{"action_type": "other", "description": "Did a thing"}"#.to_string()),
        }));
        analyzer.analyze_frame("img", &[]).await;
        assert_eq!(analyzer.rolling_context(), "Did a thing");
    }

    #[test]
    fn summary_keeps_the_newest_entries() {
        let actions: Vec<Action> = (0..12)
            .map(|i| action(ActionKind::Click, &format!("click {}", i)))
            .collect();
        let summary = summarize_recent(&actions);
        assert!(summary.contains("click 11"));
        assert!(!summary.contains("click 3\n"));
    }
}
