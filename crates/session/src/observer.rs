//! Distilling a finished observe session into a replayable workflow.

use mimic_core::{Error, Result};
use mimic_reasoning::{extract_json_object, sanitize_json_text, CompletionRequest, ReasoningClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::session::Session;

/// A learned workflow: the declarative step sequence a replay session
/// executes later.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub workflow_name: String,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub workflow_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub name: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub actions: Vec<String>,
}

const DISTILL_SYSTEM: &str = "You analyze a recorded log of user actions and distill it into a \
reusable workflow. Respond with a single JSON object and nothing else, shaped as: \
{\"workflowName\": string, \"steps\": [{\"name\": string, \"context\": string, \
\"reasoning\": string, \"actions\": [string]}], \"workflowPattern\": string}. \
Group related low-level actions into meaningful steps. workflowPattern is a one-line \
summary of the overall pattern.";

/// Ask the reasoning service to turn the session's action log into a
/// `Workflow`. The log is serialized and control-char sanitized before it
/// is embedded in the prompt.
pub async fn distill_workflow(
    client: &Arc<dyn ReasoningClient>,
    session: &Session,
) -> Result<Workflow> {
    let actions = session.actions_snapshot();
    if actions.is_empty() {
        return Err(Error::Session(format!(
            "session {} has no recorded actions to distill",
            session.id
        )));
    }

    let log_json = serde_json::to_string_pretty(&actions)?;
    let prompt = format!(
        "Recorded action log ({} actions):\n{}",
        actions.len(),
        sanitize_json_text(&log_json)
    );

    let reply = client
        .complete(CompletionRequest {
            system: Some(DISTILL_SYSTEM.to_string()),
            prompt,
            images: Vec::new(),
        })
        .await?;

    let value = extract_json_object(&reply)?;
    let workflow: Workflow = serde_json::from_value(value)
        .map_err(|e| Error::JsonExtract(format!("workflow shape mismatch: {}", e)))?;

    info!(
        session = %session.id,
        workflow = %workflow.workflow_name,
        steps = workflow.steps.len(),
        "workflow distilled"
    );
    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mimic_core::types::{ActionKind, OwnerContext, SessionRole, SessionStatus};
    use serde_json::json;

    struct CannedClient {
        reply: String,
    }

    #[async_trait]
    impl ReasoningClient for CannedClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<String> {
            Ok(self.reply.clone())
        }
    }

    fn recorded_session() -> Session {
        let session = Session::new(SessionRole::ObserveBrowser, OwnerContext::default(), Some(60));
        session.transition(SessionStatus::Active);
        session.append_action(ActionKind::Navigate, json!({"url": "https://a"}), "Navigated");
        session.append_action(ActionKind::Click, json!({}), "Clicked \"Login\"");
        session
    }

    #[tokio::test]
    async fn distills_fenced_reply_into_workflow() {
        let client: Arc<dyn ReasoningClient> = Arc::new(CannedClient {
            reply: "```json\n{\"workflowName\": \"Login\", \"steps\": [{\"name\": \"Open site\", \
                    \"actions\": [\"navigate\"]}], \"workflowPattern\": \"auth\"}\n```"
                .to_string(),
        });
        let session = recorded_session();
        let workflow = distill_workflow(&client, &session).await.unwrap();
        assert_eq!(workflow.workflow_name, "Login");
        assert_eq!(workflow.steps.len(), 1);
        assert_eq!(workflow.steps[0].context, "");
    }

    #[tokio::test]
    async fn empty_session_is_rejected() {
        let client: Arc<dyn ReasoningClient> = Arc::new(CannedClient {
            reply: "{}".to_string(),
        });
        let session = Session::new(SessionRole::ObserveBrowser, OwnerContext::default(), Some(60));
        assert!(distill_workflow(&client, &session).await.is_err());
    }

    #[tokio::test]
    async fn garbage_reply_is_a_typed_error() {
        let client: Arc<dyn ReasoningClient> = Arc::new(CannedClient {
            reply: "I could not determine a workflow.".to_string(),
        });
        let session = recorded_session();
        let err = distill_workflow(&client, &session).await.unwrap_err();
        assert!(matches!(err, Error::JsonExtract(_)));
    }
}
