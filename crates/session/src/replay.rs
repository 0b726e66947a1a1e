//! The replay driver: executes a learned workflow step by step against a
//! live page.
//!
//! Per step: snapshot the page, ask the reasoning service for a plan of
//! primitive actions, execute each with a fallback chain, log and
//! screenshot after every action. Partial failure never halts the run; a
//! step that blows up becomes an `error` log entry and the driver moves
//! on. Only exhausting the steps or an external stop ends the run.

use mimic_core::config::ReplayConfig;
use mimic_core::types::{ActionKind, SessionStatus};
use mimic_reasoning::{extract_json_array, CompletionRequest, ReasoningClient};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::observer::WorkflowStep;
use crate::session::Session;
use crate::Workflow;

/// The closed vocabulary of primitive replay actions. Anything the planner
/// emits outside it is logged as skipped, not executed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlannedAction {
    Navigate {
        url: String,
    },
    Click {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
    },
    Scroll {
        #[serde(default = "default_direction")]
        direction: String,
        #[serde(default = "default_scroll_amount")]
        amount: i64,
    },
    Wait {
        #[serde(default = "default_wait_seconds")]
        seconds: f64,
    },
    Screenshot,
}

fn default_direction() -> String {
    "down".to_string()
}

fn default_scroll_amount() -> i64 {
    300
}

fn default_wait_seconds() -> f64 {
    2.0
}

/// Drive one replay session to completion. Spawned by the registry; the
/// session must already be `active` with a driver attached.
pub async fn run_replay(
    session: Arc<Session>,
    workflow: Workflow,
    client: Arc<dyn ReasoningClient>,
    config: ReplayConfig,
) {
    let steps = workflow.steps;
    session.set_total_steps(steps.len());
    info!(
        session = %session.id,
        workflow = %workflow.workflow_name,
        steps = steps.len(),
        "replay started"
    );

    // Initial frame before any step runs.
    {
        let guard = session.driver_guard().await;
        if let Some(driver) = guard.as_ref() {
            if let Ok(image) = driver.screenshot().await {
                session.push_screenshot(image, Some(0));
            }
        }
    }

    for (i, step) in steps.iter().enumerate() {
        if session.status() != SessionStatus::Active {
            info!(session = %session.id, "replay stopped externally");
            return;
        }
        let step_number = i + 1;
        session.set_current_step(step_number);
        info!(
            session = %session.id,
            step = step_number,
            name = %step.name,
            "replaying step"
        );

        if let Err(e) = run_step(&session, step, step_number, &client, &config).await {
            error!(session = %session.id, step = step_number, error = %e, "step failed");
            session.append_action(
                ActionKind::Error,
                json!({"step": step_number, "error": e.to_string()}),
                &format!("Step {} failed: {}", step_number, step.name),
            );
        }

        tokio::time::sleep(Duration::from_secs_f64(config.step_pause_secs)).await;
    }

    if session.transition(SessionStatus::Completed) {
        info!(
            session = %session.id,
            actions = session.action_count(),
            "replay completed"
        );
    }
    session.release_driver().await;
}

async fn run_step(
    session: &Session,
    step: &WorkflowStep,
    step_number: usize,
    client: &Arc<dyn ReasoningClient>,
    config: &ReplayConfig,
) -> mimic_core::Result<()> {
    // Snapshot the page without holding the lock across the planning call.
    let (current_url, screenshot) = {
        let guard = session.driver_guard().await;
        let Some(driver) = guard.as_ref() else {
            return Err(mimic_core::Error::Session("driver detached".to_string()));
        };
        let url = driver.current_url().await.unwrap_or_else(|_| "unknown".to_string());
        let shot = driver.screenshot().await?;
        (url, shot)
    };

    let plan = plan_step(client, step, &current_url, &screenshot).await;

    for raw_action in plan {
        if session.status() != SessionStatus::Active {
            return Ok(());
        }
        let (kind, result, description) = {
            let guard = session.driver_guard().await;
            let Some(driver) = guard.as_ref() else {
                return Err(mimic_core::Error::Session("driver detached".to_string()));
            };
            execute_action(driver.as_ref(), &raw_action, config).await
        };

        tokio::time::sleep(Duration::from_secs_f64(config.settle_secs)).await;

        let post_shot = {
            let guard = session.driver_guard().await;
            match guard.as_ref() {
                Some(driver) => driver.screenshot().await.ok(),
                None => None,
            }
        };

        session.append_action(
            kind,
            json!({
                "step": step_number,
                "stepName": step.name,
                "action": raw_action,
                "result": result,
                "reasoning": step.reasoning,
            }),
            &format!("Step {}: {}", step_number, description),
        );
        if let Some(image) = post_shot {
            session.push_screenshot(image, Some(step_number));
        }
    }
    Ok(())
}

/// Ask the reasoning service for the step's action plan. Any failure, from
/// transport to unparseable output, degrades to a short wait so the run
/// keeps moving.
pub async fn plan_step(
    client: &Arc<dyn ReasoningClient>,
    step: &WorkflowStep,
    current_url: &str,
    screenshot_b64: &str,
) -> Vec<Value> {
    let prompt = format!(
        "You are a browser automation agent replaying an expert's workflow step.\n\n\
         Current browser URL: {}\n\n\
         Workflow step:\n\
         - Name: {}\n\
         - Context: {}\n\
         - Reasoning: {}\n\
         - Actions described: {}\n\n\
         Based on the screenshot and step description, determine the browser actions \
         to perform. Respond with ONLY a JSON array of actions. Available action types:\n\
         - {{\"type\": \"navigate\", \"url\": \"https://...\"}}\n\
         - {{\"type\": \"click\", \"selector\": \"CSS selector or text content\"}}\n\
         - {{\"type\": \"type\", \"selector\": \"CSS selector\", \"text\": \"text to type\"}}\n\
         - {{\"type\": \"scroll\", \"direction\": \"down|up\", \"amount\": 300}}\n\
         - {{\"type\": \"wait\", \"seconds\": 2}}\n\
         - {{\"type\": \"screenshot\"}}\n\n\
         If the step is abstract, simulate it with reasonable browser actions.",
        current_url,
        step.name,
        step.context,
        step.reasoning,
        serde_json::to_string(&step.actions).unwrap_or_default(),
    );

    let planned = client
        .complete(CompletionRequest {
            system: None,
            prompt,
            images: vec![screenshot_b64.to_string()],
        })
        .await
        .and_then(|reply| extract_json_array(&reply));

    match planned {
        Ok(actions) if !actions.is_empty() => actions,
        Ok(_) => {
            warn!("planner returned an empty plan, substituting a wait");
            vec![json!({"type": "wait", "seconds": 2.0})]
        }
        Err(e) => {
            warn!(error = %e, "action planning failed, substituting a wait");
            vec![json!({"type": "wait", "seconds": 2.0})]
        }
    }
}

/// Execute one planned action with its fallback chain. Never fails: every
/// outcome is a (kind, result, description) triple for the log, with
/// anything short of success recorded under kind `error`.
async fn execute_action(
    driver: &dyn mimic_browser::PageDriver,
    raw: &Value,
    config: &ReplayConfig,
) -> (ActionKind, Value, String) {
    let action_timeout = Duration::from_secs(config.action_timeout_secs);
    let nav_timeout = Duration::from_secs(config.nav_timeout_secs);

    let parsed: PlannedAction = match serde_json::from_value(raw.clone()) {
        Ok(parsed) => parsed,
        Err(_) => {
            let type_name = raw.get("type").and_then(|v| v.as_str()).unwrap_or("?");
            return (
                ActionKind::Error,
                json!({"status": "skipped", "reason": format!("unknown action type: {}", type_name)}),
                format!("Skipped unknown action \"{}\"", type_name),
            );
        }
    };

    match parsed {
        PlannedAction::Navigate { url } => match driver.goto(&url, nav_timeout).await {
            Ok(()) => (
                ActionKind::Navigate,
                json!({"status": "ok", "url": url}),
                format!("Navigated to {}", url),
            ),
            Err(e) => (
                ActionKind::Error,
                json!({"status": "failed", "error": e.to_string()}),
                format!("Navigation to {} failed", url),
            ),
        },
        PlannedAction::Click { selector } => {
            // Selector first, then treat the selector string as visible text.
            if driver.click(&selector, action_timeout).await.is_ok() {
                (
                    ActionKind::Click,
                    json!({"status": "ok", "clicked": selector}),
                    format!("Clicked {}", selector),
                )
            } else if driver.click_text(&selector, action_timeout).await.is_ok() {
                (
                    ActionKind::Click,
                    json!({"status": "ok", "clicked": selector, "via": "text"}),
                    format!("Clicked \"{}\" by text", selector),
                )
            } else {
                (
                    ActionKind::Error,
                    json!({"status": "failed", "error": format!("could not find: {}", selector)}),
                    format!("Click failed: {}", selector),
                )
            }
        }
        PlannedAction::Type { selector, text } => {
            if driver.fill(&selector, &text, action_timeout).await.is_ok() {
                (
                    ActionKind::Type,
                    json!({"status": "ok", "typed": text}),
                    format!("Typed \"{}\" into {}", text, selector),
                )
            } else if driver.fill_first_textbox(&text, action_timeout).await.is_ok() {
                (
                    ActionKind::Type,
                    json!({"status": "ok", "typed": text, "via": "first_textbox"}),
                    format!("Typed \"{}\" into the first textbox", text),
                )
            } else {
                (
                    ActionKind::Error,
                    json!({"status": "failed", "error": format!("no field for: {}", selector)}),
                    format!("Type into {} failed", selector),
                )
            }
        }
        PlannedAction::Scroll { direction, amount } => {
            let dy = if direction == "up" { -amount } else { amount };
            match driver.scroll(0, dy).await {
                Ok(()) => (
                    ActionKind::Scroll,
                    json!({"status": "ok", "scrolled": direction}),
                    format!("Scrolled {} by {}", direction, amount),
                ),
                Err(e) => (
                    ActionKind::Error,
                    json!({"status": "failed", "error": e.to_string()}),
                    "Scroll failed".to_string(),
                ),
            }
        }
        PlannedAction::Wait { seconds } => {
            tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))).await;
            (
                ActionKind::Wait,
                json!({"status": "ok", "waited": seconds}),
                format!("Waited {}s", seconds),
            )
        }
        PlannedAction::Screenshot => (
            ActionKind::Screenshot,
            json!({"status": "ok"}),
            "Captured screenshot".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::Workflow;
    use async_trait::async_trait;
    use mimic_browser::PageDriver;
    use mimic_core::types::{OwnerContext, SessionRole};
    use mimic_core::{Error, Result};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Driver where clicks on "#missing" miss both strategies.
    struct MockDriver;

    #[async_trait]
    impl PageDriver for MockDriver {
        async fn goto(&self, _url: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        async fn click(&self, selector: &str, _timeout: Duration) -> Result<()> {
            if selector == "#missing" {
                Err(Error::Browser(format!("no element matches '{}'", selector)))
            } else {
                Ok(())
            }
        }
        async fn click_text(&self, text: &str, _timeout: Duration) -> Result<()> {
            if text == "#missing" {
                Err(Error::Browser(format!("no element with text '{}'", text)))
            } else {
                Ok(())
            }
        }
        async fn fill(&self, _selector: &str, _text: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        async fn fill_first_textbox(&self, _text: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        async fn scroll(&self, _dx: i64, _dy: i64) -> Result<()> {
            Ok(())
        }
        async fn screenshot(&self) -> Result<String> {
            Ok("frame".to_string())
        }
        async fn evaluate(&self, _script: &str) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn current_url(&self) -> Result<String> {
            Ok("https://example.com".to_string())
        }
        async fn drain_events(&self) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
        async fn subscribe_navigations(&self) -> mpsc::Receiver<String> {
            mpsc::channel(1).1
        }
        async fn close(&self) {}
    }

    /// Serves one canned reply per planning call.
    struct ScriptedPlanner {
        replies: Mutex<VecDeque<Result<String>>>,
    }

    impl ScriptedPlanner {
        fn new(replies: Vec<Result<String>>) -> Arc<dyn ReasoningClient> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
            })
        }
    }

    #[async_trait]
    impl ReasoningClient for ScriptedPlanner {
        async fn complete(&self, _request: CompletionRequest) -> Result<String> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok("[]".to_string()))
        }
    }

    fn step(name: &str) -> WorkflowStep {
        WorkflowStep {
            name: name.to_string(),
            context: String::new(),
            reasoning: String::new(),
            actions: Vec::new(),
        }
    }

    fn fast_config() -> ReplayConfig {
        ReplayConfig {
            settle_secs: 0.0,
            step_pause_secs: 0.0,
            action_timeout_secs: 1,
            nav_timeout_secs: 1,
        }
    }

    async fn replay_session() -> Arc<Session> {
        let session = Arc::new(Session::new(
            SessionRole::ReplayBrowser,
            OwnerContext::default(),
            None,
        ));
        session.attach_driver(Arc::new(MockDriver)).await;
        session.transition(SessionStatus::Active);
        session
    }

    #[tokio::test]
    async fn dead_step_becomes_error_entry_and_run_completes() {
        let session = replay_session().await;
        let client = ScriptedPlanner::new(vec![
            Ok(r##"[{"type": "click", "selector": "#ok"}]"##.to_string()),
            Ok(r##"[{"type": "click", "selector": "#missing"}]"##.to_string()),
            Ok(r#"[{"type": "wait", "seconds": 0.0}]"#.to_string()),
        ]);
        let workflow = Workflow {
            workflow_name: "three steps".to_string(),
            steps: vec![step("one"), step("two"), step("three")],
            workflow_pattern: String::new(),
        };

        run_replay(session.clone(), workflow, client, fast_config()).await;

        assert_eq!(session.status(), SessionStatus::Completed);
        let actions = session.actions_snapshot();
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0].kind, ActionKind::Click);
        assert_eq!(actions[0].payload["step"], 1);
        // Step 2's click missed both strategies but the run went on.
        assert_eq!(actions[1].kind, ActionKind::Error);
        assert_eq!(actions[1].payload["result"]["status"], "failed");
        assert_eq!(actions[2].kind, ActionKind::Wait);
        assert_eq!(actions[2].payload["step"], 3);
        assert_eq!(session.summary().total_steps, Some(3));
    }

    #[tokio::test]
    async fn planner_failure_degrades_to_a_wait() {
        let client = ScriptedPlanner::new(vec![Err(Error::Reasoning("offline".to_string()))]);
        let plan = plan_step(&client, &step("s"), "https://x", "img").await;
        assert_eq!(plan, vec![json!({"type": "wait", "seconds": 2.0})]);
    }

    #[tokio::test]
    async fn unknown_planned_action_is_skipped_not_executed() {
        let (kind, result, _) = execute_action(
            &MockDriver,
            &json!({"type": "teleport", "to": "mars"}),
            &fast_config(),
        )
        .await;
        assert_eq!(kind, ActionKind::Error);
        assert_eq!(result["status"], "skipped");
    }

    #[tokio::test]
    async fn external_stop_is_observed_between_steps() {
        let session = replay_session().await;
        // Stop before the driver runs: no step should execute.
        session.transition(SessionStatus::Stopped);
        let client = ScriptedPlanner::new(vec![]);
        let workflow = Workflow {
            workflow_name: "never runs".to_string(),
            steps: vec![step("one")],
            workflow_pattern: String::new(),
        };
        run_replay(session.clone(), workflow, client, fast_config()).await;
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert!(session.actions_snapshot().is_empty());
    }

    #[test]
    fn planned_actions_parse_with_defaults() {
        let scroll: PlannedAction = serde_json::from_value(json!({"type": "scroll"})).unwrap();
        assert_eq!(
            scroll,
            PlannedAction::Scroll {
                direction: "down".to_string(),
                amount: 300
            }
        );
        let wait: PlannedAction = serde_json::from_value(json!({"type": "wait"})).unwrap();
        assert_eq!(wait, PlannedAction::Wait { seconds: 2.0 });
    }
}
