//! Session registry: concurrent create/stop/lookup over independent
//! sessions.
//!
//! An injected instance, not a process-wide singleton; the gateway holds
//! one in its shared state and tests build their own. The map lock is held
//! only for insert/lookup, never across a session's own work, so sessions
//! never serialize against each other.

use mimic_browser::{ChromeDriver, PageDriver};
use mimic_core::types::{OwnerContext, SessionRole, SessionStatus, SessionSummary};
use mimic_core::{Config, Error, Paths, Result};
use mimic_reasoning::ReasoningClient;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::analyzer::FrameAnalyzer;
use crate::observer::{distill_workflow, Workflow};
use crate::session::Session;
use crate::{capture, desktop, replay};

pub struct SessionRegistry {
    config: Config,
    paths: Paths,
    reasoning: Option<Arc<dyn ReasoningClient>>,
    analyzer: Option<Arc<FrameAnalyzer>>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(config: Config, paths: Paths, reasoning: Option<Arc<dyn ReasoningClient>>) -> Self {
        let analyzer = reasoning.clone().map(|c| Arc::new(FrameAnalyzer::new(c)));
        Self {
            config,
            paths,
            reasoning,
            analyzer,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn sessions_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Session>>> {
        match self.sessions.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn insert(&self, session: Arc<Session>) {
        let mut map = match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.insert(session.id.clone(), session);
    }

    /// Start an observe session. Browser roles launch Chrome before this
    /// returns; a launch failure leaves the session terminal `failed` in
    /// the registry and is surfaced to the caller.
    pub async fn start_observe(
        &self,
        role: SessionRole,
        owner: OwnerContext,
    ) -> Result<Arc<Session>> {
        if role == SessionRole::ReplayBrowser {
            return Err(Error::Session(
                "replay sessions start through start_replay".to_string(),
            ));
        }
        let session = Arc::new(Session::new(
            role,
            owner,
            self.config.capture.buffer_capacity(role),
        ));
        self.insert(session.clone());
        info!(session = %session.id, role = ?role, "observe session created");

        match role {
            SessionRole::ObserveBrowser => {
                let driver = match self.launch_browser(&session.id).await {
                    Ok(driver) => driver,
                    Err(e) => {
                        session.transition(SessionStatus::Failed);
                        warn!(session = %session.id, error = %e, "browser launch failed");
                        return Err(e);
                    }
                };
                session.attach_driver(driver).await;
                session.transition(SessionStatus::Active);
                capture::spawn_browser_loops(session.clone(), &self.config.capture);
            }
            SessionRole::ObserveDesktop => {
                session.transition(SessionStatus::Active);
                if let Err(e) = desktop::spawn_desktop_loops(session.clone(), &self.config.capture) {
                    session.transition(SessionStatus::Failed);
                    warn!(session = %session.id, error = %e, "desktop capture start failed");
                    return Err(e);
                }
            }
            SessionRole::ReplayBrowser => unreachable!(),
        }
        Ok(session)
    }

    /// Start a replay session for a workflow and spawn its driver loop.
    pub async fn start_replay(&self, owner: OwnerContext, workflow: Workflow) -> Result<Arc<Session>> {
        let client = self
            .reasoning
            .clone()
            .ok_or_else(|| Error::Config("replay requires a configured reasoning client".to_string()))?;
        if workflow.steps.is_empty() {
            return Err(Error::Session("workflow has no steps".to_string()));
        }

        let session = Arc::new(Session::new(
            SessionRole::ReplayBrowser,
            owner,
            self.config.capture.buffer_capacity(SessionRole::ReplayBrowser),
        ));
        self.insert(session.clone());
        info!(
            session = %session.id,
            workflow = %workflow.workflow_name,
            "replay session created"
        );

        let driver = match self.launch_browser(&session.id).await {
            Ok(driver) => driver,
            Err(e) => {
                session.transition(SessionStatus::Failed);
                warn!(session = %session.id, error = %e, "browser launch failed");
                return Err(e);
            }
        };
        session.attach_driver(driver).await;
        session.transition(SessionStatus::Active);

        tokio::spawn(replay::run_replay(
            session.clone(),
            workflow,
            client,
            self.config.replay.clone(),
        ));
        Ok(session)
    }

    async fn launch_browser(&self, session_id: &str) -> Result<Arc<dyn PageDriver>> {
        let profile_dir = self.paths.browser_profiles_dir().join(session_id);
        std::fs::create_dir_all(&profile_dir)?;
        let browser = &self.config.browser;
        let driver = ChromeDriver::launch(
            &profile_dir,
            browser.headed,
            browser.window_width,
            browser.window_height,
            &browser.start_url,
        )
        .await?;
        Ok(Arc::new(driver))
    }

    /// Stop a session: terminal transition, `ended_at`, release the browser.
    /// Idempotent; stopping an already-terminal session just returns its
    /// summary. `None` for an unknown id.
    pub async fn stop(&self, id: &str) -> Option<SessionSummary> {
        let session = self.get(id)?;
        if session.transition(SessionStatus::Stopped) {
            info!(session = %id, "session stopped");
        }
        // Close errors are logged by the driver and swallowed; a hung
        // browser must never keep the session out of a terminal state.
        session.release_driver().await;
        Some(session.summary())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions_read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.sessions_read().values().map(|s| s.summary()).collect();
        summaries.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        summaries
    }

    /// One out-of-band capture-and-append, on demand from a stream
    /// subscriber. Browser sessions grab a frame and drain the event
    /// queue; desktop sessions grab a frame and, when a reasoning client
    /// is configured, run it through the frame analyzer.
    pub async fn analyze(&self, id: &str) -> Result<()> {
        let session = self
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;
        if session.status() != SessionStatus::Active {
            return Err(Error::Session(format!("session {} is not active", id)));
        }
        match session.role {
            SessionRole::ObserveBrowser | SessionRole::ReplayBrowser => {
                capture::capture_once(&session).await
            }
            SessionRole::ObserveDesktop => {
                let image = tokio::task::spawn_blocking(desktop::capture_frame)
                    .await
                    .map_err(|e| Error::Session(format!("capture task failed: {}", e)))??;
                session.push_screenshot(image.clone(), None);
                if let Some(analyzer) = &self.analyzer {
                    let recent = session.actions_snapshot();
                    let detected = analyzer.analyze_frame(&image, &recent).await;
                    session.append_action(detected.kind, detected.payload, &detected.description);
                }
                Ok(())
            }
        }
    }

    /// Distill a session's action log into a workflow via the reasoning
    /// service. Works on live and terminal sessions alike.
    pub async fn distill(&self, id: &str) -> Result<Workflow> {
        let client = self
            .reasoning
            .as_ref()
            .ok_or_else(|| Error::Config("distillation requires a configured reasoning client".to_string()))?;
        let session = self
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;
        distill_workflow(client, &session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Config::default(), Paths::new(), None)
    }

    #[tokio::test]
    async fn stop_on_unknown_id_is_none() {
        let registry = registry();
        assert!(registry.stop("no-such-id").await.is_none());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let registry = registry();
        let session = Arc::new(Session::new(
            SessionRole::ObserveBrowser,
            OwnerContext::default(),
            Some(60),
        ));
        session.transition(SessionStatus::Active);
        registry.insert(session.clone());

        let first = registry.stop(&session.id).await.unwrap();
        assert_eq!(first.status, SessionStatus::Stopped);
        let ended_at = first.ended_at.clone();

        let second = registry.stop(&session.id).await.unwrap();
        assert_eq!(second.status, SessionStatus::Stopped);
        assert_eq!(second.ended_at, ended_at);
    }

    #[tokio::test]
    async fn terminal_sessions_stay_listed() {
        let registry = registry();
        let session = Arc::new(Session::new(
            SessionRole::ObserveDesktop,
            OwnerContext::default(),
            Some(100),
        ));
        session.transition(SessionStatus::Active);
        registry.insert(session.clone());
        registry.stop(&session.id).await;

        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, SessionStatus::Stopped);
        assert!(registry.get(&session.id).is_some());
    }

    #[tokio::test]
    async fn replay_without_reasoning_client_is_rejected() {
        let registry = registry();
        let workflow = Workflow {
            workflow_name: "w".to_string(),
            steps: vec![],
            workflow_pattern: String::new(),
        };
        match registry.start_replay(OwnerContext::default(), workflow).await {
            Err(Error::Config(_)) => {}
            other => panic!("expected config error, got {:?}", other.map(|s| s.id.clone())),
        }
    }

    #[tokio::test]
    async fn analyze_on_unknown_session_is_not_found() {
        let registry = registry();
        assert!(matches!(
            registry.analyze("missing").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }
}
