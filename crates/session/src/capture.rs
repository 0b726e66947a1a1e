//! Producer loops for browser observe sessions.
//!
//! Three independent tasks per session: a screenshot loop, a DOM event
//! poll loop, and a navigation observer. All three re-check the session
//! status at the top of every iteration and exit once it leaves `active`;
//! a transient capture or poll failure is logged and the loop continues.

use mimic_core::config::CaptureConfig;
use mimic_core::types::{ActionKind, SessionStatus};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::session::Session;

pub fn spawn_browser_loops(session: Arc<Session>, config: &CaptureConfig) {
    tokio::spawn(screenshot_loop(
        session.clone(),
        Duration::from_secs_f64(config.browser_screenshot_interval_secs),
    ));
    tokio::spawn(event_poll_loop(
        session.clone(),
        Duration::from_millis(config.event_poll_interval_ms),
    ));
    tokio::spawn(navigation_loop(session));
}

pub async fn screenshot_loop(session: Arc<Session>, interval: Duration) {
    info!(session = %session.id, interval = ?interval, "screenshot loop started");
    loop {
        if session.status() != SessionStatus::Active {
            break;
        }
        {
            let guard = session.driver_guard().await;
            let Some(driver) = guard.as_ref() else { break };
            match driver.screenshot().await {
                Ok(image) => {
                    session.push_screenshot(image, None);
                }
                Err(e) => {
                    // Expected while the page is mid-navigation or closing.
                    warn!(session = %session.id, error = %e, "screenshot capture failed");
                }
            }
        }
        tokio::time::sleep(interval).await;
    }
    info!(session = %session.id, "screenshot loop exited");
}

pub async fn event_poll_loop(session: Arc<Session>, interval: Duration) {
    info!(session = %session.id, interval = ?interval, "event poll loop started");
    loop {
        if session.status() != SessionStatus::Active {
            break;
        }
        {
            let guard = session.driver_guard().await;
            let Some(driver) = guard.as_ref() else { break };
            match driver.drain_events().await {
                Ok(events) => {
                    for raw in events {
                        let (kind, description) = describe_event(&raw);
                        session.append_action(kind, raw, &description);
                    }
                }
                Err(e) => {
                    warn!(session = %session.id, error = %e, "event drain failed");
                }
            }
        }
        tokio::time::sleep(interval).await;
    }
    info!(session = %session.id, "event poll loop exited");
}

/// Push-based, not polled: the driver forwards main-frame navigations as
/// they happen and each becomes a `navigate` action immediately.
pub async fn navigation_loop(session: Arc<Session>) {
    let mut rx = {
        let guard = session.driver_guard().await;
        let Some(driver) = guard.as_ref() else { return };
        driver.subscribe_navigations().await
    };
    while let Some(url) = rx.recv().await {
        if session.status() != SessionStatus::Active {
            break;
        }
        debug!(session = %session.id, url = %url, "navigation observed");
        session.set_current_url(&url);
        session.append_action(
            ActionKind::Navigate,
            json!({"url": url}),
            &format!("Navigated to {}", url),
        );
    }
    info!(session = %session.id, "navigation loop exited");
}

/// One out-of-band capture-and-append, used by the stream's analyze
/// command. Runs between scheduled ticks without disturbing the loops.
pub async fn capture_once(session: &Session) -> mimic_core::Result<()> {
    let guard = session.driver_guard().await;
    let Some(driver) = guard.as_ref() else {
        return Err(mimic_core::Error::Session(
            "session has no browser attached".to_string(),
        ));
    };
    let image = driver.screenshot().await?;
    session.push_screenshot(image, None);
    let events = driver.drain_events().await?;
    for raw in events {
        let (kind, description) = describe_event(&raw);
        session.append_action(kind, raw, &description);
    }
    Ok(())
}

/// Raw capture-script event to an action kind plus a human-readable line.
/// Unknown event types pass through untyped.
pub fn describe_event(raw: &Value) -> (ActionKind, String) {
    let event_type = raw.get("type").and_then(|v| v.as_str()).unwrap_or("unknown");
    let kind = serde_json::from_value::<ActionKind>(Value::String(event_type.to_string()))
        .unwrap_or_else(|_| ActionKind::Other(event_type.to_string()));

    let text = |key: &str| raw.get(key).and_then(|v| v.as_str()).unwrap_or("");
    let description = match kind {
        ActionKind::Click => {
            let label = first_nonempty(&[text("text"), text("id"), text("tag")]);
            let href = text("href");
            if href.is_empty() {
                format!("Clicked \"{}\"", label)
            } else {
                format!("Clicked \"{}\" ({})", label, href)
            }
        }
        ActionKind::Type => {
            let field = first_nonempty(&[text("placeholder"), text("name"), text("id"), text("tag")]);
            format!("Typed \"{}\" into {}", truncate(text("value"), 50), field)
        }
        ActionKind::Submit => {
            let form = first_nonempty(&[text("id"), text("action"), "form"]);
            format!("Submitted form {}", form)
        }
        ActionKind::Scroll => {
            let y = raw.get("scrollY").and_then(|v| v.as_i64()).unwrap_or(0);
            format!("Scrolled to y={}", y)
        }
        _ => format!("{} event", event_type),
    };
    (kind, description)
}

fn first_nonempty<'a>(candidates: &[&'a str]) -> &'a str {
    candidates
        .iter()
        .copied()
        .find(|s| !s.is_empty())
        .unwrap_or("element")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}…", cut)
    }
}
