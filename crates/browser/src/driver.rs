//! The automation driver seam.
//!
//! `PageDriver` is the contract every producer loop and the replay driver
//! program against; `ChromeDriver` is the real implementation over a
//! launched Chrome process and its CDP connection. Tests substitute mock
//! drivers behind the same trait.

use async_trait::async_trait;
use mimic_core::{Error, Result};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::cdp::CdpClient;
use crate::chrome;

/// JS injected into every document to record DOM events into a page-side
/// queue that the event poll loop drains atomically.
const CAPTURE_SCRIPT: &str = r#"
(() => {
  if (window.__mimic_initialized) return;
  window.__mimic_initialized = true;
  window.__mimic_actions = [];

  document.addEventListener('click', (e) => {
    const t = e.target;
    window.__mimic_actions.push({
      type: 'click',
      tag: t.tagName.toLowerCase(),
      id: t.id || '',
      text: (t.textContent || '').trim().slice(0, 120),
      href: t.href || (t.closest('a') ? t.closest('a').href : '') || '',
      url: location.href,
      timestamp: Date.now()
    });
  }, true);

  let inputTimer = null;
  document.addEventListener('input', (e) => {
    clearTimeout(inputTimer);
    const t = e.target;
    inputTimer = setTimeout(() => {
      window.__mimic_actions.push({
        type: 'type',
        tag: t.tagName.toLowerCase(),
        id: t.id || '',
        name: t.name || '',
        placeholder: t.placeholder || '',
        value: (t.value || '').slice(0, 200),
        url: location.href,
        timestamp: Date.now()
      });
    }, 400);
  }, true);

  document.addEventListener('submit', (e) => {
    const form = e.target;
    window.__mimic_actions.push({
      type: 'submit',
      tag: 'form',
      id: form.id || '',
      action: form.action || '',
      url: location.href,
      timestamp: Date.now()
    });
  }, true);

  let scrollTimer = null;
  window.addEventListener('scroll', () => {
    clearTimeout(scrollTimer);
    scrollTimer = setTimeout(() => {
      window.__mimic_actions.push({
        type: 'scroll',
        scrollY: Math.round(window.scrollY),
        scrollX: Math.round(window.scrollX),
        url: location.href,
        timestamp: Date.now()
      });
    }, 800);
  }, true);
})();
"#;

/// Drain-and-clear in one evaluate so events appended mid-read are not lost.
const DRAIN_SCRIPT: &str = r#"
(() => {
  const a = window.__mimic_actions || [];
  window.__mimic_actions = [];
  return a;
})()
"#;

/// Contract between a session and the page it exclusively owns. All
/// operations are async and may fail with a timeout or not-found error;
/// `close` is idempotent and never fails.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;
    /// Click an element by CSS selector.
    async fn click(&self, selector: &str, timeout: Duration) -> Result<()>;
    /// Click the first element whose visible text contains `text`.
    async fn click_text(&self, text: &str, timeout: Duration) -> Result<()>;
    /// Set a form field's value and fire an input event.
    async fn fill(&self, selector: &str, text: &str, timeout: Duration) -> Result<()>;
    /// Focus the first textbox-like element and type into it.
    async fn fill_first_textbox(&self, text: &str, timeout: Duration) -> Result<()>;
    async fn scroll(&self, dx: i64, dy: i64) -> Result<()>;
    /// Capture the current viewport as base64 JPEG.
    async fn screenshot(&self) -> Result<String>;
    async fn evaluate(&self, script: &str) -> Result<Value>;
    async fn current_url(&self) -> Result<String>;
    /// Atomically drain the injected capture queue.
    async fn drain_events(&self) -> Result<Vec<Value>>;
    /// Main-frame navigation URLs, pushed as they happen.
    async fn subscribe_navigations(&self) -> mpsc::Receiver<String>;
    /// Release the underlying browser. Safe to call more than once.
    async fn close(&self);
}

/// A launched Chrome process plus its CDP page connection.
pub struct ChromeDriver {
    cdp: CdpClient,
    child: Mutex<Child>,
    closed: AtomicBool,
    /// Load events drained by goto to wait for navigation to settle.
    load_events: Mutex<mpsc::Receiver<Value>>,
}

impl ChromeDriver {
    /// Launch Chrome, connect to its first page target, inject the capture
    /// script, and navigate to `start_url`.
    pub async fn launch(
        user_data_dir: &std::path::Path,
        headed: bool,
        window_width: u32,
        window_height: u32,
        start_url: &str,
    ) -> Result<Self> {
        let debug_port = chrome::find_free_port().await?;
        let child = chrome::launch_chrome(
            debug_port,
            user_data_dir,
            headed,
            window_width,
            window_height,
        )?;

        chrome::wait_for_cdp_ready(debug_port, 15).await?;
        let page_ws_url = chrome::get_page_ws_url(debug_port).await?;
        let cdp = CdpClient::connect(&page_ws_url).await?;

        cdp.enable_domain("Page").await?;
        cdp.enable_domain("Runtime").await?;
        cdp.enable_domain("DOM").await?;
        cdp.enable_domain("Network").await?;

        cdp.add_init_script(CAPTURE_SCRIPT).await?;
        // The first document predates the init script registration.
        cdp.evaluate(CAPTURE_SCRIPT, Duration::from_secs(5)).await?;

        let load_events = cdp.subscribe_event("Page.loadEventFired").await;

        info!(port = debug_port, ws_url = %page_ws_url, "CDP connection established");

        let driver = Self {
            cdp,
            child: Mutex::new(child),
            closed: AtomicBool::new(false),
            load_events: Mutex::new(load_events),
        };
        driver.goto(start_url, Duration::from_secs(15)).await?;
        Ok(driver)
    }
}

#[async_trait]
impl PageDriver for ChromeDriver {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        let mut load_rx = self.load_events.lock().await;
        // Stale load events from earlier navigations.
        while load_rx.try_recv().is_ok() {}

        let result = self
            .cdp
            .send_command("Page.navigate", json!({"url": url}), timeout)
            .await?;
        if let Some(err) = result.get("errorText").and_then(|v| v.as_str()) {
            if !err.is_empty() {
                return Err(Error::Browser(format!("navigation failed: {}", err)));
            }
        }

        match tokio::time::timeout(timeout, load_rx.recv()).await {
            Ok(_) => Ok(()),
            Err(_) => Err(Error::Timeout(format!(
                "navigation to {} did not settle within {:?}",
                url, timeout
            ))),
        }
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<()> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.scrollIntoView({{block: 'center'}});
                el.click();
                return true;
            }})()"#,
            sel = js_string(selector)
        );
        match self.cdp.evaluate(&script, timeout).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(Error::Browser(format!("no element matches '{}'", selector))),
        }
    }

    async fn click_text(&self, text: &str, timeout: Duration) -> Result<()> {
        let script = format!(
            r#"(() => {{
                const needle = {needle}.toLowerCase();
                const els = document.querySelectorAll('a, button, input[type="submit"], [role="button"], [onclick]');
                for (const el of els) {{
                    const t = (el.textContent || el.value || '').trim().toLowerCase();
                    if (t && t.includes(needle)) {{
                        el.scrollIntoView({{block: 'center'}});
                        el.click();
                        return true;
                    }}
                }}
                return false;
            }})()"#,
            needle = js_string(text)
        );
        match self.cdp.evaluate(&script, timeout).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(Error::Browser(format!("no element with text '{}'", text))),
        }
    }

    async fn fill(&self, selector: &str, text: &str, timeout: Duration) -> Result<()> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.focus();
                el.value = {val};
                el.dispatchEvent(new Event('input', {{bubbles: true}}));
                el.dispatchEvent(new Event('change', {{bubbles: true}}));
                return true;
            }})()"#,
            sel = js_string(selector),
            val = js_string(text)
        );
        match self.cdp.evaluate(&script, timeout).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(Error::Browser(format!("no element matches '{}'", selector))),
        }
    }

    async fn fill_first_textbox(&self, text: &str, timeout: Duration) -> Result<()> {
        let focus_script = r#"(() => {
            const el = document.querySelector('input[type="text"], input[type="search"], input:not([type]), textarea, [contenteditable="true"]');
            if (!el) return false;
            el.focus();
            return true;
        })()"#;
        match self.cdp.evaluate(focus_script, timeout).await? {
            Value::Bool(true) => self.cdp.insert_text(text, timeout).await,
            _ => Err(Error::Browser("no textbox found to fill".to_string())),
        }
    }

    async fn scroll(&self, dx: i64, dy: i64) -> Result<()> {
        let script = format!("window.scrollBy({}, {}); true", dx, dy);
        self.cdp.evaluate(&script, Duration::from_secs(5)).await?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<String> {
        self.cdp.screenshot().await
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.cdp.evaluate(script, Duration::from_secs(10)).await
    }

    async fn current_url(&self) -> Result<String> {
        let val = self
            .cdp
            .evaluate("location.href", Duration::from_secs(5))
            .await?;
        val.as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Browser("location.href returned non-string".to_string()))
    }

    async fn drain_events(&self) -> Result<Vec<Value>> {
        let val = self.cdp.evaluate(DRAIN_SCRIPT, Duration::from_secs(5)).await?;
        match val {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(Error::Browser(format!(
                "capture queue returned non-array: {}",
                other
            ))),
        }
    }

    async fn subscribe_navigations(&self) -> mpsc::Receiver<String> {
        let mut raw = self.cdp.subscribe_event("Page.frameNavigated").await;
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            while let Some(params) = raw.recv().await {
                let Some(frame) = params.get("frame") else { continue };
                // Sub-frame navigations carry a parentId; only the main
                // frame becomes a navigate action.
                if frame.get("parentId").is_some() {
                    continue;
                }
                let Some(url) = frame.get("url").and_then(|v| v.as_str()) else {
                    continue;
                };
                if tx.send(url.to_string()).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Graceful close via CDP first, then make sure the process is gone.
        if let Err(e) = self
            .cdp
            .send_command("Browser.close", json!({}), Duration::from_secs(5))
            .await
        {
            debug!(error = %e, "CDP Browser.close failed (may already be closed)");
        }
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            warn!(error = %e, "failed to kill Chrome process");
        }
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        // Best-effort kill on drop; close() is the normal path.
        if let Ok(mut child) = self.child.try_lock() {
            let _ = child.start_kill();
        }
    }
}

/// Quote an arbitrary string as a JS string literal.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_string_escapes_quotes_and_newlines() {
        assert_eq!(js_string("a'b\"c"), "\"a'b\\\"c\"");
        assert_eq!(js_string("line\nbreak"), "\"line\\nbreak\"");
    }

    #[test]
    fn capture_script_guards_double_injection() {
        assert!(CAPTURE_SCRIPT.contains("__mimic_initialized"));
        assert!(DRAIN_SCRIPT.contains("window.__mimic_actions = []"));
    }
}
