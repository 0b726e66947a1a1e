//! Producer loops for desktop observe sessions.
//!
//! Screen grabs go through the `screenshots` crate inside `spawn_blocking`.
//! OS input listening is inherently blocking, so the `rdev` hook runs on a
//! dedicated OS thread and communicates with the async drain loop only
//! through a lock-guarded queue. `rdev` offers no unhook, so the hook is
//! installed at most once per process and re-armed per session through a
//! single active sink; only one desktop session can capture input at a
//! time, and a second concurrent one is rejected at start.

use base64::Engine;
use mimic_core::config::CaptureConfig;
use mimic_core::types::{ActionKind, SessionStatus};
use mimic_core::{Error, Result};
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::session::Session;

/// One raw OS input event, queued by the listener thread.
#[derive(Debug, Clone)]
pub enum RawInput {
    Click { button: String, x: f64, y: f64 },
    Key { key: String },
    Wheel { dx: i64, dy: i64 },
}

pub fn spawn_desktop_loops(session: Arc<Session>, config: &CaptureConfig) -> Result<()> {
    let queue: Arc<Mutex<Vec<RawInput>>> = Arc::new(Mutex::new(Vec::new()));
    let recording = Arc::new(AtomicBool::new(true));

    arm_sink(&ACTIVE_SINK, queue.clone(), recording.clone())?;
    install_input_hook();

    tokio::spawn(desktop_screenshot_loop(
        session.clone(),
        Duration::from_secs_f64(config.desktop_screenshot_interval_secs),
    ));
    tokio::spawn(input_drain_loop(
        session,
        queue,
        recording,
        Duration::from_millis(config.event_poll_interval_ms),
    ));
    Ok(())
}

/// Grab the primary monitor as base64 JPEG. Blocking; call from
/// `spawn_blocking`.
pub fn capture_frame() -> Result<String> {
    let screens = screenshots::Screen::all()
        .map_err(|e| Error::Session(format!("screen enumeration failed: {}", e)))?;
    let screen = screens
        .into_iter()
        .find(|s| s.display_info.is_primary)
        .or_else(|| screenshots::Screen::all().ok()?.into_iter().next())
        .ok_or_else(|| Error::Session("no monitor found".to_string()))?;
    let image = screen
        .capture()
        .map_err(|e| Error::Session(format!("screen capture failed: {}", e)))?;

    // The capture is RGBA; JPEG needs RGB.
    let rgb = screenshots::image::DynamicImage::ImageRgba8(image).to_rgb8();
    let mut buffer = Cursor::new(Vec::new());
    rgb.write_to(&mut buffer, screenshots::image::ImageOutputFormat::Jpeg(70))
        .map_err(|e| Error::Session(format!("frame encoding failed: {}", e)))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(buffer.into_inner()))
}

pub async fn desktop_screenshot_loop(session: Arc<Session>, interval: Duration) {
    info!(session = %session.id, interval = ?interval, "desktop screenshot loop started");
    loop {
        if session.status() != SessionStatus::Active {
            break;
        }
        match tokio::task::spawn_blocking(capture_frame).await {
            Ok(Ok(image)) => {
                session.push_screenshot(image, None);
            }
            Ok(Err(e)) => {
                warn!(session = %session.id, error = %e, "desktop capture failed");
            }
            Err(e) => {
                error!(session = %session.id, error = %e, "capture task panicked");
            }
        }
        tokio::time::sleep(interval).await;
    }
    info!(session = %session.id, "desktop screenshot loop exited");
}

/// Periodically swap the input queue out whole and convert the batch into
/// actions. On exit, disarms the listener's recording flag.
pub async fn input_drain_loop(
    session: Arc<Session>,
    queue: Arc<Mutex<Vec<RawInput>>>,
    recording: Arc<AtomicBool>,
    interval: Duration,
) {
    loop {
        if session.status() != SessionStatus::Active {
            break;
        }
        let batch = match queue.lock() {
            Ok(mut q) => std::mem::take(&mut *q),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for (kind, payload, description) in summarize_inputs(batch) {
            session.append_action(kind, payload, &description);
        }
        tokio::time::sleep(interval).await;
    }
    recording.store(false, Ordering::SeqCst);
    info!(session = %session.id, "input drain loop exited");
}

/// Convert one drained batch into actions, coalescing consecutive
/// keystrokes and wheel movement so a burst of typing is one action.
pub fn summarize_inputs(batch: Vec<RawInput>) -> Vec<(ActionKind, Value, String)> {
    let mut out: Vec<(ActionKind, Value, String)> = Vec::new();
    let mut keys: Vec<String> = Vec::new();
    let mut wheel = (0i64, 0i64);

    let flush_keys = |keys: &mut Vec<String>, out: &mut Vec<(ActionKind, Value, String)>| {
        if keys.is_empty() {
            return;
        }
        let joined = keys.join("");
        out.push((
            ActionKind::Keystroke,
            json!({"keys": keys, "source": "desktop"}),
            format!("Typed \"{}\"", joined),
        ));
        keys.clear();
    };
    let flush_wheel = |wheel: &mut (i64, i64), out: &mut Vec<(ActionKind, Value, String)>| {
        if *wheel == (0, 0) {
            return;
        }
        out.push((
            ActionKind::Scroll,
            json!({"dx": wheel.0, "dy": wheel.1, "source": "desktop"}),
            format!("Scrolled by ({}, {})", wheel.0, wheel.1),
        ));
        *wheel = (0, 0);
    };

    for input in batch {
        match input {
            RawInput::Key { key } => {
                flush_wheel(&mut wheel, &mut out);
                keys.push(key);
            }
            RawInput::Wheel { dx, dy } => {
                flush_keys(&mut keys, &mut out);
                wheel.0 += dx;
                wheel.1 += dy;
            }
            RawInput::Click { button, x, y } => {
                flush_keys(&mut keys, &mut out);
                flush_wheel(&mut wheel, &mut out);
                out.push((
                    ActionKind::Click,
                    json!({"button": button, "x": x, "y": y, "source": "desktop"}),
                    format!("Clicked {} button at ({:.0}, {:.0})", button, x, y),
                ));
            }
        }
    }
    flush_keys(&mut keys, &mut out);
    flush_wheel(&mut wheel, &mut out);
    out
}

/// Where the process-wide input hook delivers events. Replaced whole when
/// a new session arms; the drained session's recording flag going false is
/// what frees the slot.
struct InputSink {
    queue: Arc<Mutex<Vec<RawInput>>>,
    recording: Arc<AtomicBool>,
}

static ACTIVE_SINK: Mutex<Option<InputSink>> = Mutex::new(None);
static HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Point the input hook at a session's queue. Fails while another session
/// is still recording; the OS hook only exists once.
fn arm_sink(
    slot: &Mutex<Option<InputSink>>,
    queue: Arc<Mutex<Vec<RawInput>>>,
    recording: Arc<AtomicBool>,
) -> Result<()> {
    let mut slot = match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(current) = slot.as_ref() {
        if current.recording.load(Ordering::SeqCst) {
            return Err(Error::Session(
                "another desktop session is already capturing input".to_string(),
            ));
        }
    }
    *slot = Some(InputSink { queue, recording });
    Ok(())
}

/// Install the OS input hook on its own thread, once per process. The hook
/// cannot be removed, so it stays resident and forwards into whichever
/// sink is currently armed.
fn install_input_hook() {
    if HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }
    std::thread::spawn(move || {
        let mut pointer = (0.0f64, 0.0f64);
        let result = rdev::listen(move |event| {
            if let rdev::EventType::MouseMove { x, y } = event.event_type {
                pointer = (x, y);
                return;
            }
            let queue = {
                let slot = match ACTIVE_SINK.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                match slot.as_ref() {
                    Some(sink) if sink.recording.load(Ordering::SeqCst) => sink.queue.clone(),
                    _ => return,
                }
            };
            let input = match event.event_type {
                rdev::EventType::ButtonPress(button) => Some(RawInput::Click {
                    button: format!("{:?}", button).to_lowercase(),
                    x: pointer.0,
                    y: pointer.1,
                }),
                rdev::EventType::KeyPress(key) => {
                    let name = event.name.unwrap_or_else(|| format!("[{:?}]", key));
                    Some(RawInput::Key { key: name })
                }
                rdev::EventType::Wheel { delta_x, delta_y } => Some(RawInput::Wheel {
                    dx: delta_x,
                    dy: delta_y,
                }),
                _ => None,
            };
            if let Some(input) = input {
                if let Ok(mut q) = queue.lock() {
                    q.push(input);
                }
            }
        });
        if let Err(e) = result {
            error!(error = ?e, "input listener failed to start");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keystroke_bursts_coalesce_into_one_action() {
        let batch = vec![
            RawInput::Key { key: "h".to_string() },
            RawInput::Key { key: "i".to_string() },
            RawInput::Click { button: "left".to_string(), x: 10.0, y: 20.0 },
            RawInput::Key { key: "x".to_string() },
        ];
        let actions = summarize_inputs(batch);
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0].0, ActionKind::Keystroke);
        assert_eq!(actions[0].2, "Typed \"hi\"");
        assert_eq!(actions[1].0, ActionKind::Click);
        assert_eq!(actions[1].2, "Clicked left button at (10, 20)");
        assert_eq!(actions[2].0, ActionKind::Keystroke);
        assert_eq!(actions[2].2, "Typed \"x\"");
    }

    #[test]
    fn wheel_movement_sums_until_interrupted() {
        let batch = vec![
            RawInput::Wheel { dx: 0, dy: -3 },
            RawInput::Wheel { dx: 0, dy: -2 },
            RawInput::Click { button: "left".to_string(), x: 0.0, y: 0.0 },
        ];
        let actions = summarize_inputs(batch);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].0, ActionKind::Scroll);
        assert_eq!(actions[0].2, "Scrolled by (0, -5)");
    }

    #[test]
    fn empty_batch_yields_nothing() {
        assert!(summarize_inputs(Vec::new()).is_empty());
    }

    #[test]
    fn second_recording_session_cannot_arm_until_first_stops() {
        let slot: Mutex<Option<InputSink>> = Mutex::new(None);
        let first_queue = Arc::new(Mutex::new(Vec::new()));
        let first_recording = Arc::new(AtomicBool::new(true));
        arm_sink(&slot, first_queue, first_recording.clone()).unwrap();

        let second_queue = Arc::new(Mutex::new(Vec::new()));
        let second_recording = Arc::new(AtomicBool::new(true));
        let refused = arm_sink(&slot, second_queue.clone(), second_recording.clone());
        assert!(matches!(refused, Err(Error::Session(_))));

        // The drain loop clears the flag at stop, freeing the slot.
        first_recording.store(false, Ordering::SeqCst);
        arm_sink(&slot, second_queue, second_recording).unwrap();
    }
}
