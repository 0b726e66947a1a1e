pub mod config;
pub mod error;
pub mod paths;
pub mod ring;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use paths::Paths;
pub use ring::ScreenshotRing;
pub use types::{
    Action, ActionKind, OwnerContext, Screenshot, SessionRole, SessionStatus, SessionSummary,
};

/// Milliseconds since the Unix epoch, the timestamp unit used everywhere.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
