//! Session orchestration: lifecycle, producer loops, replay, and stream
//! fan-out.

pub mod analyzer;
pub mod capture;
pub mod desktop;
pub mod observer;
pub mod registry;
pub mod replay;
pub mod session;
pub mod stream;

pub use analyzer::FrameAnalyzer;
pub use observer::{Workflow, WorkflowStep};
pub use registry::SessionRegistry;
pub use session::Session;
pub use stream::{StreamCursor, StreamMessage};
