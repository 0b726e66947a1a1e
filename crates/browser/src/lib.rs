//! Chrome launching and page automation over the DevTools protocol.

pub mod cdp;
pub mod chrome;
pub mod driver;

pub use cdp::CdpClient;
pub use driver::{ChromeDriver, PageDriver};
