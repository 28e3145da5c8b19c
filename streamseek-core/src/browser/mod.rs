mod automation;
mod capture;
mod error;

pub use automation::{BrowserAutomation, BrowserContext, BrowserLauncher, ViewportSpec};
pub use capture::{CaptureOptions, CapturedNetworkEvent, MediaCapture};
pub use error::{BrowserError, BrowserResult};
