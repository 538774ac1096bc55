//! The liveness detector: HTTP fetch, scripted browser probe, and
//! streaming-probe fallback, short-circuiting on `LIVE` or `AUTH_REQUIRED`
//! (spec §4.2).

pub mod browser_stage;
pub mod detector;
pub mod error;
pub mod http_stage;
pub mod markers;
pub mod result;
pub mod streamlink_stage;

pub use detector::{DetectorConfig, LivenessDetector};
pub use error::{Error, Result};
pub use result::{DetectMethod, DetectReason, DetectResult};
