//! Authenticated browser singleton for the TwitCasting monitor (spec §4.1).
//!
//! Exposes the capability traits (so `tc-detector` and `tc-recorder` never
//! depend on a concrete engine), the CDP-backed implementation of those
//! traits, cookie snapshot classification/export, and the [`BrowserSingleton`]
//! itself.

pub mod capability;
pub mod cdp;
pub mod cookie;
pub mod driver;
pub mod error;
pub mod singleton;

pub use capability::{BrowserContext, BrowserDriver, NewContextOptions, Page, ResponseInfo, WaitUntil};
pub use cdp::CdpDriver;
pub use cookie::{Cookie, LoginStrength};
pub use driver::find_browser_executable;
pub use error::{Error, Result};
pub use singleton::BrowserSingleton;
