//! Button Screenshot Regression Harness
//!
//! This crate renders many configurations of the payment button widget in a
//! real browser and compares each rendering against a stored baseline:
//! - Compiles the widget bundle through webpack (or loads a prebuilt one)
//! - Drives one long-lived Playwright page over a line-delimited JSON protocol
//! - Renders each configuration into a fresh container and measures the frame
//! - Captures the measured region and compares it with SSIM against a baseline
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Screenshot Runner (Rust)                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScreenshotRunner                                           │
//! │    ├── Bundler::bundle(request) -> Bundle          (once)   │
//! │    ├── SessionLauncher::open(bundle) -> Page       (once)   │
//! │    ├── for each TestCase, sequentially:                     │
//! │    │     ├── Renderer::render_and_measure -> Geometry       │
//! │    │     ├── Page::screenshot(geometry) -> PNG              │
//! │    │     └── VisualTester::compare(fingerprint, PNG)        │
//! │    └── Page::close()                               (once)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ButtonConfig (YAML)                                        │
//! │    ├── button: { style, ... }                               │
//! │    ├── fundingEligibility / wallet / rememberedFunding      │
//! │    ├── userAgent                                            │
//! │    ├── container: { width }                                 │
//! │    └── only                                                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod browser;
pub mod bundle;
pub mod case;
pub mod config;
pub mod context;
pub mod error;
pub mod render;
pub mod runner;
pub mod visual;
pub mod wait;

pub use browser::{Page, SessionLauncher, SessionOptions};
pub use bundle::{Bundle, BundleRequest, Bundler};
pub use config::{ButtonConfig, Fingerprint};
pub use context::{Geometry, RenderContext};
pub use error::{ScreenshotError, ScreenshotResult};
pub use runner::{RunnerConfig, ScreenshotRunner};
