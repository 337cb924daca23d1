//! Error types for the screenshot harness

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScreenshotError {
    #[error("Bundle entry not found: {}", .0.display())]
    EntryNotFound(PathBuf),

    #[error("webpack not found. Install with: npm install --save-dev webpack webpack-cli")]
    BundlerNotFound,

    #[error("Bundle failed: {0}")]
    BundleFailed(String),

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Browser failed to launch: {0}")]
    BrowserLaunch(String),

    #[error("Playwright driver error: {0}")]
    Driver(String),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Run timed out after {0:?}")]
    RunTimeout(Duration),

    #[error("Case timed out after {0:?}")]
    CaseTimeout(Duration),

    #[error("Button frame not found after {waited_ms} ms{}", render_suffix(.render_error))]
    FrameNotFound {
        waited_ms: u64,
        render_error: Option<String>,
    },

    #[error("Button width is 0")]
    ZeroWidth,

    #[error("Button height is 0")]
    ZeroHeight,

    #[error("Test hooks still installed after render: {0}")]
    HookLeak(String),

    #[error("Screenshot size {actual:?} does not match baseline size {baseline:?}")]
    SizeMismatch {
        actual: (u32, u32),
        baseline: (u32, u32),
    },

    #[error("Screenshot mismatch: {name} differs by {dissimilarity_percent:.2}% (threshold: {threshold})")]
    ScreenshotMismatch {
        name: String,
        dissimilarity_percent: f64,
        threshold: String,
    },

    #[error("Image comparison failed: {0}")]
    Comparison(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid filter: {0}")]
    Filter(#[from] regex::Error),
}

impl ScreenshotError {
    /// Whether this error invalidates the whole run rather than one case.
    ///
    /// Measurement and comparison faults only fail the case that raised them;
    /// the shared page stays usable for the next configuration.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ScreenshotError::FrameNotFound { .. }
                | ScreenshotError::CaseTimeout(_)
                | ScreenshotError::ZeroWidth
                | ScreenshotError::ZeroHeight
                | ScreenshotError::HookLeak(_)
                | ScreenshotError::SizeMismatch { .. }
                | ScreenshotError::ScreenshotMismatch { .. }
                | ScreenshotError::Comparison(_)
                | ScreenshotError::Image(_)
        )
    }

    /// Whether the local toolchain needed to run the harness is missing.
    pub fn is_environment_unavailable(&self) -> bool {
        matches!(
            self,
            ScreenshotError::EntryNotFound(_)
                | ScreenshotError::BundlerNotFound
                | ScreenshotError::PlaywrightNotFound
        )
    }
}

fn render_suffix(render_error: &Option<String>) -> String {
    render_error
        .as_deref()
        .map(|e| format!(" (render failed: {})", e))
        .unwrap_or_default()
}

pub type ScreenshotResult<T> = Result<T, ScreenshotError>;
