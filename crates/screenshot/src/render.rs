//! Rendering one configuration and measuring its frame

use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::browser::Page;
use crate::config::ButtonConfig;
use crate::context::{FrameProbe, Geometry, RenderContext, DEFAULT_CONTAINER_WIDTH};
use crate::error::{ScreenshotError, ScreenshotResult};
use crate::wait::{poll_until, PollPolicy};

/// Configuration for the per-configuration renderer
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Dotted path of the widget factory on `window`
    pub factory: String,

    /// Shared test content merged into every configuration's button options
    pub content: Value,

    pub default_width: u32,

    /// Wait after starting the render before looking for the frame
    pub settle: Duration,

    /// How to look for the frame once settled
    pub frame_poll: PollPolicy,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            factory: "paypal.Buttons".to_string(),
            content: Value::Object(Default::default()),
            default_width: DEFAULT_CONTAINER_WIDTH,
            settle: Duration::from_millis(300),
            frame_poll: PollPolicy::default(),
        }
    }
}

pub struct Renderer {
    config: RenderConfig,
}

impl Renderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn context_for(&self, config: &ButtonConfig) -> RenderContext {
        RenderContext::for_config(
            config,
            &self.config.factory,
            &self.config.content,
            self.config.default_width,
        )
    }

    /// Render `config` into a freshly reset page and return the frame geometry
    ///
    /// Overrides are cleared whether or not the frame showed up, and the page
    /// is then checked for leftover hooks before the geometry is trusted.
    pub async fn render_and_measure(
        &self,
        page: &dyn Page,
        config: &ButtonConfig,
    ) -> ScreenshotResult<Geometry> {
        page.reset().await?;

        let ctx = self.context_for(config);
        debug!(
            "Mounting button (width: {}, overrides: {})",
            ctx.container_width,
            !ctx.overrides.is_empty()
        );

        let mounted = page.mount(&ctx).await;
        let measured = match mounted {
            Ok(()) => self.wait_for_frame(page).await,
            Err(e) => Err(e),
        };

        let cleared = page.clear_overrides().await;
        let geometry = measured?;
        cleared?;

        let leaked = page.installed_hooks().await?;
        if !leaked.is_empty() {
            return Err(ScreenshotError::HookLeak(leaked.join(", ")));
        }

        debug!(
            "Measured frame at ({}, {}) {}x{}",
            geometry.x, geometry.y, geometry.width, geometry.height
        );

        geometry.ensure_visible()
    }

    /// Settle, then poll until the frame shows up or the render reports an error
    async fn wait_for_frame(&self, page: &dyn Page) -> ScreenshotResult<Geometry> {
        sleep(self.config.settle).await;

        let polled = poll_until(self.config.frame_poll, || async move {
            let probe = page.probe_frame().await?;
            let settled = probe.rect.is_some() || probe.render_error.is_some();
            Ok(settled.then_some(probe))
        })
        .await?;

        match polled.value {
            Some(FrameProbe { rect: Some(geometry), .. }) => Ok(geometry),
            probe => Err(ScreenshotError::FrameNotFound {
                waited_ms: (self.config.settle + polled.waited).as_millis() as u64,
                render_error: probe.and_then(|p| p.render_error),
            }),
        }
    }
}
