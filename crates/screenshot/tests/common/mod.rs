//! Scripted page, bundler and launcher shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use button_screenshot::browser::{Page, SessionLauncher, SessionOptions};
use button_screenshot::bundle::{Bundle, BundleRequest, Bundler};
use button_screenshot::context::{FrameProbe, Geometry, RenderContext};
use button_screenshot::render::RenderConfig;
use button_screenshot::runner::{RunnerConfig, ScreenshotRunner};
use button_screenshot::visual::VisualConfig;
use button_screenshot::wait::PollPolicy;
use button_screenshot::{ScreenshotError, ScreenshotResult};

/// How the page behaves for one mounted configuration
#[derive(Debug, Clone)]
pub struct FrameScript {
    /// Probes that find nothing before the frame shows up
    pub probes_before_frame: usize,
    /// Frame rectangle; `None` means the frame never shows up
    pub rect: Option<Geometry>,
    pub render_error: Option<String>,
    /// Hook that survives `clear_overrides`
    pub leak_hook: Option<String>,
    /// Mount never returns
    pub hang: bool,
    /// Screenshot fails with a driver error
    pub driver_crash: bool,
    /// Fill color of the screenshot
    pub color: [u8; 4],
}

impl Default for FrameScript {
    fn default() -> Self {
        Self {
            probes_before_frame: 1,
            rect: Some(button_rect(200.0, 45.0)),
            render_error: None,
            leak_hook: None,
            hang: false,
            driver_crash: false,
            color: [255, 196, 57, 255],
        }
    }
}

pub fn button_rect(width: f64, height: f64) -> Geometry {
    Geometry { x: 8.0, y: 8.0, width, height }
}

type Script = Box<dyn Fn(&RenderContext) -> FrameScript + Send + Sync>;

pub struct PageState {
    script: Script,
    current: Option<FrameScript>,
    probes_since_mount: usize,

    pub resets: usize,
    pub mounts: Vec<RenderContext>,
    /// Hooks present right after each mount
    pub hooks_at_mount: Vec<Vec<String>>,
    pub hooks: Vec<String>,
    pub probes: usize,
    pub screenshots: Vec<Geometry>,
    pub closes: usize,
}

impl PageState {
    pub fn new(script: impl Fn(&RenderContext) -> FrameScript + Send + Sync + 'static) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            script: Box::new(script),
            current: None,
            probes_since_mount: 0,
            resets: 0,
            mounts: Vec::new(),
            hooks_at_mount: Vec::new(),
            hooks: Vec::new(),
            probes: 0,
            screenshots: Vec::new(),
            closes: 0,
        }))
    }
}

pub struct ScriptedPage {
    pub state: Arc<Mutex<PageState>>,
}

#[async_trait]
impl Page for ScriptedPage {
    async fn reset(&self) -> ScreenshotResult<()> {
        let mut state = self.state.lock().unwrap();
        state.resets += 1;
        state.hooks.clear();
        state.current = None;
        Ok(())
    }

    async fn mount(&self, ctx: &RenderContext) -> ScreenshotResult<()> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            let overrides = &ctx.overrides;
            let mut hooks = Vec::new();
            if overrides.funding_eligibility.is_some() {
                hooks.push("__TEST_FUNDING_ELIGIBILITY__".to_string());
            }
            if overrides.wallet.is_some() {
                hooks.push("__TEST_WALLET__".to_string());
            }
            if overrides.remembered_funding.is_some() {
                hooks.push("__TEST_REMEMBERED_FUNDING__".to_string());
            }
            if overrides.user_agent.is_some() {
                for hook in ["navigator.mockUserAgent", "outerHeight", "innerHeight", "screen"] {
                    hooks.push(hook.to_string());
                }
            }

            let script = (state.script)(ctx);
            let hang = script.hang;
            state.hooks = hooks.clone();
            state.hooks_at_mount.push(hooks);
            state.mounts.push(ctx.clone());
            state.current = Some(script);
            state.probes_since_mount = 0;
            hang
        };

        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn probe_frame(&self) -> ScreenshotResult<FrameProbe> {
        let mut state = self.state.lock().unwrap();
        state.probes += 1;
        state.probes_since_mount += 1;

        let seen = state.probes_since_mount;
        let script = state
            .current
            .clone()
            .ok_or_else(|| ScreenshotError::Driver("probe before mount".into()))?;

        let rect = if seen > script.probes_before_frame { script.rect } else { None };
        Ok(FrameProbe { rect, render_error: script.render_error })
    }

    async fn clear_overrides(&self) -> ScreenshotResult<()> {
        let mut state = self.state.lock().unwrap();
        state.hooks.clear();
        if let Some(hook) = state.current.as_ref().and_then(|s| s.leak_hook.clone()) {
            state.hooks.push(hook);
        }
        Ok(())
    }

    async fn installed_hooks(&self) -> ScreenshotResult<Vec<String>> {
        Ok(self.state.lock().unwrap().hooks.clone())
    }

    async fn screenshot(&self, clip: &Geometry) -> ScreenshotResult<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        let script = state.current.clone().unwrap_or_default();
        if script.driver_crash {
            return Err(ScreenshotError::Driver("driver exited during 'screenshot'".into()));
        }
        state.screenshots.push(*clip);
        Ok(png(clip.width as u32, clip.height as u32, script.color))
    }

    async fn close(&self) -> ScreenshotResult<()> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}

pub struct StubLauncher {
    pub state: Arc<Mutex<PageState>>,
    pub opens: Arc<AtomicUsize>,
}

#[async_trait]
impl SessionLauncher for StubLauncher {
    async fn open(&self, _bundle: &Bundle, _options: &SessionOptions) -> ScreenshotResult<Box<dyn Page>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedPage { state: self.state.clone() }))
    }
}

pub struct StubBundler {
    pub fail: bool,
}

#[async_trait]
impl Bundler for StubBundler {
    async fn bundle(&self, _request: &BundleRequest) -> ScreenshotResult<Bundle> {
        if self.fail {
            return Err(ScreenshotError::BundleFailed("Module not found: ./test/paypal.js".into()));
        }
        Ok(Bundle::new(PathBuf::from("paypal.js"), 0))
    }
}

pub fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba(color));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageOutputFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Render timings short enough for tests
pub fn fast_render_config() -> RenderConfig {
    RenderConfig {
        content: serde_json::json!({ "payWith": "Pay with" }),
        settle: Duration::from_millis(1),
        frame_poll: PollPolicy {
            interval: Duration::from_millis(1),
            max_wait: Duration::from_millis(200),
        },
        ..Default::default()
    }
}

pub fn runner_config(dir: &Path) -> RunnerConfig {
    RunnerConfig {
        render: fast_render_config(),
        visual: VisualConfig {
            baseline_dir: dir.join("images"),
            actual_dir: dir.join("results/screenshots"),
            diff_dir: dir.join("results/diffs"),
            ..Default::default()
        },
        configs_path: dir.join("configs.yaml"),
        output_dir: dir.join("results"),
        case_timeout: Duration::from_secs(10),
        ..Default::default()
    }
}

pub struct Harness {
    pub runner: ScreenshotRunner,
    pub state: Arc<Mutex<PageState>>,
    pub opens: Arc<AtomicUsize>,
}

pub fn harness(config: RunnerConfig, state: Arc<Mutex<PageState>>) -> Harness {
    harness_with_bundler(config, state, StubBundler { fail: false })
}

pub fn harness_with_bundler(
    config: RunnerConfig,
    state: Arc<Mutex<PageState>>,
    bundler: StubBundler,
) -> Harness {
    let opens = Arc::new(AtomicUsize::new(0));
    let launcher = StubLauncher {
        state: state.clone(),
        opens: opens.clone(),
    };
    Harness {
        runner: ScreenshotRunner::new(config, Box::new(bundler), Box::new(launcher)),
        state,
        opens,
    }
}
