//! Playwright browser session

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bundle::Bundle;
use crate::context::{FrameProbe, Geometry, RenderContext};
use crate::error::{ScreenshotError, ScreenshotResult};

/// The shared page every configuration renders into
///
/// A page is used by one configuration at a time. `reset` must leave it
/// indistinguishable from a freshly opened page: no DOM from the previous
/// configuration and no installed test hooks.
#[async_trait]
pub trait Page: Send + Sync {
    /// Discard all page content and installed hooks
    async fn reset(&self) -> ScreenshotResult<()>;

    /// Create the container, install the overrides and start rendering
    ///
    /// Returns as soon as the render has started; rendering continues in the
    /// page.
    async fn mount(&self, ctx: &RenderContext) -> ScreenshotResult<()>;

    /// Look for the embedded frame inside the container
    async fn probe_frame(&self) -> ScreenshotResult<FrameProbe>;

    /// Remove every hook installed by `mount`
    async fn clear_overrides(&self) -> ScreenshotResult<()>;

    /// Names of the test hooks currently installed in the page
    async fn installed_hooks(&self) -> ScreenshotResult<Vec<String>>;

    /// PNG screenshot clipped to `clip`
    async fn screenshot(&self, clip: &Geometry) -> ScreenshotResult<Vec<u8>>;

    /// Release the browser. Calling it again is a no-op.
    async fn close(&self) -> ScreenshotResult<()>;
}

/// Opens a page with a bundle loaded into it
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn open(&self, bundle: &Bundle, options: &SessionOptions) -> ScreenshotResult<Box<dyn Page>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }

    pub fn parse(name: &str) -> Self {
        match name {
            "firefox" => Browser::Firefox,
            "webkit" => Browser::Webkit,
            _ => Browser::Chromium,
        }
    }
}

/// How the browser session is launched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub headless: bool,
    pub devtools: bool,
    pub browser: Browser,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            headless: true,
            devtools: false,
            browser: Browser::Chromium,
            viewport_width: 1280,
            viewport_height: 720,
        }
    }
}

impl SessionOptions {
    /// Apply `HEADLESS` / `DEVTOOLS` style toggles
    ///
    /// Anything but `0` keeps the browser headless; only `1` opens devtools.
    pub fn with_toggles(mut self, headless: Option<&str>, devtools: Option<&str>) -> Self {
        self.headless = headless != Some("0");
        self.devtools = devtools == Some("1");
        self
    }

    pub fn from_env() -> Self {
        let headless = std::env::var("HEADLESS").ok();
        let devtools = std::env::var("DEVTOOLS").ok();
        Self::default().with_toggles(headless.as_deref(), devtools.as_deref())
    }
}

/// Launches pages through a `node` process running Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightLauncher {
    /// Directory Playwright is resolved from
    pub project_dir: PathBuf,

    /// Time allowed for a graceful shutdown before the driver is killed
    pub shutdown_timeout: Duration,
}

impl PlaywrightLauncher {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    /// Check if Playwright is installed
    async fn check_playwright_installed(&self) -> ScreenshotResult<()> {
        let status = Command::new("npx")
            .args(["--no-install", "playwright", "--version"])
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(ScreenshotError::PlaywrightNotFound),
        }
    }
}

#[async_trait]
impl SessionLauncher for PlaywrightLauncher {
    async fn open(&self, bundle: &Bundle, options: &SessionOptions) -> ScreenshotResult<Box<dyn Page>> {
        self.check_playwright_installed().await?;
        let page = PlaywrightPage::launch(self, bundle, options).await?;
        Ok(Box::new(page))
    }
}

struct DriverIo {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    closed: bool,
}

#[derive(Debug, Serialize)]
struct DriverRequest<'a> {
    id: u64,
    cmd: &'a str,
    args: Value,
}

#[derive(Debug, Deserialize)]
struct DriverResponse {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

/// A Playwright page owned by a long-lived driver process
///
/// Commands are written to the driver's stdin as one JSON object per line and
/// answered on stdout with a matching `id`.
pub struct PlaywrightPage {
    io: Mutex<DriverIo>,
    next_id: AtomicU64,
    shutdown_timeout: Duration,
    _script_dir: tempfile::TempDir,
}

impl PlaywrightPage {
    async fn launch(
        launcher: &PlaywrightLauncher,
        bundle: &Bundle,
        options: &SessionOptions,
    ) -> ScreenshotResult<Self> {
        let script_dir = tempfile::tempdir()?;
        let script_path = write_driver(script_dir.path())?;

        info!(
            "Launching {} (headless: {}, devtools: {})",
            options.browser.as_str(),
            options.headless,
            options.devtools
        );

        let mut child = Command::new("node")
            .arg(&script_path)
            .current_dir(&launcher.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScreenshotError::BrowserLaunch(format!("failed to spawn node: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ScreenshotError::BrowserLaunch("driver stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScreenshotError::BrowserLaunch("driver stdout unavailable".into()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[driver] {}", line);
                }
            });
        }

        let page = Self {
            io: Mutex::new(DriverIo {
                child,
                stdin,
                stdout: BufReader::new(stdout).lines(),
                closed: false,
            }),
            next_id: AtomicU64::new(1),
            shutdown_timeout: launcher.shutdown_timeout,
            _script_dir: script_dir,
        };

        let args = json!({
            "bundlePath": bundle.path,
            "browser": options.browser.as_str(),
            "headless": options.headless,
            "devtools": options.devtools,
            "viewport": { "width": options.viewport_width, "height": options.viewport_height },
        });

        if let Err(e) = page.call("open", args).await {
            let _ = page.close().await;
            return Err(ScreenshotError::BrowserLaunch(e.to_string()));
        }

        Ok(page)
    }

    /// Send one command and wait for its response
    async fn call(&self, cmd: &str, args: Value) -> ScreenshotResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut io = self.io.lock().await;

        if io.closed {
            return Err(ScreenshotError::Driver(format!("session closed before '{}'", cmd)));
        }

        let mut line = serde_json::to_string(&DriverRequest { id, cmd, args })?;
        line.push('\n');
        debug!("-> {} #{}", cmd, id);

        io.stdin.write_all(line.as_bytes()).await?;
        io.stdin.flush().await?;

        loop {
            let Some(raw) = io.stdout.next_line().await? else {
                return Err(ScreenshotError::Driver(format!("driver exited during '{}'", cmd)));
            };

            let response: DriverResponse = match serde_json::from_str(&raw) {
                Ok(response) => response,
                Err(_) => {
                    debug!("[driver] {}", raw);
                    continue;
                }
            };

            if response.id != id {
                warn!("Dropping stale driver response #{}", response.id);
                continue;
            }

            debug!("<- {} #{} ok={}", cmd, id, response.ok);

            return if response.ok {
                Ok(response.value)
            } else {
                Err(ScreenshotError::Driver(format!(
                    "{}: {}",
                    cmd,
                    response.error.unwrap_or_else(|| "unknown error".to_string())
                )))
            };
        }
    }
}

#[async_trait]
impl Page for PlaywrightPage {
    async fn reset(&self) -> ScreenshotResult<()> {
        self.call("reset", Value::Null).await?;
        Ok(())
    }

    async fn mount(&self, ctx: &RenderContext) -> ScreenshotResult<()> {
        self.call("mount", serde_json::to_value(ctx)?).await?;
        Ok(())
    }

    async fn probe_frame(&self) -> ScreenshotResult<FrameProbe> {
        let value = self.call("probe", Value::Null).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn clear_overrides(&self) -> ScreenshotResult<()> {
        self.call("clearOverrides", Value::Null).await?;
        Ok(())
    }

    async fn installed_hooks(&self) -> ScreenshotResult<Vec<String>> {
        let value = self.call("hooks", Value::Null).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn screenshot(&self, clip: &Geometry) -> ScreenshotResult<Vec<u8>> {
        let value = self.call("screenshot", json!({ "clip": clip })).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| ScreenshotError::Driver("screenshot returned no data".into()))?;

        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ScreenshotError::Driver(format!("invalid screenshot encoding: {}", e)))
    }

    async fn close(&self) -> ScreenshotResult<()> {
        let mut io = self.io.lock().await;
        if io.closed {
            return Ok(());
        }
        io.closed = true;

        info!("Closing browser session");

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = format!("{}\n", serde_json::to_string(&DriverRequest { id, cmd: "close", args: Value::Null })?);
        if let Err(e) = io.stdin.write_all(line.as_bytes()).await {
            debug!("Driver stdin already closed: {}", e);
        }

        match tokio::time::timeout(self.shutdown_timeout, io.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Driver exited with {}", status);
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!("Driver did not exit within {:?}, terminating", self.shutdown_timeout);
                terminate(&mut io.child).await;
                Ok(())
            }
        }
    }
}

/// SIGTERM first, then kill
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    let _ = child.kill().await;
}

impl Drop for PlaywrightPage {
    fn drop(&mut self) {
        let io = self.io.get_mut();
        if !io.closed {
            warn!("Browser session dropped without close, killing driver");
            let _ = io.child.start_kill();
        }
    }
}

/// Node program that owns the browser and answers driver commands
const DRIVER_SCRIPT: &str = include_str!("driver/driver.js");

/// CommonJS module exporting `installHarness`, which the driver evaluates in
/// the page to create `window.__screenshotHarness__`
pub const HARNESS_SCRIPT: &str = include_str!("driver/harness.js");

/// Write the driver and the harness module it requires; returns the entry script
fn write_driver(dir: &Path) -> ScreenshotResult<PathBuf> {
    std::fs::write(dir.join("harness.js"), HARNESS_SCRIPT)?;
    let entry = dir.join("driver.js");
    std::fs::write(&entry, DRIVER_SCRIPT)?;
    Ok(entry)
}
