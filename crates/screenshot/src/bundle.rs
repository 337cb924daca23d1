//! Widget bundle compilation

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{ScreenshotError, ScreenshotResult};

/// What to compile and which globals to inject into it
#[derive(Debug, Clone, PartialEq)]
pub struct BundleRequest {
    /// Entry module, relative to the project directory
    pub entry: PathBuf,

    /// How the library is exposed; `window` assigns it to a global
    pub library_target: String,

    /// Compile-time `__TEST__` flag
    pub test: bool,

    /// Compile-time `__WEB__` flag
    pub web: bool,

    /// Global variable bindings, each replaced by its JSON literal
    pub vars: BTreeMap<String, Value>,
}

impl Default for BundleRequest {
    fn default() -> Self {
        Self {
            entry: PathBuf::from("./test/paypal.js"),
            library_target: "window".to_string(),
            test: true,
            web: false,
            vars: BTreeMap::new(),
        }
    }
}

/// An executable bundle on disk, ready to be injected into a page
#[derive(Debug)]
pub struct Bundle {
    pub path: PathBuf,
    pub size: u64,

    /// Keeps the output directory of a fresh compilation alive
    _out_dir: Option<tempfile::TempDir>,
}

impl Bundle {
    pub fn new(path: PathBuf, size: u64) -> Self {
        Self { path, size, _out_dir: None }
    }
}

/// Produces a bundle from a request
#[async_trait]
pub trait Bundler: Send + Sync {
    async fn bundle(&self, request: &BundleRequest) -> ScreenshotResult<Bundle>;
}

/// Compiles the entry with webpack through `npx`
#[derive(Debug, Clone)]
pub struct WebpackBundler {
    /// Directory holding `node_modules` and the entry module
    pub project_dir: PathBuf,

    /// Optional base webpack config (loaders, resolve rules) to extend
    pub base_config: Option<PathBuf>,
}

impl WebpackBundler {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            base_config: None,
        }
    }

    pub fn with_base_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_config = Some(path.into());
        self
    }

    /// Check that webpack is resolvable from the project without downloading it
    async fn check_webpack_installed(&self) -> ScreenshotResult<()> {
        let status = Command::new("npx")
            .args(["--no-install", "webpack", "--version"])
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(ScreenshotError::BundlerNotFound),
        }
    }

    /// Build the webpack config module for a request
    pub fn build_config(&self, request: &BundleRequest, out_dir: &Path) -> ScreenshotResult<String> {
        let entry = self.project_dir.join(&request.entry);
        let base = match &self.base_config {
            Some(path) => format!("require({})", js_string(&self.project_dir.join(path).to_string_lossy())?),
            None => "{}".to_string(),
        };

        let mut defines = BTreeMap::new();
        defines.insert("__TEST__".to_string(), Value::Bool(request.test));
        defines.insert("__WEB__".to_string(), Value::Bool(request.web));
        for (name, value) in &request.vars {
            defines.insert(name.clone(), value.clone());
        }

        Ok(format!(
            r#"
const webpack = require(require.resolve('webpack', {{ paths: [process.cwd()] }}));

const base = {base};
const defines = {defines};

module.exports = {{
  ...base,
  mode: base.mode || 'development',
  devtool: false,
  entry: {entry},
  output: {{
    ...(base.output || {{}}),
    path: {out_dir},
    filename: 'bundle.js',
    library: {{ type: {target} }},
  }},
  plugins: [
    ...(base.plugins || []),
    new webpack.DefinePlugin(
      Object.fromEntries(Object.entries(defines).map(([key, value]) => [key, JSON.stringify(value)]))
    ),
  ],
}};
"#,
            base = base,
            defines = serde_json::to_string(&defines)?,
            entry = js_string(&entry.to_string_lossy())?,
            out_dir = js_string(&out_dir.to_string_lossy())?,
            target = js_string(&request.library_target)?,
        ))
    }
}

#[async_trait]
impl Bundler for WebpackBundler {
    async fn bundle(&self, request: &BundleRequest) -> ScreenshotResult<Bundle> {
        let entry = self.project_dir.join(&request.entry);
        if !entry.exists() {
            return Err(ScreenshotError::EntryNotFound(entry));
        }

        self.check_webpack_installed().await?;

        let out_dir = tempfile::tempdir()?;
        let config_path = out_dir.path().join("webpack.config.js");
        std::fs::write(&config_path, self.build_config(request, out_dir.path())?)?;

        info!("Compiling {} with webpack", entry.display());
        debug!("webpack config: {}", config_path.display());

        let output = Command::new("npx")
            .args(["--no-install", "webpack", "--config"])
            .arg(&config_path)
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(ScreenshotError::BundleFailed(format!(
                "webpack failed:\nstdout: {}\nstderr: {}",
                stdout, stderr
            )));
        }

        let path = out_dir.path().join("bundle.js");
        let size = std::fs::metadata(&path)
            .map_err(|e| ScreenshotError::BundleFailed(format!("no output at {}: {}", path.display(), e)))?
            .len();

        info!("Bundle ready ({} bytes)", size);

        Ok(Bundle {
            path,
            size,
            _out_dir: Some(out_dir),
        })
    }
}

/// A bundle compiled ahead of time
#[derive(Debug, Clone)]
pub struct PrebuiltBundle {
    pub path: PathBuf,
}

#[async_trait]
impl Bundler for PrebuiltBundle {
    async fn bundle(&self, _request: &BundleRequest) -> ScreenshotResult<Bundle> {
        if !self.path.is_file() {
            return Err(ScreenshotError::EntryNotFound(self.path.clone()));
        }

        let size = std::fs::metadata(&self.path)?.len();
        info!("Using prebuilt bundle {} ({} bytes)", self.path.display(), size);

        Ok(Bundle::new(self.path.clone(), size))
    }
}

/// Read bundle variables from a YAML or JSON mapping
pub fn load_vars(path: &Path) -> ScreenshotResult<BTreeMap<String, Value>> {
    let content = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&content)
        .map_err(|e| ScreenshotError::ConfigParse(format!("{}: {}", path.display(), e)))
}

/// Parse a `NAME=<json>` binding; a value that is not JSON is taken as a string
pub fn parse_var(binding: &str) -> ScreenshotResult<(String, Value)> {
    let (name, raw) = binding
        .split_once('=')
        .ok_or_else(|| ScreenshotError::ConfigParse(format!("expected NAME=VALUE, got '{}'", binding)))?;

    if name.is_empty() {
        return Err(ScreenshotError::ConfigParse(format!("empty variable name in '{}'", binding)));
    }

    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}

fn js_string(s: &str) -> ScreenshotResult<String> {
    Ok(serde_json::to_string(s)?)
}
