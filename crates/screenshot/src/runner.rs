//! Main runner that orchestrates bundling, the browser session and visual regression

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::browser::{Page, SessionLauncher, SessionOptions};
use crate::bundle::{BundleRequest, Bundler};
use crate::case::{plan, SkipReason, TestCase};
use crate::config::ButtonConfig;
use crate::context::Geometry;
use crate::error::{ScreenshotError, ScreenshotResult};
use crate::render::{RenderConfig, Renderer};
use crate::visual::{BaselineStatus, VisualConfig, VisualTester};

/// Result of running a single case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub name: String,
    pub label: String,
    pub fingerprint: String,
    pub success: bool,
    pub skipped: Option<SkipReason>,
    pub duration_ms: u64,
    pub geometry: Option<Geometry>,
    pub baseline: Option<BaselineStatus>,
    pub dissimilarity: Option<f64>,
    pub diff_image_path: Option<String>,
    pub error: Option<String>,
}

impl CaseResult {
    fn new(case: &TestCase, skipped: Option<SkipReason>) -> Self {
        Self {
            name: case.name.clone(),
            label: case.label.clone(),
            fingerprint: case.fingerprint.to_string(),
            success: true,
            skipped,
            duration_ms: 0,
            geometry: None,
            baseline: None,
            dissimilarity: None,
            diff_image_path: None,
            error: None,
        }
    }
}

/// Result of running all cases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<CaseResult>,
}

impl SuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Configuration for the runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub bundle: BundleRequest,
    pub session: SessionOptions,
    pub render: RenderConfig,
    pub visual: VisualConfig,

    /// YAML file or directory of configurations
    pub configs_path: PathBuf,

    /// Output directory for results
    pub output_dir: PathBuf,

    /// Ceiling for a single case, from reset to comparison
    pub case_timeout: Duration,

    /// Optional ceiling for bundling, the session and every case together
    pub run_timeout: Option<Duration>,

    /// Only run cases whose name matches
    pub filter: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            bundle: BundleRequest::default(),
            session: SessionOptions::default(),
            render: RenderConfig::default(),
            visual: VisualConfig::default(),
            configs_path: PathBuf::from("tests/screenshot/configs.yaml"),
            output_dir: PathBuf::from("test-results"),
            case_timeout: Duration::from_secs(120),
            run_timeout: None,
            filter: None,
        }
    }
}

/// Screenshot regression runner
pub struct ScreenshotRunner {
    config: RunnerConfig,
    bundler: Box<dyn Bundler>,
    launcher: Box<dyn SessionLauncher>,
    renderer: Renderer,
}

impl ScreenshotRunner {
    pub fn new(
        config: RunnerConfig,
        bundler: Box<dyn Bundler>,
        launcher: Box<dyn SessionLauncher>,
    ) -> Self {
        let renderer = Renderer::new(config.render.clone());
        Self {
            config,
            bundler,
            launcher,
            renderer,
        }
    }

    /// Load the configured YAML and run every case in it
    pub async fn run_all(&self) -> ScreenshotResult<SuiteResult> {
        let configs = ButtonConfig::load_all(&self.config.configs_path)?;
        self.run(configs).await
    }

    /// Run a list of configurations against one shared browser session
    ///
    /// Setup failures and session-level faults abort the run. A case that
    /// exceeds `case_timeout` fails on its own. The session is closed exactly
    /// once on every path that opened it, including the run ceiling.
    pub async fn run(&self, configs: Vec<ButtonConfig>) -> ScreenshotResult<SuiteResult> {
        let started_at = Utc::now();
        let start = Instant::now();

        let filter = self.config.filter.as_deref().map(Regex::new).transpose()?;
        let cases = plan(configs, filter.as_ref())?;
        let selected = cases.iter().filter(|c| c.is_selected()).count();

        info!("Running {} of {} case(s)...", selected, cases.len());

        let visual = VisualTester::new(self.config.visual.clone())?;
        visual.clean_diffs()?;
        let mut session: Option<Box<dyn Page>> = None;

        let execution = self.execute(&cases, &visual, &mut session);
        let outcome = match self.config.run_timeout {
            Some(ceiling) => tokio::time::timeout(ceiling, execution).await.map_err(|_| ceiling),
            None => Ok(execution.await),
        };

        if let Some(page) = session.take() {
            if let Err(e) = page.close().await {
                warn!("Failed to close browser session: {}", e);
            }
        }

        let results = match outcome {
            Ok(results) => results?,
            Err(ceiling) => {
                error!("Run exceeded {:?}", ceiling);
                return Err(ScreenshotError::RunTimeout(ceiling));
            }
        };

        let passed = results.iter().filter(|r| r.success && r.skipped.is_none()).count();
        let failed = results.iter().filter(|r| !r.success).count();
        let skipped = results.iter().filter(|r| r.skipped.is_some()).count();
        let duration_ms = start.elapsed().as_millis() as u64;

        info!("");
        info!(
            "Screenshot Results: {} passed, {} failed, {} skipped ({} ms)",
            passed, failed, skipped, duration_ms
        );

        Ok(SuiteResult {
            started_at,
            total: results.len(),
            passed,
            failed,
            skipped,
            duration_ms,
            results,
        })
    }

    async fn execute(
        &self,
        cases: &[TestCase],
        visual: &VisualTester,
        session: &mut Option<Box<dyn Page>>,
    ) -> ScreenshotResult<Vec<CaseResult>> {
        let mut results = Vec::with_capacity(cases.len());

        if cases.iter().all(|c| !c.is_selected()) {
            warn!("No cases selected, skipping browser setup");
            return Ok(cases
                .iter()
                .map(|c| CaseResult::new(c, c.skip))
                .collect());
        }

        let bundle = self.bundler.bundle(&self.config.bundle).await?;
        let page: &dyn Page = &**session.insert(self.launcher.open(&bundle, &self.config.session).await?);

        for case in cases {
            if let Some(reason) = case.skip {
                debug!("Skipping {} ({:?})", case.name, reason);
                results.push(CaseResult::new(case, Some(reason)));
                continue;
            }

            info!("{}", case.name);
            let case_start = Instant::now();
            let mut result = CaseResult::new(case, None);

            let outcome = tokio::time::timeout(
                self.config.case_timeout,
                self.run_case(page, visual, case, &mut result),
            )
            .await
            .unwrap_or(Err(ScreenshotError::CaseTimeout(self.config.case_timeout)));

            match outcome {
                Ok(()) => {
                    info!("✓ {} ({} ms)", case.name, case_start.elapsed().as_millis());
                }
                Err(e) if e.is_fatal() => {
                    error!("✗ {} - {}", case.name, e);
                    return Err(e);
                }
                Err(e) => {
                    error!("✗ {} - {}", case.name, e);
                    result.success = false;
                    result.error = Some(e.to_string());
                }
            }

            result.duration_ms = case_start.elapsed().as_millis() as u64;
            results.push(result);
        }

        Ok(results)
    }

    /// Render, measure, capture and compare one case
    async fn run_case(
        &self,
        page: &dyn Page,
        visual: &VisualTester,
        case: &TestCase,
        result: &mut CaseResult,
    ) -> ScreenshotResult<()> {
        let geometry = self.renderer.render_and_measure(page, &case.config).await?;
        result.geometry = Some(geometry);

        let png = page.screenshot(&geometry).await?;
        let diff = visual.compare(case.fingerprint.as_str(), &png)?;

        result.baseline = Some(diff.status);
        result.dissimilarity = Some(diff.dissimilarity);
        result.diff_image_path = diff
            .diff_image_path
            .as_ref()
            .map(|p| p.to_string_lossy().to_string());

        if !diff.matches() {
            return Err(ScreenshotError::ScreenshotMismatch {
                name: case.fingerprint.to_string(),
                dissimilarity_percent: diff.dissimilarity * 100.0,
                threshold: visual.threshold().to_string(),
            });
        }

        Ok(())
    }

    /// Write results to JSON file
    pub fn write_results(&self, results: &SuiteResult) -> ScreenshotResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("screenshot-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}
