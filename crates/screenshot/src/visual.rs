//! Visual regression testing with SSIM screenshot comparison

use dssim::Dssim;
use image::{GenericImageView, Pixel, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{ScreenshotError, ScreenshotResult};

/// Dissimilarity ratio a capture may reach before it fails, 0.01 = 1%
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailureThreshold(pub f64);

impl FailureThreshold {
    pub fn exceeded(&self, dissimilarity: f64) -> bool {
        dissimilarity > self.0
    }
}

impl Default for FailureThreshold {
    fn default() -> Self {
        FailureThreshold(0.01)
    }
}

impl fmt::Display for FailureThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}%", self.0 * 100.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineStatus {
    /// Within threshold of the existing baseline
    Matched,
    /// No baseline existed; the capture became the baseline
    Recorded,
    /// Baseline overwritten on request
    Updated,
    /// Beyond threshold of the existing baseline
    Mismatched,
}

/// Result of a visual comparison
#[derive(Debug, Clone)]
pub struct VisualDiff {
    pub status: BaselineStatus,

    /// `1 - SSIM` between capture and baseline
    pub dissimilarity: f64,

    /// Pixels differing beyond the per-channel tolerance
    pub diff_pixels: u64,

    pub total_pixels: u64,

    /// Path to the diff image (if generated)
    pub diff_image_path: Option<PathBuf>,

    pub actual_path: PathBuf,

    pub baseline_path: PathBuf,

    /// Hash of the actual screenshot
    pub actual_hash: String,
}

impl VisualDiff {
    pub fn matches(&self) -> bool {
        self.status != BaselineStatus::Mismatched
    }
}

/// Configuration for visual testing
#[derive(Debug, Clone)]
pub struct VisualConfig {
    pub baseline_dir: PathBuf,
    pub actual_dir: PathBuf,
    pub diff_dir: PathBuf,
    pub threshold: FailureThreshold,
    pub update_baselines: bool,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            baseline_dir: PathBuf::from("tests/screenshot/images"),
            actual_dir: PathBuf::from("test-results/screenshots"),
            diff_dir: PathBuf::from("test-results/diffs"),
            threshold: FailureThreshold::default(),
            update_baselines: false,
        }
    }
}

/// Compares captures against baselines keyed by name
pub struct VisualTester {
    config: VisualConfig,
    dssim: Dssim,
}

impl VisualTester {
    pub fn new(config: VisualConfig) -> ScreenshotResult<Self> {
        std::fs::create_dir_all(&config.baseline_dir)?;
        std::fs::create_dir_all(&config.actual_dir)?;
        std::fs::create_dir_all(&config.diff_dir)?;

        Ok(Self {
            config,
            dssim: Dssim::new(),
        })
    }

    pub fn threshold(&self) -> FailureThreshold {
        self.config.threshold
    }

    pub fn baseline_path(&self, name: &str) -> PathBuf {
        self.config.baseline_dir.join(format!("{}.png", name))
    }

    /// Compare a PNG capture against the baseline called `name`
    ///
    /// A missing baseline is recorded from the capture and counts as a match.
    pub fn compare(&self, name: &str, actual_png: &[u8]) -> ScreenshotResult<VisualDiff> {
        let actual_path = self.config.actual_dir.join(format!("{}.png", name));
        let baseline_path = self.baseline_path(name);

        std::fs::write(&actual_path, actual_png)?;
        let actual_hash = hash_bytes(actual_png);
        let actual_img = image::load_from_memory(actual_png)?;
        let total_pixels = actual_img.width() as u64 * actual_img.height() as u64;

        let recorded = |status| VisualDiff {
            status,
            dissimilarity: 0.0,
            diff_pixels: 0,
            total_pixels,
            diff_image_path: None,
            actual_path: actual_path.clone(),
            baseline_path: baseline_path.clone(),
            actual_hash: actual_hash.clone(),
        };

        if self.config.update_baselines {
            std::fs::write(&baseline_path, actual_png)?;
            info!("Updated baseline for '{}'", name);
            return Ok(recorded(BaselineStatus::Updated));
        }

        if !baseline_path.exists() {
            std::fs::write(&baseline_path, actual_png)?;
            info!("Recorded new baseline for '{}'", name);
            return Ok(recorded(BaselineStatus::Recorded));
        }

        let baseline_bytes = std::fs::read(&baseline_path)?;
        if hash_bytes(&baseline_bytes) == actual_hash {
            debug!("Screenshots match exactly (same hash)");
            return Ok(recorded(BaselineStatus::Matched));
        }

        let baseline_img = image::load_from_memory(&baseline_bytes)?;
        if actual_img.dimensions() != baseline_img.dimensions() {
            return Err(ScreenshotError::SizeMismatch {
                actual: actual_img.dimensions(),
                baseline: baseline_img.dimensions(),
            });
        }

        let dissimilarity = self.ssim_dissimilarity(&baseline_path, &actual_path)?;
        let mismatched = self.config.threshold.exceeded(dissimilarity);

        let (diff_pixels, diff_img) = pixel_diff(&actual_img.to_rgba8(), &baseline_img.to_rgba8());

        let diff_image_path = if mismatched {
            let path = self.config.diff_dir.join(format!("{}-diff.png", name));
            diff_img.save(&path)?;
            warn!(
                "Visual regression detected in '{}': {:.2}% dissimilar (threshold: {})",
                name,
                dissimilarity * 100.0,
                self.config.threshold
            );
            Some(path)
        } else {
            None
        };

        Ok(VisualDiff {
            status: if mismatched {
                BaselineStatus::Mismatched
            } else {
                BaselineStatus::Matched
            },
            dissimilarity,
            diff_pixels,
            total_pixels,
            diff_image_path,
            actual_path,
            baseline_path,
            actual_hash,
        })
    }

    /// `1 - SSIM`, derived from the DSSIM value `1 / SSIM - 1`
    fn ssim_dissimilarity(&self, baseline: &Path, actual: &Path) -> ScreenshotResult<f64> {
        let load = |path: &Path| {
            dssim::load_image(&self.dssim, path).map_err(|e| {
                ScreenshotError::Comparison(format!("{}: {}", path.display(), e))
            })
        };

        let baseline_img = load(baseline)?;
        let actual_img = load(actual)?;
        let (dssim, _) = self.dssim.compare(&baseline_img, actual_img);
        let dssim = f64::from(dssim);

        Ok(dssim / (1.0 + dssim))
    }

    /// Remove diff images left by an earlier run
    pub fn clean_diffs(&self) -> ScreenshotResult<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.config.diff_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map(|e| e == "png").unwrap_or(false) {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Removed {} stale diff image(s)", removed);
        }
        Ok(removed)
    }
}

/// Red marks where pixels differ, the dimmed capture elsewhere
fn pixel_diff(actual: &RgbaImage, baseline: &RgbaImage) -> (u64, RgbaImage) {
    // Allow small color differences (anti-aliasing, compression)
    const TOLERANCE: i32 = 5;

    let (width, height) = actual.dimensions();
    let mut diff_img = RgbaImage::new(width, height);
    let mut diff_pixels = 0u64;

    for (x, y, actual_pixel) in actual.enumerate_pixels() {
        let baseline_pixel = baseline.get_pixel(x, y);
        let differs = actual_pixel
            .channels()
            .iter()
            .zip(baseline_pixel.channels())
            .any(|(a, b)| (*a as i32 - *b as i32).abs() > TOLERANCE);

        if differs {
            diff_pixels += 1;
            diff_img.put_pixel(x, y, image::Rgba([255, 0, 0, 255]));
        } else {
            let c = actual_pixel.channels();
            diff_img.put_pixel(x, y, image::Rgba([c[0] / 2, c[1] / 2, c[2] / 2, 128]));
        }
    }

    (diff_pixels, diff_img)
}

fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
