//! Expanding configurations into named test cases

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{ButtonConfig, Fingerprint};
use crate::error::ScreenshotResult;

/// One configuration, with the identity it is reported and stored under
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub label: String,
    pub fingerprint: Fingerprint,
    pub config: ButtonConfig,
    pub skip: Option<SkipReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another configuration is marked `only`
    NotFocused,
    /// Name does not match the run filter
    Filtered,
}

impl TestCase {
    pub fn new(config: ButtonConfig) -> ScreenshotResult<Self> {
        let label = config.label()?;
        Ok(Self {
            name: format!("Render button with {}", label),
            label,
            fingerprint: config.fingerprint()?,
            config,
            skip: None,
        })
    }

    pub fn is_selected(&self) -> bool {
        self.skip.is_none()
    }
}

/// Build the cases for a run
///
/// When any configuration is marked `only`, every unmarked case is skipped.
/// The filter then applies to whatever is still selected.
pub fn plan(configs: Vec<ButtonConfig>, filter: Option<&Regex>) -> ScreenshotResult<Vec<TestCase>> {
    let focused = configs.iter().any(|c| c.only);

    configs
        .into_iter()
        .map(|config| {
            let mut case = TestCase::new(config)?;

            if focused && !case.config.only {
                case.skip = Some(SkipReason::NotFocused);
            } else if let Some(filter) = filter {
                if !filter.is_match(&case.name) {
                    case.skip = Some(SkipReason::Filtered);
                }
            }

            Ok(case)
        })
        .collect()
}
