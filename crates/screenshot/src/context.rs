//! Render context handed to the page, and the geometry read back from it

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ButtonConfig;
use crate::error::{ScreenshotError, ScreenshotResult};

/// Container width used when a configuration does not request one
pub const DEFAULT_CONTAINER_WIDTH: u32 = 200;

/// Screen and outer window height reported while a user agent is mocked
pub const MOBILE_SCREEN_HEIGHT: u32 = 667;

/// Inner window height reported while a user agent is mocked
pub const MOBILE_INNER_HEIGHT: u32 = 553;

/// Everything the page needs to render one configuration
///
/// Environment overrides travel with the context instead of being written to
/// page globals by the caller. The page driver installs them for the duration
/// of a single render and removes them afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderContext {
    /// Dotted path of the widget factory on `window`, e.g. `paypal.Buttons`
    pub factory: String,
    pub container_width: u32,
    /// Button options with the shared test content merged in
    pub button: Map<String, Value>,
    pub overrides: EnvironmentOverrides,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funding_eligibility: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remembered_funding: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<UserAgentOverride>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAgentOverride {
    pub user_agent: String,
    pub viewport: MobileViewport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileViewport {
    pub screen_height: u32,
    pub outer_height: u32,
    pub inner_height: u32,
}

impl Default for MobileViewport {
    fn default() -> Self {
        Self {
            screen_height: MOBILE_SCREEN_HEIGHT,
            outer_height: MOBILE_SCREEN_HEIGHT,
            inner_height: MOBILE_INNER_HEIGHT,
        }
    }
}

impl EnvironmentOverrides {
    /// Overrides requested by a configuration; falsy values install nothing
    pub fn for_config(config: &ButtonConfig) -> Self {
        Self {
            funding_eligibility: config.funding_eligibility.clone().filter(is_truthy),
            wallet: config.wallet.clone().filter(is_truthy),
            remembered_funding: config.remembered_funding.clone().filter(is_truthy),
            user_agent: config
                .user_agent
                .clone()
                .filter(|ua| !ua.is_empty())
                .map(|user_agent| UserAgentOverride {
                    user_agent,
                    viewport: MobileViewport::default(),
                }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.funding_eligibility.is_none()
            && self.wallet.is_none()
            && self.remembered_funding.is_none()
            && self.user_agent.is_none()
    }
}

impl RenderContext {
    /// Build the context for one configuration
    pub fn for_config(
        config: &ButtonConfig,
        factory: &str,
        content: &Value,
        default_width: u32,
    ) -> Self {
        let mut button = config.button.clone().unwrap_or_default();
        button.insert("content".to_string(), content.clone());

        let container_width = config
            .container
            .as_ref()
            .and_then(|c| c.width)
            .unwrap_or(default_width);

        Self {
            factory: factory.to_string(),
            container_width,
            button,
            overrides: EnvironmentOverrides::for_config(config),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Bounding box of the rendered frame in page coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Geometry {
    /// Reject a measurement that would produce a meaningless screenshot
    pub fn ensure_visible(self) -> ScreenshotResult<Self> {
        if self.width == 0.0 {
            return Err(ScreenshotError::ZeroWidth);
        }
        if self.height == 0.0 {
            return Err(ScreenshotError::ZeroHeight);
        }
        Ok(self)
    }
}

/// One look at the container for the embedded frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameProbe {
    /// Frame rectangle, absent while the widget has not inserted its frame
    pub rect: Option<Geometry>,
    /// Rejection reason of the render promise, if it already failed
    pub render_error: Option<String>,
}
