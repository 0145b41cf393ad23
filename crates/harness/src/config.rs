use std::{env, str::FromStr, time::Duration};

use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize};

use crate::{
    endpoint::{GatheringMode, TrackAttachment},
    liveness::LivenessThresholds,
    webdriver::{BrowserKind, BrowserRequest},
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid url '{0}'")]
    InvalidUrl(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("grid access key is set without a username")]
    IncompleteGrid,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Hosted grid credentials. When both are present sessions go through the
/// tunnel endpoint instead of `hub_url`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct GridConfig {
    pub username: Option<String>,
    pub access_key: Option<String>,
    pub tunnel_identifier: Option<String>,
    pub tunnel_addr: String,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            username: None,
            access_key: None,
            tunnel_identifier: None,
            tunnel_addr: "localhost:4445/wd/hub".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    pub hub_url: String,
    pub test_page_url: String,
    pub browser: BrowserKind,
    pub browser_version: Option<String>,
    pub platform: Option<String>,
    pub log_format: LogFormat,
    pub settle_secs: u64,
    pub script_timeout_secs: u64,
    pub gathering: GatheringMode,
    /// Forces one attachment for every browser instead of the per-browser default.
    pub track_attachment: Option<TrackAttachment>,
    pub grid: GridConfig,
    pub liveness: LivenessThresholds,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            hub_url: "http://localhost:4444".to_string(),
            test_page_url: "https://fippo.github.io/adapter/testpage.html".to_string(),
            browser: BrowserKind::Chrome,
            browser_version: None,
            platform: None,
            log_format: LogFormat::Compact,
            settle_secs: 3,
            script_timeout_secs: 600,
            gathering: GatheringMode::Trickle,
            track_attachment: None,
            grid: GridConfig::default(),
            liveness: LivenessThresholds::default(),
        }
    }
}

/// Variables understood by the original CI setup. They seed the defaults, so
/// files and `RENEGO_HARNESS__*` variables still win.
#[derive(Debug, Default)]
struct LegacyEnvironment {
    browser: Option<String>,
    browser_version: Option<String>,
    grid_username: Option<String>,
    grid_access_key: Option<String>,
    tunnel_identifier: Option<String>,
}

impl LegacyEnvironment {
    fn capture() -> Self {
        let read = |key: &str| env::var(key).ok().filter(|value| !value.is_empty());
        Self {
            browser: read("BROWSER"),
            browser_version: read("BVER"),
            grid_username: read("SAUCE_USERNAME"),
            grid_access_key: read("SAUCE_ACCESS_KEY"),
            tunnel_identifier: read("TRAVIS_JOB_NUMBER"),
        }
    }
}

/// Command-line values applied on top of the loaded configuration.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub hub_url: Option<String>,
    pub test_page_url: Option<String>,
    pub browser: Option<BrowserKind>,
    pub browser_version: Option<String>,
    pub log_format: Option<LogFormat>,
    pub settle_secs: Option<u64>,
    pub gathering: Option<GatheringMode>,
    pub track_attachment: Option<TrackAttachment>,
}

impl HarnessConfig {
    const ENV_PREFIX: &'static str = "RENEGO_HARNESS";

    pub fn load() -> Result<Self, ConfigError> {
        let defaults = HarnessConfig::default();
        let legacy = LegacyEnvironment::capture();

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/harness").required(false))
            .add_source(config::File::with_name("config/harness.local").required(false))
            .add_source(
                config::Environment::with_prefix(Self::ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("hub_url", defaults.hub_url.clone())?
            .set_default("test_page_url", defaults.test_page_url.clone())?
            .set_default(
                "browser",
                legacy
                    .browser
                    .clone()
                    .unwrap_or_else(|| defaults.browser.as_str().to_string()),
            )?
            .set_default("log_format", defaults.log_format.as_str())?
            .set_default("settle_secs", defaults.settle_secs as i64)?
            .set_default("script_timeout_secs", defaults.script_timeout_secs as i64)?;

        if let Some(version) = legacy.browser_version {
            builder = builder.set_default("browser_version", version)?;
        }
        if let Some(username) = legacy.grid_username {
            builder = builder.set_default("grid.username", username)?;
        }
        if let Some(access_key) = legacy.grid_access_key {
            builder = builder.set_default("grid.access_key", access_key)?;
        }
        if let Some(tunnel) = legacy.tunnel_identifier {
            builder = builder.set_default("grid.tunnel_identifier", tunnel)?;
        }

        let settings: HarnessConfig = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_overrides(&mut self, overrides: &CliOverrides) -> Result<(), ConfigError> {
        if let Some(hub_url) = &overrides.hub_url {
            self.hub_url = hub_url.clone();
        }
        if let Some(url) = &overrides.test_page_url {
            self.test_page_url = url.clone();
        }
        if let Some(browser) = overrides.browser {
            self.browser = browser;
        }
        if let Some(version) = &overrides.browser_version {
            self.browser_version = Some(version.clone());
        }
        if let Some(format) = overrides.log_format {
            self.log_format = format;
        }
        if let Some(settle) = overrides.settle_secs {
            self.settle_secs = settle;
        }
        if let Some(gathering) = overrides.gathering {
            self.gathering = gathering;
        }
        if let Some(attachment) = overrides.track_attachment {
            self.track_attachment = Some(attachment);
        }
        self.validate()
    }

    /// The WebDriver endpoint sessions are requested from.
    pub fn webdriver_url(&self) -> String {
        match (&self.grid.username, &self.grid.access_key) {
            (Some(username), Some(key)) => {
                format!("http://{username}:{key}@{}", self.grid.tunnel_addr)
            }
            _ => self.hub_url.clone(),
        }
    }

    pub fn uses_grid(&self) -> bool {
        self.grid.username.is_some() && self.grid.access_key.is_some()
    }

    pub fn browser_request(&self) -> BrowserRequest {
        BrowserRequest {
            version: self.browser_version.clone(),
            platform: self.platform.clone(),
            tunnel_identifier: self
                .uses_grid()
                .then(|| self.grid.tunnel_identifier.clone())
                .flatten(),
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for url in [&self.hub_url, &self.test_page_url] {
            if !(url.starts_with("http://") || url.starts_with("https://") || url.starts_with("file://")) {
                return Err(ConfigError::InvalidUrl(url.clone()));
            }
        }
        if self.script_timeout_secs == 0 {
            return Err(ConfigError::Zero("script_timeout_secs"));
        }
        if self.grid.access_key.is_some() && self.grid.username.is_none() {
            return Err(ConfigError::IncompleteGrid);
        }
        Ok(())
    }
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unsupported log format '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for LogFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        LogFormat::from_str(&value).map_err(D::Error::custom)
    }
}
