//! Minimal W3C WebDriver client: just enough to open a session, load a page,
//! run scripts and tear the session down again.

use std::{fmt, str::FromStr, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::{
    endpoint::TrackAttachment,
    remote::{RemoteError, RemoteSession},
};

const CHROME_ARGS: &[&str] = &[
    "allow-file-access-from-files",
    "use-fake-device-for-media-stream",
    "use-fake-ui-for-media-stream",
    "disable-translate",
    "no-process-singleton-dialog",
    "mute-audio",
];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Chrome,
    Firefox,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chrome => "chrome",
            BrowserKind::Firefox => "firefox",
        }
    }

    /// Chrome can append a track to an existing local stream; Firefox only
    /// accepts it on a stream of its own.
    pub fn default_attachment(&self) -> TrackAttachment {
        match self {
            BrowserKind::Chrome => TrackAttachment::SharedStream,
            BrowserKind::Firefox => TrackAttachment::SeparateStream,
        }
    }
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrowserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chrome" | "chromium" => Ok(BrowserKind::Chrome),
            "firefox" => Ok(BrowserKind::Firefox),
            other => Err(format!("unsupported browser '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for BrowserKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        BrowserKind::from_str(&value).map_err(D::Error::custom)
    }
}

/// Everything needed to ask a hub for a browser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowserRequest {
    pub version: Option<String>,
    pub platform: Option<String>,
    pub tunnel_identifier: Option<String>,
}

/// W3C `capabilities` payload with fake media devices enabled.
pub fn capabilities(browser: BrowserKind, request: &BrowserRequest) -> Value {
    let mut always = Map::new();
    always.insert("browserName".into(), json!(browser.as_str()));
    if let Some(version) = request.version.as_deref().filter(|v| !v.is_empty()) {
        always.insert("browserVersion".into(), json!(version));
    }
    if let Some(platform) = request.platform.as_deref().filter(|p| !p.is_empty()) {
        always.insert("platformName".into(), json!(platform));
    }
    match browser {
        BrowserKind::Chrome => {
            always.insert("goog:chromeOptions".into(), json!({ "args": CHROME_ARGS }));
        }
        BrowserKind::Firefox => {
            always.insert(
                "moz:firefoxOptions".into(),
                json!({
                    "prefs": {
                        "media.navigator.streams.fake": true,
                        "media.navigator.permission.disabled": true,
                        "xpinstall.signatures.required": false,
                    }
                }),
            );
        }
    }
    if let Some(tunnel) = &request.tunnel_identifier {
        always.insert("sauce:options".into(), json!({ "tunnelIdentifier": tunnel }));
    }

    json!({ "capabilities": { "alwaysMatch": Value::Object(always) } })
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
    #[serde(default)]
    message: String,
}

/// One browser session on a WebDriver endpoint.
pub struct WebDriverSession {
    client: Client,
    session_url: String,
    browser: BrowserKind,
}

impl WebDriverSession {
    pub async fn start(
        client: Client,
        hub_url: &str,
        browser: BrowserKind,
        request: &BrowserRequest,
        script_timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let hub_url = hub_url.trim_end_matches('/');
        let value = send(
            &client,
            Method::POST,
            &format!("{hub_url}/session"),
            Some(capabilities(browser, request)),
        )
        .await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::Decode("new session response lacks sessionId".into()))?;
        info!(%browser, session_id, "webdriver session started");

        let session = Self {
            client,
            session_url: format!("{hub_url}/session/{session_id}"),
            browser,
        };
        let timeout_ms = u64::try_from(script_timeout.as_millis()).unwrap_or(u64::MAX);
        if let Err(err) = session
            .command(Method::POST, "timeouts", Some(json!({ "script": timeout_ms })))
            .await
        {
            // Nobody else holds this session yet, so release it here.
            if let Err(close_err) = session.close().await {
                warn!(error = %close_err, "failed to release half-configured session");
            }
            return Err(err);
        }
        Ok(session)
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, RemoteError> {
        let url = if path.is_empty() {
            self.session_url.clone()
        } else {
            format!("{}/{path}", self.session_url)
        };
        send(&self.client, method, &url, body).await
    }
}

async fn send(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, RemoteError> {
    debug!(%method, url = %redact(url), "webdriver command");
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await?;
    let status = response.status();
    let payload: Value = response.json().await?;
    unwrap_value(status.is_success(), payload)
}

/// Pull `value` out of a WebDriver response. Errors only ever arrive with a
/// non-success status; a successful script may itself return an `error` key.
fn unwrap_value(success: bool, mut payload: Value) -> Result<Value, RemoteError> {
    let value = payload
        .get_mut("value")
        .map(Value::take)
        .ok_or_else(|| RemoteError::Decode("response lacks a value field".into()))?;

    if success {
        return Ok(value);
    }
    match WireError::deserialize(&value) {
        Ok(wire) => Err(RemoteError::Protocol {
            error: wire.error,
            message: wire.message,
        }),
        Err(_) => Err(RemoteError::Protocol {
            error: "unknown error".into(),
            message: value.to_string(),
        }),
    }
}

/// Hide grid credentials embedded in a hub URL.
fn redact(url: &str) -> String {
    match (url.find("://"), url.find('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_owned(),
    }
}

#[async_trait]
impl RemoteSession for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<(), RemoteError> {
        self.command(Method::POST, "url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, RemoteError> {
        self.command(
            Method::POST,
            "execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    async fn execute_async(&self, script: &str, args: Vec<Value>) -> Result<Value, RemoteError> {
        self.command(
            Method::POST,
            "execute/async",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    async fn close(&self) -> Result<(), RemoteError> {
        if let Err(err) = self.command(Method::DELETE, "window", None).await {
            warn!(error = %err, "failed to close browser window");
        }
        self.command(Method::DELETE, "", None).await?;
        info!(browser = %self.browser, "webdriver session closed");
        Ok(())
    }
}
