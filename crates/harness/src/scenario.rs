use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    config::HarnessConfig,
    endpoint::{BrowserEndpoint, EndpointError, GatheringMode, PeerEndpoint, TrackAttachment},
    liveness::{FrameSample, LivenessThresholds, LivenessVerdict},
    pause::Pause,
    remote::{RemoteError, RemoteSession},
    scripts,
    sequencer::{NegotiationError, NegotiationReport, NegotiationSequencer},
    webdriver::{BrowserKind, BrowserRequest, WebDriverSession},
};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to open {browser} session: {source}")]
    Session {
        browser: BrowserKind,
        #[source]
        source: RemoteError,
    },
    #[error("failed to prepare page: {0}")]
    Page(#[from] RemoteError),
    #[error("endpoint error: {0}")]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error("no media flowing: failed {:?}", .0.failed)]
    NotLive(LivenessVerdict),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    /// Both peers in a single page.
    Loopback { browser: BrowserKind },
    /// Offerer and answerer in separate browsers.
    Interop {
        offerer: BrowserKind,
        answerer: BrowserKind,
    },
}

impl ScenarioKind {
    /// Every offerer/answerer pairing of the supported browsers.
    pub fn interop_matrix() -> Vec<ScenarioKind> {
        use BrowserKind::{Chrome, Firefox};
        [(Chrome, Chrome), (Firefox, Firefox), (Chrome, Firefox), (Firefox, Chrome)]
            .into_iter()
            .map(|(offerer, answerer)| ScenarioKind::Interop { offerer, answerer })
            .collect()
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioKind::Loopback { browser } => write!(f, "loopback {browser}"),
            ScenarioKind::Interop { offerer, answerer } => write!(f, "interop {offerer} {answerer}"),
        }
    }
}

/// Per-run knobs shared by every scenario.
#[derive(Debug, Clone)]
pub struct ScenarioSettings {
    pub test_page_url: String,
    pub settle: Duration,
    pub gathering: GatheringMode,
    pub attachment_override: Option<TrackAttachment>,
    pub thresholds: LivenessThresholds,
}

impl ScenarioSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            test_page_url: config.test_page_url.clone(),
            settle: config.settle(),
            gathering: config.gathering,
            attachment_override: config.track_attachment,
            thresholds: config.liveness,
        }
    }

    fn attachment_for(&self, browser: BrowserKind) -> TrackAttachment {
        self.attachment_override
            .unwrap_or_else(|| browser.default_attachment())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub report: NegotiationReport,
    pub verdict: LivenessVerdict,
}

/// Hands out fresh browser sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: RemoteSession + 'static;

    async fn open(&self, browser: BrowserKind) -> Result<Self::Session, RemoteError>;
}

pub struct WebDriverFactory {
    client: Client,
    hub_url: String,
    request: BrowserRequest,
    script_timeout: Duration,
}

impl WebDriverFactory {
    pub fn from_config(config: &HarnessConfig) -> Result<Self, RemoteError> {
        Ok(Self {
            client: Client::builder().build()?,
            hub_url: config.webdriver_url(),
            request: config.browser_request(),
            script_timeout: config.script_timeout(),
        })
    }
}

#[async_trait]
impl SessionFactory for WebDriverFactory {
    type Session = WebDriverSession;

    async fn open(&self, browser: BrowserKind) -> Result<WebDriverSession, RemoteError> {
        WebDriverSession::start(
            self.client.clone(),
            &self.hub_url,
            browser,
            &self.request,
            self.script_timeout,
        )
        .await
    }
}

/// Run one scenario end to end. Every session opened here is closed again,
/// whether the scenario passed or not.
pub async fn run_scenario<F, P>(
    factory: &F,
    pause: &P,
    settings: &ScenarioSettings,
    kind: ScenarioKind,
) -> Result<ScenarioOutcome, ScenarioError>
where
    F: SessionFactory,
    P: Pause,
{
    let (offerer, answerer) = match kind {
        ScenarioKind::Loopback { browser } => (browser, None),
        ScenarioKind::Interop { offerer, answerer } => (offerer, Some(answerer)),
    };

    let mut sessions = Vec::with_capacity(2);
    let opened = open_sessions(factory, offerer, answerer, &mut sessions).await;
    let result = match opened {
        Ok(()) => negotiate(&sessions, pause, settings, offerer, answerer.unwrap_or(offerer)).await,
        Err(err) => Err(err),
    };

    for session in &sessions {
        if let Err(err) = session.close().await {
            warn!(error = %err, "failed to close session");
        }
    }
    result
}

async fn open_sessions<F: SessionFactory>(
    factory: &F,
    offerer: BrowserKind,
    answerer: Option<BrowserKind>,
    sessions: &mut Vec<Arc<F::Session>>,
) -> Result<(), ScenarioError> {
    for browser in std::iter::once(offerer).chain(answerer) {
        let session = factory
            .open(browser)
            .await
            .map_err(|source| ScenarioError::Session { browser, source })?;
        sessions.push(Arc::new(session));
    }
    Ok(())
}

async fn negotiate<S, P>(
    sessions: &[Arc<S>],
    pause: &P,
    settings: &ScenarioSettings,
    offerer: BrowserKind,
    answerer: BrowserKind,
) -> Result<ScenarioOutcome, ScenarioError>
where
    S: RemoteSession,
    P: Pause,
{
    for session in sessions {
        session.navigate(&settings.test_page_url).await?;
        let user_agent = session.execute(scripts::USER_AGENT, vec![]).await?;
        info!(user_agent = %user_agent, "page loaded");
    }

    let (Some(offer_session), Some(answer_session)) = (sessions.first(), sessions.last()) else {
        return Err(RemoteError::Decode("no browser session open".into()).into());
    };

    let mut a = BrowserEndpoint::open(
        offer_session.clone(),
        "pc1",
        settings.attachment_for(offerer),
        settings.gathering,
    )
    .await?;
    let mut b = match BrowserEndpoint::open(
        answer_session.clone(),
        "pc2",
        settings.attachment_for(answerer),
        settings.gathering,
    )
    .await
    {
        Ok(b) => b,
        Err(err) => {
            close_endpoint(&mut a).await;
            return Err(err.into());
        }
    };

    let outcome = exchange(&mut a, &mut b, pause, settings).await;
    close_endpoint(&mut a).await;
    close_endpoint(&mut b).await;
    outcome
}

async fn exchange<A, B, P>(
    a: &mut A,
    b: &mut B,
    pause: &P,
    settings: &ScenarioSettings,
) -> Result<ScenarioOutcome, ScenarioError>
where
    A: PeerEndpoint,
    B: PeerEndpoint,
    P: Pause,
{
    let report = NegotiationSequencer::new(&mut *a, &mut *b, pause, settings.settle)
        .run()
        .await?;

    let capture = b.capture_frame().await?;
    let verdict = settings.thresholds.verify(FrameSample::measure(&capture));
    info!(
        width = verdict.sample.width,
        height = verdict.sample.height,
        luma = verdict.sample.luma,
        "remote video sampled"
    );
    if !verdict.is_live() {
        return Err(ScenarioError::NotLive(verdict));
    }
    Ok(ScenarioOutcome { report, verdict })
}

async fn close_endpoint<E: PeerEndpoint>(endpoint: &mut E) {
    if let Err(err) = endpoint.close().await {
        warn!(peer = endpoint.label(), error = %err, "failed to close peer");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{pause::testing::RecordedPause, remote::testing::ScriptedSession};

    /// Hands out scripted sessions and keeps a handle on each for inspection.
    #[derive(Default)]
    struct ScriptedFactory {
        opened: Mutex<Vec<(BrowserKind, Arc<ScriptedSession>)>>,
        fail_op: Option<&'static str>,
        refuse: Option<BrowserKind>,
    }

    struct SharedSession(Arc<ScriptedSession>);

    #[async_trait]
    impl RemoteSession for SharedSession {
        async fn navigate(&self, url: &str) -> Result<(), RemoteError> {
            self.0.navigate(url).await
        }

        async fn execute(&self, script: &str, args: Vec<serde_json::Value>) -> Result<serde_json::Value, RemoteError> {
            self.0.execute(script, args).await
        }

        async fn execute_async(
            &self,
            script: &str,
            args: Vec<serde_json::Value>,
        ) -> Result<serde_json::Value, RemoteError> {
            self.0.execute_async(script, args).await
        }

        async fn close(&self) -> Result<(), RemoteError> {
            self.0.close().await
        }
    }

    #[async_trait]
    impl SessionFactory for ScriptedFactory {
        type Session = SharedSession;

        async fn open(&self, browser: BrowserKind) -> Result<SharedSession, RemoteError> {
            if self.refuse == Some(browser) {
                return Err(RemoteError::Protocol {
                    error: "session not created".into(),
                    message: format!("no {browser} nodes"),
                });
            }
            let session = Arc::new(match self.fail_op {
                Some(op) => ScriptedSession::failing_on(op),
                None => ScriptedSession::default(),
            });
            self.opened.lock().unwrap().push((browser, session.clone()));
            Ok(SharedSession(session))
        }
    }

    impl ScriptedFactory {
        fn sessions(&self) -> Vec<(BrowserKind, Arc<ScriptedSession>)> {
            self.opened.lock().unwrap().clone()
        }
    }

    fn settings() -> ScenarioSettings {
        ScenarioSettings {
            test_page_url: "https://example.test/page.html".into(),
            settle: Duration::from_secs(3),
            gathering: GatheringMode::Trickle,
            attachment_override: None,
            thresholds: LivenessThresholds::default(),
        }
    }

    #[tokio::test]
    async fn interop_runs_across_two_sessions_and_closes_both() {
        let factory = ScriptedFactory::default();
        let pause = RecordedPause::default();
        let kind = ScenarioKind::Interop {
            offerer: BrowserKind::Firefox,
            answerer: BrowserKind::Chrome,
        };

        let outcome = run_scenario(&factory, &pause, &settings(), kind)
            .await
            .expect("scenario passes");

        assert_eq!(outcome.report.deliveries.len(), 4);
        assert!(outcome.verdict.is_live());
        assert!((outcome.verdict.sample.luma - 510.0).abs() < 1e-9);

        let sessions = factory.sessions();
        assert_eq!(sessions.len(), 2);
        let (offer_browser, offer_session) = &sessions[0];
        let (_, answer_session) = &sessions[1];
        assert_eq!(*offer_browser, BrowserKind::Firefox);
        assert!(offer_session.is_closed() && answer_session.is_closed());
        assert_eq!(
            *offer_session.navigated.lock().unwrap(),
            vec!["https://example.test/page.html".to_string()]
        );

        // firefox offerer puts video on a separate stream
        assert_eq!(
            offer_session.args_for("add-video-and-reoffer")[0][2],
            serde_json::json!("separate")
        );
        assert!(answer_session.ops().contains(&"capture-frame".to_string()));
        assert!(!offer_session.ops().contains(&"capture-frame".to_string()));
    }

    #[tokio::test]
    async fn loopback_shares_one_page_between_both_peers() {
        let factory = ScriptedFactory::default();
        let pause = RecordedPause::default();
        let kind = ScenarioKind::Loopback {
            browser: BrowserKind::Chrome,
        };

        run_scenario(&factory, &pause, &settings(), kind)
            .await
            .expect("scenario passes");

        let sessions = factory.sessions();
        assert_eq!(sessions.len(), 1);
        let session = &sessions[0].1;
        let peers: Vec<_> = session
            .args_for("open-peer")
            .into_iter()
            .map(|args| args[0].clone())
            .collect();
        assert_eq!(peers, vec![serde_json::json!("pc1"), serde_json::json!("pc2")]);
        assert_eq!(session.args_for("close-peer").len(), 2);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn failed_step_still_closes_sessions() {
        let factory = ScriptedFactory {
            fail_op: Some("accept-offer"),
            ..ScriptedFactory::default()
        };
        let pause = RecordedPause::default();
        let kind = ScenarioKind::Interop {
            offerer: BrowserKind::Chrome,
            answerer: BrowserKind::Chrome,
        };

        let err = run_scenario(&factory, &pause, &settings(), kind)
            .await
            .unwrap_err();
        assert!(matches!(err, ScenarioError::Negotiation(_)));
        for (_, session) in factory.sessions() {
            assert!(session.is_closed());
            assert!(session.ops().contains(&"close-peer".to_string()));
        }
    }

    #[tokio::test]
    async fn refused_second_session_closes_the_first() {
        let factory = ScriptedFactory {
            refuse: Some(BrowserKind::Firefox),
            ..ScriptedFactory::default()
        };
        let pause = RecordedPause::default();
        let kind = ScenarioKind::Interop {
            offerer: BrowserKind::Chrome,
            answerer: BrowserKind::Firefox,
        };

        let err = run_scenario(&factory, &pause, &settings(), kind)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Session { browser: BrowserKind::Firefox, .. }
        ));
        let sessions = factory.sessions();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].1.is_closed());
    }

    #[tokio::test]
    async fn dark_frame_fails_liveness() {
        let factory = ScriptedFactory::default();
        let pause = RecordedPause::default();
        let mut settings = settings();
        settings.thresholds.min_luma = 1_000.0;

        let err = run_scenario(
            &factory,
            &pause,
            &settings,
            ScenarioKind::Loopback {
                browser: BrowserKind::Firefox,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ScenarioError::NotLive(verdict) if !verdict.is_live()));
    }

    #[test]
    fn attachment_defaults_per_browser_unless_forced() {
        let mut config = HarnessConfig::default();
        let defaults = ScenarioSettings::from_config(&config);
        assert_eq!(
            defaults.attachment_for(BrowserKind::Chrome),
            TrackAttachment::SharedStream
        );
        assert_eq!(
            defaults.attachment_for(BrowserKind::Firefox),
            TrackAttachment::SeparateStream
        );

        config.track_attachment = Some(TrackAttachment::SeparateStream);
        let forced = ScenarioSettings::from_config(&config);
        assert_eq!(
            forced.attachment_for(BrowserKind::Chrome),
            TrackAttachment::SeparateStream
        );
    }

    #[test]
    fn matrix_covers_every_pairing() {
        let names: Vec<_> = ScenarioKind::interop_matrix()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            names,
            vec![
                "interop chrome chrome",
                "interop firefox firefox",
                "interop chrome firefox",
                "interop firefox chrome",
            ]
        );
    }
}
