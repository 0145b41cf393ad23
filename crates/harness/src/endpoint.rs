use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use renego_sdp::{replace_stream_id, SessionDescription};
use renego_signaling::{CandidateBatch, IceCandidate, SignalingMessage};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::{
    liveness::FrameCapture,
    remote::{settle_script_result, RemoteError, RemoteSession},
    scripts,
};

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("unexpected script result: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("renegotiation requested before an initial offer")]
    NoLocalStream,
}

/// How a video track added during renegotiation is attached.
///
/// `SharedStream` appends it to the stream of the first offer. `SeparateStream`
/// puts it on its own stream; the re-offer's stream id is then rewritten to
/// the original one so the remote still sees a single stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackAttachment {
    SharedStream,
    SeparateStream,
}

impl TrackAttachment {
    fn script_arg(&self) -> &'static str {
        match self {
            TrackAttachment::SharedStream => "shared",
            TrackAttachment::SeparateStream => "separate",
        }
    }
}

impl FromStr for TrackAttachment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "shared_stream" | "shared" => Ok(TrackAttachment::SharedStream),
            "separate_stream" | "separate" => Ok(TrackAttachment::SeparateStream),
            other => Err(format!("unsupported track attachment '{other}'")),
        }
    }
}

/// Whether a local description is handed out before or after candidate
/// gathering finishes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatheringMode {
    /// Return right after `setLocalDescription`; candidates go through the relay.
    #[default]
    Trickle,
    /// Wait for end-of-candidates so the description already lists them.
    Complete,
}

impl FromStr for GatheringMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trickle" => Ok(GatheringMode::Trickle),
            "complete" => Ok(GatheringMode::Complete),
            other => Err(format!("unsupported gathering mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    fn constraints(&self) -> Value {
        match self {
            MediaKind::Audio => json!({ "audio": true }),
            MediaKind::Video => json!({ "video": true }),
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// One side of a negotiation, as seen by the sequencer.
#[async_trait]
pub trait PeerEndpoint: Send {
    fn label(&self) -> &str;

    async fn create_offer(&mut self, media: MediaKind) -> Result<SessionDescription, EndpointError>;

    /// Apply a remote offer and return the local answer.
    async fn accept_offer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, EndpointError>;

    async fn accept_answer(&mut self, answer: SessionDescription) -> Result<(), EndpointError>;

    /// Add a camera track to the established session and return the re-offer.
    async fn add_video_and_reoffer(&mut self) -> Result<SessionDescription, EndpointError>;

    async fn drain_candidates(&mut self) -> Result<CandidateBatch, EndpointError>;

    async fn add_candidates(&mut self, candidates: &[IceCandidate]) -> Result<(), EndpointError>;

    async fn capture_frame(&mut self) -> Result<FrameCapture, EndpointError>;

    async fn close(&mut self) -> Result<(), EndpointError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalOffer {
    description: SessionDescription,
    stream_id: String,
}

/// A peer connection living in a browser page, driven through page scripts.
///
/// Several endpoints may share one session; each owns a distinct peer slot.
pub struct BrowserEndpoint<S> {
    session: Arc<S>,
    peer: String,
    attachment: TrackAttachment,
    gathering: GatheringMode,
    original_stream_id: Option<String>,
    answered: bool,
}

impl<S: RemoteSession> BrowserEndpoint<S> {
    pub async fn open(
        session: Arc<S>,
        peer: impl Into<String>,
        attachment: TrackAttachment,
        gathering: GatheringMode,
    ) -> Result<Self, EndpointError> {
        let endpoint = Self {
            session,
            peer: peer.into(),
            attachment,
            gathering,
            original_stream_id: None,
            answered: false,
        };
        endpoint.run(scripts::OPEN_PEER, vec![]).await?;
        Ok(endpoint)
    }

    async fn run(&self, script: &str, mut args: Vec<Value>) -> Result<Value, EndpointError> {
        args.insert(0, Value::String(self.peer.clone()));
        let raw = self
            .session
            .execute_async(&scripts::with_prelude(script), args)
            .await?;
        Ok(settle_script_result(raw)?)
    }

    /// Only the first description of each side waits for gathering. A
    /// renegotiation reuses the bundled transport, which does not gather again.
    fn wait_for_candidates(&self, renegotiation: bool) -> Value {
        Value::Bool(self.gathering == GatheringMode::Complete && !renegotiation)
    }
}

#[async_trait]
impl<S: RemoteSession> PeerEndpoint for BrowserEndpoint<S> {
    fn label(&self) -> &str {
        &self.peer
    }

    async fn create_offer(&mut self, media: MediaKind) -> Result<SessionDescription, EndpointError> {
        let result = self
            .run(
                scripts::CREATE_OFFER,
                vec![media.constraints(), self.wait_for_candidates(false)],
            )
            .await?;
        let offer: LocalOffer = serde_json::from_value(result)?;
        debug!(peer = %self.peer, stream_id = %offer.stream_id, "created initial offer");
        self.original_stream_id = Some(offer.stream_id);
        Ok(offer.description)
    }

    async fn accept_offer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, EndpointError> {
        let renegotiation = self.answered;
        let result = self
            .run(
                scripts::ACCEPT_OFFER,
                vec![
                    serde_json::to_value(&offer)?,
                    self.wait_for_candidates(renegotiation),
                ],
            )
            .await?;
        self.answered = true;
        Ok(serde_json::from_value(result)?)
    }

    async fn accept_answer(&mut self, answer: SessionDescription) -> Result<(), EndpointError> {
        self.run(scripts::ACCEPT_ANSWER, vec![serde_json::to_value(&answer)?])
            .await?;
        Ok(())
    }

    async fn add_video_and_reoffer(&mut self) -> Result<SessionDescription, EndpointError> {
        let original = self
            .original_stream_id
            .clone()
            .ok_or(EndpointError::NoLocalStream)?;
        let result = self
            .run(
                scripts::ADD_VIDEO_AND_REOFFER,
                vec![
                    MediaKind::Video.constraints(),
                    Value::String(self.attachment.script_arg().to_owned()),
                    self.wait_for_candidates(true),
                ],
            )
            .await?;
        let offer: LocalOffer = serde_json::from_value(result)?;

        match self.attachment {
            TrackAttachment::SharedStream => Ok(offer.description),
            TrackAttachment::SeparateStream => {
                debug!(
                    peer = %self.peer,
                    from = %offer.stream_id,
                    to = %original,
                    "presenting video on the original stream"
                );
                let sdp = replace_stream_id(&offer.description.sdp, &offer.stream_id, &original);
                Ok(offer.description.with_sdp(sdp))
            }
        }
    }

    async fn drain_candidates(&mut self) -> Result<CandidateBatch, EndpointError> {
        let result = self.run(scripts::DRAIN_CANDIDATES, vec![]).await?;
        let events: Vec<Option<IceCandidate>> = serde_json::from_value(result)?;
        Ok(CandidateBatch::from_messages(
            events.into_iter().map(SignalingMessage::from_candidate_event),
        ))
    }

    async fn add_candidates(&mut self, candidates: &[IceCandidate]) -> Result<(), EndpointError> {
        if candidates.is_empty() {
            return Ok(());
        }
        self.run(scripts::ADD_CANDIDATES, vec![serde_json::to_value(candidates)?])
            .await?;
        Ok(())
    }

    async fn capture_frame(&mut self) -> Result<FrameCapture, EndpointError> {
        let result = self.run(scripts::CAPTURE_FRAME, vec![]).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn close(&mut self) -> Result<(), EndpointError> {
        self.run(scripts::CLOSE_PEER, vec![]).await?;
        Ok(())
    }
}
