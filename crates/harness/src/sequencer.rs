//! Offer/answer exchange between two endpoints, including the renegotiation
//! that adds video to an audio-only session.
//!
//! The harness is the "wire": every description passes through
//! [`renego_sdp::mangle_strict`] on its way to the other endpoint, and
//! candidates are relayed once the receiving side has a remote description.
//! Relaying continues while the sequencer waits for media to settle.

use std::{fmt, time::Duration};

use renego_sdp::{mangle_strict, SdpError, SdpType, SessionDescription};
use renego_signaling::{CandidateBatch, IceCandidate};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    endpoint::{EndpointError, MediaKind, PeerEndpoint},
    pause::Pause,
};

/// Longest stretch a settle wait goes without relaying candidates.
const RELAY_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

impl Side {
    fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }

    fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => f.write_str("endpoint A"),
            Side::B => f.write_str("endpoint B"),
        }
    }
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("{side} produced a malformed {sdp_type}: {source}")]
    Sdp {
        side: Side,
        sdp_type: SdpType,
        #[source]
        source: SdpError,
    },
    #[error("{side} failed to {step}: {source}")]
    Endpoint {
        side: Side,
        step: &'static str,
        #[source]
        source: EndpointError,
    },
}

/// Linear negotiation states. Pending descriptions travel inside the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationState {
    Init,
    OfferCreated(SessionDescription),
    AnswerPending(SessionDescription),
    Connected,
    RenegotiationOfferCreated(SessionDescription),
    RenegotiationAnswerPending(SessionDescription),
    RenegotiationComplete,
    Terminal,
}

impl NegotiationState {
    pub fn name(&self) -> &'static str {
        match self {
            NegotiationState::Init => "init",
            NegotiationState::OfferCreated(_) => "offer_created",
            NegotiationState::AnswerPending(_) => "answer_pending",
            NegotiationState::Connected => "connected",
            NegotiationState::RenegotiationOfferCreated(_) => "renegotiation_offer_created",
            NegotiationState::RenegotiationAnswerPending(_) => "renegotiation_answer_pending",
            NegotiationState::RenegotiationComplete => "renegotiation_complete",
            NegotiationState::Terminal => "terminal",
        }
    }
}

/// A description handed across the wire, as the receiver saw it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Delivery {
    pub sdp_type: SdpType,
    pub from: Side,
    pub to: Side,
    pub renegotiation: bool,
    pub sdp: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NegotiationReport {
    pub deliveries: Vec<Delivery>,
    /// Candidates forwarded to A and to B respectively.
    pub candidates_relayed: [usize; 2],
    /// Whether A and B signalled end-of-candidates.
    pub gathering_complete: [bool; 2],
}

/// Holds candidates until their destination has a remote description.
#[derive(Debug, Default)]
struct CandidateRelay {
    pending: [Vec<IceCandidate>; 2],
    remote_ready: [bool; 2],
    relayed: [usize; 2],
    gathering_complete: [bool; 2],
}

impl CandidateRelay {
    /// Queue a batch drained from `from` for the other side.
    fn absorb(&mut self, from: Side, batch: CandidateBatch) {
        self.gathering_complete[from.index()] |= batch.complete;
        if batch.is_empty() {
            return;
        }
        debug!(from = %from, count = batch.candidates.len(), "candidates gathered");
        self.pending[from.other().index()].extend(batch.candidates);
    }
}

pub struct NegotiationSequencer<'a, A, B, P> {
    a: &'a mut A,
    b: &'a mut B,
    pause: &'a P,
    settle: Duration,
    state: NegotiationState,
    deliveries: Vec<Delivery>,
    relay: CandidateRelay,
}

impl<'a, A, B, P> NegotiationSequencer<'a, A, B, P>
where
    A: PeerEndpoint,
    B: PeerEndpoint,
    P: Pause,
{
    pub fn new(a: &'a mut A, b: &'a mut B, pause: &'a P, settle: Duration) -> Self {
        Self {
            a,
            b,
            pause,
            settle,
            state: NegotiationState::Init,
            deliveries: Vec::new(),
            relay: CandidateRelay::default(),
        }
    }

    pub fn state(&self) -> &NegotiationState {
        &self.state
    }

    pub fn deliveries(&self) -> &[Delivery] {
        &self.deliveries
    }

    /// Drive the exchange to [`NegotiationState::Terminal`]. The first failing
    /// step aborts the run; nothing is retried.
    pub async fn run(mut self) -> Result<NegotiationReport, NegotiationError> {
        while self.state != NegotiationState::Terminal {
            self.advance().await?;
        }
        Ok(NegotiationReport {
            deliveries: self.deliveries,
            candidates_relayed: self.relay.relayed,
            gathering_complete: self.relay.gathering_complete,
        })
    }

    /// Perform one transition.
    pub async fn advance(&mut self) -> Result<&NegotiationState, NegotiationError> {
        let state = std::mem::replace(&mut self.state, NegotiationState::Terminal);
        let next = match state {
            NegotiationState::Init => {
                let offer = self
                    .a
                    .create_offer(MediaKind::Audio)
                    .await
                    .map_err(step_error(Side::A, "create offer"))?;
                NegotiationState::OfferCreated(offer)
            }
            NegotiationState::OfferCreated(offer) => {
                let answer = self.deliver_offer(offer, false).await?;
                NegotiationState::AnswerPending(answer)
            }
            NegotiationState::AnswerPending(answer) => {
                self.deliver_answer(answer, false).await?;
                NegotiationState::Connected
            }
            NegotiationState::Connected => {
                self.settle_relaying().await;
                let offer = self
                    .a
                    .add_video_and_reoffer()
                    .await
                    .map_err(step_error(Side::A, "add video and re-offer"))?;
                NegotiationState::RenegotiationOfferCreated(offer)
            }
            NegotiationState::RenegotiationOfferCreated(offer) => {
                let answer = self.deliver_offer(offer, true).await?;
                NegotiationState::RenegotiationAnswerPending(answer)
            }
            NegotiationState::RenegotiationAnswerPending(answer) => {
                self.deliver_answer(answer, true).await?;
                NegotiationState::RenegotiationComplete
            }
            NegotiationState::RenegotiationComplete => {
                self.relay_candidates().await;
                self.settle_relaying().await;
                debug!(
                    gathering_complete = ?self.relay.gathering_complete,
                    "final candidate flush done"
                );
                NegotiationState::Terminal
            }
            NegotiationState::Terminal => NegotiationState::Terminal,
        };

        debug!(state = next.name(), "negotiation advanced");
        self.state = next;
        Ok(&self.state)
    }

    /// Mangle A's offer, hand it to B and return B's answer.
    async fn deliver_offer(
        &mut self,
        offer: SessionDescription,
        renegotiation: bool,
    ) -> Result<SessionDescription, NegotiationError> {
        let offer = self.cross(Side::A, offer, renegotiation)?;
        let answer = self
            .b
            .accept_offer(offer)
            .await
            .map_err(step_error(Side::B, "accept offer"))?;
        self.relay.remote_ready[Side::B.index()] = true;
        self.relay_candidates().await;
        Ok(answer)
    }

    async fn deliver_answer(
        &mut self,
        answer: SessionDescription,
        renegotiation: bool,
    ) -> Result<(), NegotiationError> {
        let answer = self.cross(Side::B, answer, renegotiation)?;
        self.a
            .accept_answer(answer)
            .await
            .map_err(step_error(Side::A, "accept answer"))?;
        self.relay.remote_ready[Side::A.index()] = true;
        self.relay_candidates().await;
        Ok(())
    }

    fn label(&self, side: Side) -> &str {
        match side {
            Side::A => self.a.label(),
            Side::B => self.b.label(),
        }
    }

    /// Put a description on the wire from `from` to the other side.
    fn cross(
        &mut self,
        from: Side,
        description: SessionDescription,
        renegotiation: bool,
    ) -> Result<SessionDescription, NegotiationError> {
        let sdp = mangle_strict(&description.sdp).map_err(|source| NegotiationError::Sdp {
            side: from,
            sdp_type: description.sdp_type,
            source,
        })?;
        let delivered = description.with_sdp(sdp);

        info!(
            sdp_type = %delivered.sdp_type,
            from = self.label(from),
            to = self.label(from.other()),
            renegotiation,
            "relaying description"
        );
        self.deliveries.push(Delivery {
            sdp_type: delivered.sdp_type,
            from,
            to: from.other(),
            renegotiation,
            sdp: delivered.sdp.clone(),
        });
        Ok(delivered)
    }

    /// Wait out the settle time in slices, relaying candidates after each.
    async fn settle_relaying(&mut self) {
        let mut remaining = self.settle;
        while !remaining.is_zero() {
            let slice = remaining.min(RELAY_INTERVAL);
            self.pause.pause(slice).await;
            remaining -= slice;
            self.relay_candidates().await;
        }
    }

    /// Drain both endpoints and forward whatever the receiving side can take.
    /// Relay failures are logged, never fatal.
    async fn relay_candidates(&mut self) {
        match self.a.drain_candidates().await {
            Ok(batch) => self.relay.absorb(Side::A, batch),
            Err(err) => warn!(side = %Side::A, error = %err, "failed to drain candidates"),
        }
        match self.b.drain_candidates().await {
            Ok(batch) => self.relay.absorb(Side::B, batch),
            Err(err) => warn!(side = %Side::B, error = %err, "failed to drain candidates"),
        }

        for to in [Side::A, Side::B] {
            let idx = to.index();
            if !self.relay.remote_ready[idx] || self.relay.pending[idx].is_empty() {
                continue;
            }
            let batch = std::mem::take(&mut self.relay.pending[idx]);
            let result = match to {
                Side::A => self.a.add_candidates(&batch).await,
                Side::B => self.b.add_candidates(&batch).await,
            };
            match result {
                Ok(()) => {
                    self.relay.relayed[idx] += batch.len();
                    debug!(to = %to, count = batch.len(), "relayed candidates");
                }
                Err(err) => warn!(to = %to, error = %err, "failed to add candidates"),
            }
        }
    }
}

fn step_error(side: Side, step: &'static str) -> impl FnOnce(EndpointError) -> NegotiationError {
    move |source| NegotiationError::Endpoint { side, step, source }
}
