//! Messages the harness relays between two endpoints.

use renego_sdp::SessionDescription;
use serde::{Deserialize, Serialize};

/// Mirrors the browser's `RTCIceCandidateInit`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    /// An empty candidate string is how some browsers spell end-of-candidates.
    pub fn is_end_marker(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalingMessage {
    Description(SessionDescription),
    Candidate(IceCandidate),
    EndOfCandidates,
}

impl SignalingMessage {
    /// Map an `onicecandidate` event; `null` or an empty candidate ends gathering.
    pub fn from_candidate_event(candidate: Option<IceCandidate>) -> Self {
        match candidate {
            Some(candidate) if !candidate.is_end_marker() => SignalingMessage::Candidate(candidate),
            _ => SignalingMessage::EndOfCandidates,
        }
    }
}

/// Candidates drained from an endpoint since the previous drain.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct CandidateBatch {
    #[serde(default)]
    pub candidates: Vec<IceCandidate>,
    /// Set once the endpoint has seen its end-of-candidates signal.
    #[serde(default)]
    pub complete: bool,
}

impl CandidateBatch {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Fold raw candidate events into a batch, dropping end markers.
    pub fn from_messages(messages: impl IntoIterator<Item = SignalingMessage>) -> Self {
        let mut batch = CandidateBatch::default();
        for message in messages {
            match message {
                SignalingMessage::Candidate(candidate) => batch.candidates.push(candidate),
                SignalingMessage::EndOfCandidates => batch.complete = true,
                SignalingMessage::Description(_) => {}
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host_candidate() -> IceCandidate {
        IceCandidate {
            candidate: "candidate:1 1 UDP 2015363327 192.168.0.198 4557 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        }
    }

    #[test]
    fn candidate_uses_browser_field_names() {
        let value = serde_json::to_value(host_candidate()).expect("serializes");
        assert_eq!(value["sdpMid"], json!("0"));
        assert_eq!(value["sdpMLineIndex"], json!(0));
    }

    #[test]
    fn null_and_empty_candidates_end_gathering() {
        assert_eq!(
            SignalingMessage::from_candidate_event(None),
            SignalingMessage::EndOfCandidates
        );
        let empty = IceCandidate {
            candidate: String::new(),
            sdp_mid: None,
            sdp_m_line_index: None,
        };
        assert_eq!(
            SignalingMessage::from_candidate_event(Some(empty)),
            SignalingMessage::EndOfCandidates
        );
        assert_eq!(
            SignalingMessage::from_candidate_event(Some(host_candidate())),
            SignalingMessage::Candidate(host_candidate())
        );
    }

    #[test]
    fn batch_collects_candidates_and_completion() {
        let batch = CandidateBatch::from_messages([
            SignalingMessage::Candidate(host_candidate()),
            SignalingMessage::EndOfCandidates,
        ]);
        assert_eq!(batch.candidates, vec![host_candidate()]);
        assert!(batch.complete);
    }

    #[test]
    fn description_message_is_tagged() {
        let message = SignalingMessage::Description(SessionDescription::offer("v=0\r\n"));
        let value = serde_json::to_value(&message).expect("serializes");
        assert_eq!(value, json!({ "kind": "description", "type": "offer", "sdp": "v=0\r\n" }));
    }
}
