//! Peer-to-peer negotiation payloads.
//!
//! The relay treats these as opaque JSON; only the clients' negotiation state
//! machines interpret them.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::protocol::{ClientEvent, OutboundSignal};
use crate::types::{CallId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An offer or answer session description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A connectivity candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

/// Build the relay event for a local description.
pub fn description_event(
    to_user: &UserId,
    call_id: CallId,
    description: &SessionDescription,
) -> Result<ClientEvent, ProtocolError> {
    let signal = OutboundSignal {
        to_user: Some(to_user.clone()),
        call_id: Some(call_id),
        payload: serde_json::to_value(description)?,
    };
    Ok(match description.sdp_type {
        SdpType::Offer => ClientEvent::NegotiationOffer(signal),
        SdpType::Answer => ClientEvent::NegotiationAnswer(signal),
    })
}

/// Build the relay event for a local connectivity candidate.
pub fn candidate_event(
    to_user: &UserId,
    call_id: CallId,
    candidate: &IceCandidate,
) -> Result<ClientEvent, ProtocolError> {
    Ok(ClientEvent::ConnectivityCandidate(OutboundSignal {
        to_user: Some(to_user.clone()),
        call_id: Some(call_id),
        payload: serde_json::to_value(candidate)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_uses_browser_field_names() {
        let value = serde_json::to_value(SessionDescription::offer("v=0")).unwrap();
        assert_eq!(value["type"], "offer");
        assert_eq!(value["sdp"], "v=0");
    }

    #[test]
    fn offer_and_answer_map_to_distinct_events() {
        let peer = UserId::new("bob");
        let call = CallId::new();
        let offer = description_event(&peer, call, &SessionDescription::offer("o")).unwrap();
        let answer = description_event(&peer, call, &SessionDescription::answer("a")).unwrap();
        assert!(matches!(offer, ClientEvent::NegotiationOffer(_)));
        assert!(matches!(answer, ClientEvent::NegotiationAnswer(_)));
    }
}
