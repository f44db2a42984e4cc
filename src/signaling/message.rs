use crate::peer::types::{IceCandidate, SessionDescription};
use crate::session::PartyId;
use serde::{Deserialize, Serialize};

/// One relay frame: `{"event": "<name>", "data": {...}}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum SignalingMessage {
    /// Binds the local identity to the relay connection.
    #[serde(rename = "register_user")]
    Register { email: PartyId },
    #[serde(rename = "offer")]
    Offer {
        to: PartyId,
        from: PartyId,
        offer: SessionDescription,
    },
    #[serde(rename = "answer")]
    Answer {
        to: PartyId,
        from: PartyId,
        answer: SessionDescription,
    },
    #[serde(rename = "ice-candidate")]
    IceCandidate {
        to: PartyId,
        from: PartyId,
        candidate: IceCandidate,
    },
    #[serde(rename = "endCall")]
    EndCall { to: PartyId, from: PartyId },
}

impl SignalingMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            SignalingMessage::Register { .. } => "register_user",
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "ice-candidate",
            SignalingMessage::EndCall { .. } => "endCall",
        }
    }

    /// Addressee; registration frames have none.
    pub fn to(&self) -> Option<&PartyId> {
        match self {
            SignalingMessage::Register { .. } => None,
            SignalingMessage::Offer { to, .. }
            | SignalingMessage::Answer { to, .. }
            | SignalingMessage::IceCandidate { to, .. }
            | SignalingMessage::EndCall { to, .. } => Some(to),
        }
    }

    pub fn from(&self) -> Option<&PartyId> {
        match self {
            SignalingMessage::Register { .. } => None,
            SignalingMessage::Offer { from, .. }
            | SignalingMessage::Answer { from, .. }
            | SignalingMessage::IceCandidate { from, .. }
            | SignalingMessage::EndCall { from, .. } => Some(from),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offer_frame_shape() {
        let msg = SignalingMessage::Offer {
            to: "userB".into(),
            from: "driverA".into(),
            offer: SessionDescription::offer("v=0"),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "offer",
                "data": {
                    "to": "userB",
                    "from": "driverA",
                    "offer": { "type": "offer", "sdp": "v=0" }
                }
            })
        );
    }

    #[test]
    fn parses_browser_candidate_frame() {
        let raw = r#"{
            "event": "ice-candidate",
            "data": {
                "to": "driverA",
                "from": "userB",
                "candidate": {
                    "candidate": "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host",
                    "sdpMid": "0",
                    "sdpMLineIndex": 0,
                    "usernameFragment": "abcd"
                }
            }
        }"#;
        let msg = SignalingMessage::from_json(raw).unwrap();
        assert_eq!(msg.event_name(), "ice-candidate");
        assert_eq!(msg.from(), Some(&PartyId::from("userB")));
        match msg {
            SignalingMessage::IceCandidate { candidate, .. } => {
                assert_eq!(candidate.sdp_mline_index, Some(0));
                assert_eq!(candidate.username_fragment.as_deref(), Some("abcd"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn register_and_end_call_frames() {
        let register = SignalingMessage::Register {
            email: "driverA".into(),
        };
        assert_eq!(
            register.to_json().unwrap(),
            r#"{"event":"register_user","data":{"email":"driverA"}}"#
        );
        assert!(register.to().is_none());

        let end = SignalingMessage::from_json(
            r#"{"event":"endCall","data":{"to":"driverA","from":"userB"}}"#,
        )
        .unwrap();
        assert_eq!(
            end,
            SignalingMessage::EndCall {
                to: "driverA".into(),
                from: "userB".into()
            }
        );
    }

    #[test]
    fn unknown_events_are_rejected() {
        assert!(SignalingMessage::from_json(r#"{"event":"typing","data":{}}"#).is_err());
        assert!(SignalingMessage::from_json("not json").is_err());
    }
}
