use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum MessageKind {
    Offer,
    Answer,
    IceCandidate,
    UserJoined,
    UserLeft,
}

/// One signaling control message. Transient: built right before
/// transmission, discarded after the receiver handles it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub peer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_peer_id: Option<String>,
    pub meeting_id: String,
    pub data: Value,
}

impl SignalingMessage {
    pub fn offer(peer_id: &str, target_peer_id: &str, meeting_id: &str, sdp: Value) -> Self {
        Self::targeted(MessageKind::Offer, peer_id, target_peer_id, meeting_id, sdp)
    }

    pub fn answer(peer_id: &str, target_peer_id: &str, meeting_id: &str, sdp: Value) -> Self {
        Self::targeted(MessageKind::Answer, peer_id, target_peer_id, meeting_id, sdp)
    }

    pub fn ice_candidate(
        peer_id: &str,
        target_peer_id: &str,
        meeting_id: &str,
        candidate: Value,
    ) -> Self {
        Self::targeted(MessageKind::IceCandidate, peer_id, target_peer_id, meeting_id, candidate)
    }

    pub fn user_joined(peer_id: &str, meeting_id: &str) -> Self {
        Self::presence(MessageKind::UserJoined, peer_id, meeting_id)
    }

    pub fn user_left(peer_id: &str, meeting_id: &str) -> Self {
        Self::presence(MessageKind::UserLeft, peer_id, meeting_id)
    }

    fn targeted(
        kind: MessageKind,
        peer_id: &str,
        target_peer_id: &str,
        meeting_id: &str,
        data: Value,
    ) -> Self {
        Self {
            kind,
            peer_id: peer_id.to_string(),
            target_peer_id: Some(target_peer_id.to_string()),
            meeting_id: meeting_id.to_string(),
            data,
        }
    }

    fn presence(kind: MessageKind, peer_id: &str, meeting_id: &str) -> Self {
        Self {
            kind,
            peer_id: peer_id.to_string(),
            target_peer_id: None,
            meeting_id: meeting_id.to_string(),
            data: json!({ "timestamp": Utc::now().timestamp_millis() }),
        }
    }

    /// Inbound addressing filter: self-originated messages (including
    /// transport echoes) are never processed, and targeted messages are
    /// processed only by the addressed peer. Broadcasts pass for everyone
    /// else.
    pub fn addressed_to(&self, local_peer_id: &str) -> bool {
        if self.peer_id == local_peer_id {
            return false;
        }
        match &self.target_peer_id {
            Some(target) => target == local_peer_id,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addressing_filter() {
        let broadcast = SignalingMessage::user_joined("a", "m1");
        assert!(!broadcast.addressed_to("a"));
        assert!(broadcast.addressed_to("b"));
        assert!(broadcast.addressed_to("c"));

        let targeted = SignalingMessage::offer("a", "b", "m1", json!({"sdp": "x"}));
        assert!(!targeted.addressed_to("a"));
        assert!(targeted.addressed_to("b"));
        assert!(!targeted.addressed_to("c"));
    }

    #[test]
    fn test_wire_format() {
        let msg = SignalingMessage::ice_candidate("a", "b", "m1", json!({"candidate": "..."}));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "ice-candidate");
        assert_eq!(value["peerId"], "a");
        assert_eq!(value["targetPeerId"], "b");
        assert_eq!(value["meetingId"], "m1");

        let joined = serde_json::to_value(SignalingMessage::user_joined("a", "m1")).unwrap();
        assert_eq!(joined["type"], "user-joined");
        assert!(joined.get("targetPeerId").is_none());
        assert!(joined["data"]["timestamp"].is_i64());
    }

    #[test]
    fn test_broadcast_roundtrip() {
        let raw = r#"{"type":"offer","peerId":"a","targetPeerId":"b","meetingId":"m1","data":{"sdp":"v=0"}}"#;
        let msg: SignalingMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.kind, MessageKind::Offer);
        assert_eq!(msg.target_peer_id.as_deref(), Some("b"));
        assert_eq!(msg.data["sdp"], "v=0");
    }
}
