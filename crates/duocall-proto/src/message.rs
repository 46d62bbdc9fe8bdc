use serde::{Deserialize, Serialize};

/// Wraps a typed message with the envelope fields the wire format adds on
/// top of `type`/`payload`: `from`/`to` identify the parties of a relayed
/// message, `timestamp` is stamped by the server on every outbound frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<M> {
    #[serde(flatten)]
    pub message: M,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<String>,
}

impl<M> Envelope<M> {
    pub fn new(message: M) -> Self {
        Self {
            message,
            from: None,
            to: None,
            timestamp: None,
        }
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

pub type ClientFrame = Envelope<ClientMessage>;
pub type ServerFrame = Envelope<ServerMessage>;

/// Messages a client may send. The closed set from the wire format (§6).
///
/// Only `Serialize` is derived here -- decoding goes through
/// [`ClientMessage::decode`] instead of a derived `Deserialize`, so a
/// payload that doesn't fit its `type`'s shape can be reported as a
/// per-message validation failure rather than rejecting the whole frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    FindMatch,
    Offer(OfferPayload),
    Answer(AnswerPayload),
    IceCandidate(CandidatePayload),
    CallStart,
    CallAccept,
    CallReject,
    CallEnd,
    Ping,
    Pong,
    Disconnect,
    GetIceServers,
    /// Any `type` outside the closed set above, or a recognized `type`
    /// whose shape this build doesn't model -- the read loop logs and
    /// ignores it (spec §4.5) rather than treating it as a decode failure
    /// that tears the session down.
    Unknown,
}

/// The envelope fields `ClientMessage::decode` needs before it knows which
/// payload shape to expect: `type` is required, `payload` is kept as an
/// untyped [`serde_json::Value`] until the `type` match below picks a
/// concrete struct to deserialize it into.
#[derive(Debug, Deserialize)]
struct RawClientFrame {
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Distinguishes a frame that isn't well-formed JSON (or has no `type`
/// field at all) from a syntactically fine envelope whose `payload`
/// doesn't fit the shape its `type` implies. Spec §7 treats the two
/// differently: `Syntax` is a transport-level failure that tears the
/// session down; `InvalidPayload` is a validation failure that gets an
/// `error` reply while the session continues.
#[derive(Debug)]
pub enum ClientDecodeError {
    Syntax(serde_json::Error),
    InvalidPayload { ty: String, reason: String },
}

impl std::fmt::Display for ClientDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientDecodeError::Syntax(err) => write!(f, "malformed frame: {err}"),
            ClientDecodeError::InvalidPayload { ty, reason } => {
                write!(f, "invalid payload for \"{ty}\": {reason}")
            }
        }
    }
}

impl std::error::Error for ClientDecodeError {}

impl ClientMessage {
    /// Decodes one inbound frame leniently (spec §7). The `type` tag and
    /// envelope shape must be well-formed JSON (`Syntax` otherwise); once
    /// `type` is known, a `payload` that fails to deserialize into that
    /// type's struct is reported as `InvalidPayload` rather than bubbling
    /// up as a whole-frame decode error, so the caller can route it through
    /// the Validator's error-reply path instead of tearing the session
    /// down.
    pub fn decode(bytes: &[u8]) -> Result<Self, ClientDecodeError> {
        let raw: RawClientFrame =
            serde_json::from_slice(bytes).map_err(ClientDecodeError::Syntax)?;

        let invalid = |err: serde_json::Error| ClientDecodeError::InvalidPayload {
            ty: raw.ty.clone(),
            reason: err.to_string(),
        };

        Ok(match raw.ty.as_str() {
            "find_match" => ClientMessage::FindMatch,
            "offer" => ClientMessage::Offer(serde_json::from_value(raw.payload).map_err(invalid)?),
            "answer" => {
                ClientMessage::Answer(serde_json::from_value(raw.payload).map_err(invalid)?)
            }
            "ice_candidate" => {
                ClientMessage::IceCandidate(serde_json::from_value(raw.payload).map_err(invalid)?)
            }
            "call_start" => ClientMessage::CallStart,
            "call_accept" => ClientMessage::CallAccept,
            "call_reject" => ClientMessage::CallReject,
            "call_end" => ClientMessage::CallEnd,
            "ping" => ClientMessage::Ping,
            "pong" => ClientMessage::Pong,
            "disconnect" => ClientMessage::Disconnect,
            "get_ice_servers" => ClientMessage::GetIceServers,
            _ => ClientMessage::Unknown,
        })
    }
}

/// Messages the server may send, including the forwarded `offer`/`answer`/
/// `ice_candidate` variants that originate from a partner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    Session(SessionPayload),
    Waiting(WaitingPayload),
    MatchFound(MatchFoundPayload),
    CallIncoming,
    CallAccepted,
    CallRejected,
    CallEnded,
    PartnerDisconnected(PartnerDisconnectedPayload),
    IceServers(IceServersPayload),
    Ping,
    Error(ErrorPayload),
    Offer(OfferPayload),
    Answer(AnswerPayload),
    IceCandidate(CandidatePayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPayload {
    pub user_id: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitingPayload {
    pub status: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caller,
    Callee,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFoundPayload {
    pub partner_id: String,
    pub room_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerDisconnectedPayload {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerEntry {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServersPayload {
    #[serde(rename = "iceServers")]
    pub ice_servers: Vec<IceServerEntry>,
}

/// SDP session description payload, shared by `offer` and `answer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferPayload {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub sdp_type: Option<String>,
    pub sdp: String,
}

pub type AnswerPayload = OfferPayload;

/// Network candidate descriptor payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidatePayload {
    pub candidate: String,
    #[serde(
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub sdp_mline_index: Option<u8>,
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none", default)]
    pub sdp_mid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_recognizes_each_closed_set_variant() {
        assert!(matches!(
            ClientMessage::decode(br#"{"type":"find_match"}"#).unwrap(),
            ClientMessage::FindMatch
        ));
        assert!(matches!(
            ClientMessage::decode(br#"{"type":"disconnect"}"#).unwrap(),
            ClientMessage::Disconnect
        ));
    }

    #[test]
    fn decode_maps_unrecognized_type_to_unknown() {
        assert!(matches!(
            ClientMessage::decode(br#"{"type":"teleport"}"#).unwrap(),
            ClientMessage::Unknown
        ));
    }

    #[test]
    fn decode_rejects_non_json_as_syntax_error() {
        let err = ClientMessage::decode(b"not json at all").unwrap_err();
        assert!(matches!(err, ClientDecodeError::Syntax(_)));
    }

    #[test]
    fn decode_rejects_missing_type_as_syntax_error() {
        let err = ClientMessage::decode(br#"{"payload":{}}"#).unwrap_err();
        assert!(matches!(err, ClientDecodeError::Syntax(_)));
    }

    #[test]
    fn decode_reports_missing_required_field_as_invalid_payload_not_syntax() {
        // ice_candidate's payload requires "candidate" -- an empty payload
        // object is well-formed JSON but the wrong shape for its type.
        let err =
            ClientMessage::decode(br#"{"type":"ice_candidate","payload":{}}"#).unwrap_err();
        match err {
            ClientDecodeError::InvalidPayload { ty, .. } => assert_eq!(ty, "ice_candidate"),
            ClientDecodeError::Syntax(_) => panic!("expected InvalidPayload, got Syntax"),
        }
    }

    #[test]
    fn decode_reports_wrong_field_type_as_invalid_payload_not_syntax() {
        // sdp must be a string; a number is well-formed JSON, wrong shape.
        let err = ClientMessage::decode(br#"{"type":"offer","payload":{"sdp":5}}"#).unwrap_err();
        match err {
            ClientDecodeError::InvalidPayload { ty, .. } => assert_eq!(ty, "offer"),
            ClientDecodeError::Syntax(_) => panic!("expected InvalidPayload, got Syntax"),
        }
    }

    #[test]
    fn decode_accepts_well_formed_offer_payload() {
        let msg = ClientMessage::decode(
            br#"{"type":"offer","payload":{"sdp":"v=0","type":"offer"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Offer(p) => assert_eq!(p.sdp, "v=0"),
            other => panic!("expected offer, got {other:?}"),
        }
    }
}
