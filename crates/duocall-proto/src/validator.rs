use crate::message::{CandidatePayload, OfferPayload};

/// Frame size ceiling (§6, §4.3): 64 KiB.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;
/// Session-description field ceiling (§6, §4.3): 10 KiB.
pub const MAX_SDP_BYTES: usize = 10 * 1024;
/// Candidate field ceiling (§6, §4.3): 1 KiB.
pub const MAX_CANDIDATE_BYTES: usize = 1024;

const SDP_LINE_MARKERS: [&str; 3] = ["o=", "s=", "t="];

/// Pure, deterministic rejection of malformed signaling payloads. Never
/// mutates its input and has no external dependencies (§4.3).
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Checks the raw frame size before any JSON decoding is attempted.
pub fn validate_frame(bytes: &[u8]) -> Result<(), ValidationError> {
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(ValidationError::new(format!(
            "frame of {} bytes exceeds the {} byte limit",
            bytes.len(),
            MAX_FRAME_BYTES
        )));
    }
    Ok(())
}

fn validate_sdp(payload: &OfferPayload, expected_type: &str) -> Result<(), ValidationError> {
    if payload.sdp.is_empty() {
        return Err(ValidationError::new("sdp must be non-empty"));
    }
    if payload.sdp.len() > MAX_SDP_BYTES {
        return Err(ValidationError::new(format!(
            "sdp of {} bytes exceeds the {} byte limit",
            payload.sdp.len(),
            MAX_SDP_BYTES
        )));
    }
    if !payload.sdp.starts_with("v=0") {
        return Err(ValidationError::new("sdp must begin with v=0"));
    }
    for marker in SDP_LINE_MARKERS {
        if !payload.sdp.contains(marker) {
            return Err(ValidationError::new(format!(
                "sdp is missing a {marker} line"
            )));
        }
    }
    if !payload.sdp.contains("m=audio") && !payload.sdp.contains("m=application") {
        return Err(ValidationError::new(
            "sdp must contain an m=audio or m=application line",
        ));
    }
    if let Some(sdp_type) = &payload.sdp_type {
        if sdp_type != expected_type {
            return Err(ValidationError::new(format!(
                "sdp type {sdp_type} does not match expected {expected_type}"
            )));
        }
    }
    Ok(())
}

/// Validates an `offer` payload (§4.3).
pub fn validate_offer(payload: &OfferPayload) -> Result<(), ValidationError> {
    validate_sdp(payload, "offer")
}

/// Validates an `answer` payload (§4.3).
pub fn validate_answer(payload: &OfferPayload) -> Result<(), ValidationError> {
    validate_sdp(payload, "answer")
}

/// Validates an `ice_candidate` payload (§4.3).
pub fn validate_candidate(payload: &CandidatePayload) -> Result<(), ValidationError> {
    if payload.candidate.is_empty() {
        return Err(ValidationError::new("candidate must be non-empty"));
    }
    if payload.candidate.len() > MAX_CANDIDATE_BYTES {
        return Err(ValidationError::new(format!(
            "candidate of {} bytes exceeds the {} byte limit",
            payload.candidate.len(),
            MAX_CANDIDATE_BYTES
        )));
    }
    if !payload.candidate.contains("candidate:") {
        return Err(ValidationError::new(
            "candidate must contain the literal \"candidate:\"",
        ));
    }
    if let Some(index) = payload.sdp_mline_index {
        if index > 10 {
            return Err(ValidationError::new(
                "sdpMLineIndex must be within [0, 10]",
            ));
        }
    }
    if let Some(mid) = &payload.sdp_mid {
        if mid.len() > 100 {
            return Err(ValidationError::new("sdpMid must be at most 100 bytes"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(sdp: &str) -> OfferPayload {
        OfferPayload {
            sdp_type: Some("offer".to_string()),
            sdp: sdp.to_string(),
        }
    }

    const VALID_SDP: &str =
        "v=0\no=- 0 0 IN IP4 127.0.0.1\ns=-\nt=0 0\nm=audio 0 RTP/AVP 0\n";

    #[test]
    fn accepts_well_formed_offer() {
        assert!(validate_offer(&offer(VALID_SDP)).is_ok());
    }

    #[test]
    fn rejects_offer_missing_v0() {
        let err = validate_offer(&offer("hello")).unwrap_err();
        assert!(err.0.contains("v=0"));
    }

    #[test]
    fn rejects_mismatched_sdp_type() {
        let mut payload = offer(VALID_SDP);
        payload.sdp_type = Some("answer".to_string());
        assert!(validate_offer(&payload).is_err());
    }

    #[test]
    fn rejects_oversize_sdp() {
        let big = format!("{VALID_SDP}{}", "x".repeat(MAX_SDP_BYTES));
        assert!(validate_offer(&offer(&big)).is_err());
    }

    #[test]
    fn accepts_well_formed_candidate() {
        let payload = CandidatePayload {
            candidate: "candidate:1 1 UDP 2130706431 10.0.0.1 5000 typ host".to_string(),
            sdp_mline_index: Some(0),
            sdp_mid: Some("audio".to_string()),
        };
        assert!(validate_candidate(&payload).is_ok());
    }

    #[test]
    fn rejects_candidate_missing_literal() {
        let payload = CandidatePayload {
            candidate: "nope".to_string(),
            sdp_mline_index: None,
            sdp_mid: None,
        };
        assert!(validate_candidate(&payload).is_err());
    }

    #[test]
    fn rejects_candidate_with_out_of_range_mline_index() {
        let payload = CandidatePayload {
            candidate: "candidate:1 1 UDP 2130706431 10.0.0.1 5000 typ host".to_string(),
            sdp_mline_index: Some(11),
            sdp_mid: None,
        };
        assert!(validate_candidate(&payload).is_err());
    }

    #[test]
    fn validate_frame_enforces_size_ceiling() {
        assert!(validate_frame(&[0u8; MAX_FRAME_BYTES]).is_ok());
        assert!(validate_frame(&vec![0u8; MAX_FRAME_BYTES + 1]).is_err());
    }
}
