pub mod message;
pub mod validator;

pub use message::{
    CandidatePayload, ClientDecodeError, ClientFrame, ClientMessage, Envelope, ErrorPayload,
    IceServerEntry, IceServersPayload, MatchFoundPayload, OfferPayload,
    PartnerDisconnectedPayload, Role, ServerFrame, ServerMessage, SessionPayload, WaitingPayload,
};
pub use validator::{
    validate_answer, validate_candidate, validate_frame, validate_offer, ValidationError,
    MAX_CANDIDATE_BYTES, MAX_FRAME_BYTES, MAX_SDP_BYTES,
};
