use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

/// Collision-resistant opaque user id (spec §4.5's handshake).
pub fn new_user_id() -> String {
    format!("u_{}", Uuid::new_v4().simple())
}

/// Opaque per-session token (spec §4.5's handshake). Not a capability, not
/// persisted beyond the process's lifetime -- see SPEC_FULL.md's Non-goals
/// on authentication.
pub fn new_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

pub fn new_room_id() -> String {
    format!("r_{}", Uuid::new_v4().simple())
}
