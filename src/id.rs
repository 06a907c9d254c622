//! Correlation id generation.
//!
//! The wire format (spec §6) identifies a request by four lowercase-hex
//! integer fields joined by `-`. This is deliberately not the 8-4-4-4-12
//! layout of a standard UUIDv4; it mirrors the generator used by the kkrpc
//! Rust interop reference so ids emitted by this crate stay parseable by
//! existing kkrpc endpoints. Uniqueness is only required among outstanding
//! entries on a single channel (spec §6), so four 64-bit random fields are
//! more than sufficient.

use rand::Rng;

/// Generate a channel-scoped correlation id: `xxxxxxxxxxxxxxxx-...` (4 parts).
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    let parts: [String; 4] = std::array::from_fn(|_| format!("{:x}", rng.gen::<u64>()));
    parts.join("-")
}
