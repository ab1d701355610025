//! Fuzz target for sync message decoding.
//!
//! Feeds arbitrary bytes to the JSON decoder for [`SyncMessage`], [`Ping`] and
//! [`Pong`]. Hosts decode these straight off the socket, so malformed input
//! must come back as an error, never as a panic.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary input bytes
//! - A decoded message re-encodes under the same action name

#![no_main]

use libfuzzer_sys::fuzz_target;

use duel_timesync::{Ping, Pong, SyncMessage};

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<Ping>(data);
    let _ = serde_json::from_slice::<Pong>(data);

    if let Ok(message) = serde_json::from_slice::<SyncMessage>(data) {
        let name = message.action_name();
        if let Ok(encoded) = serde_json::to_value(message) {
            assert_eq!(encoded["action"], name);
        }
    }
});
