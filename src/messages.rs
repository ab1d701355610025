//! Ping/pong payloads exchanged between the server and each client.
//!
//! Encoding to bytes is the host's business; these types only derive `serde`
//! so whatever codec the room layer uses can carry them. Field names serialize
//! in camelCase (`serverTime`, `clientPing`, `clientTime`).

use serde::{Deserialize, Serialize};

/// Server → client timing request.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Ping {
    /// Match server time at which the ping was issued. The client must echo it verbatim.
    pub server_time: f64,
    /// The server's latest RTT estimate for this client, so the client can show it.
    pub client_ping: f64,
}

/// Client → server reply to a [`Ping`].
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    /// Client clock reading when the ping was answered.
    pub client_time: f64,
    /// The `server_time` of the triggering ping, unchanged.
    pub server_time: f64,
}

/// A sync message together with the action name it travels under.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload")]
pub enum SyncMessage {
    /// `PING`, server → client.
    #[serde(rename = "PING")]
    Ping(Ping),
    /// `PONG`, client → server.
    #[serde(rename = "PONG")]
    Pong(Pong),
}

impl SyncMessage {
    /// Action name used on the wire for this message.
    #[must_use]
    pub const fn action_name(&self) -> &'static str {
        match self {
            Self::Ping(_) => "PING",
            Self::Pong(_) => "PONG",
        }
    }
}

impl From<Ping> for SyncMessage {
    fn from(ping: Ping) -> Self {
        Self::Ping(ping)
    }
}

impl From<Pong> for SyncMessage {
    fn from(pong: Pong) -> Self {
        Self::Pong(pong)
    }
}
