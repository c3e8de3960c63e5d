//! Protocol constants shared by every silent chat peer.

/// Size of the big-endian length prefix in front of every frame body.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default soft limit for a frame body (64 KiB), enforced on encode and decode.
pub const DEFAULT_SOFT_MAX: usize = 65_536;

/// Default hard limit for a frame body (10 MiB), enforced on decode only.
pub const DEFAULT_HARD_MAX: usize = 10 * 1024 * 1024;

/// Out-of-band shutdown request: `MSGE` followed by four zero bytes.
/// Written unframed; the server matches these exact bytes.
pub const KILL_SEQUENCE: [u8; 8] = *b"MSGE\x00\x00\x00\x00";

/// Operator commands recognised by the send path.
pub mod command {
    /// Leave the chat and terminate the client.
    pub const QUIT: &str = "/quit";
    /// Short form of [`QUIT`].
    pub const QUIT_SHORT: &str = "/q";
    /// Ask the server to shut down, then leave.
    pub const KILL: &str = "/kill";
}

/// Wire names of the message `type` tag.
pub mod kind {
    /// Client → server credentials.
    pub const AUTH: &str = "auth";
    /// Server → client authentication verdict.
    pub const AUTH_RESULT: &str = "auth_result";
    /// Chat line in either direction.
    pub const CHAT: &str = "chat";
    /// Decoy filler, discarded by the receiver.
    pub const FAKE: &str = "fake";
}
