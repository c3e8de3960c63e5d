//! Application message model carried inside frames.
//!
//! Bodies are JSON objects tagged by a `type` field. Optional fields are
//! omitted when empty so the encoding stays compatible with servers that
//! treat absent and empty values the same way.

use serde::{Deserialize, Serialize};

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Credentials presented right after the TLS handshake.
    Auth {
        /// Display name requested by the operator.
        username: String,
        /// Hex digest of the password (never the raw secret).
        #[serde(rename = "password")]
        credential_digest: String,
    },
    /// Server verdict on an [`Message::Auth`].
    AuthResult {
        /// Whether the credentials were accepted.
        #[serde(default)]
        success: bool,
        /// Human-readable rejection reason.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A chat line.
    Chat {
        /// Name of the author.
        #[serde(default)]
        sender_name: String,
        /// Line content.
        #[serde(default)]
        text: String,
        /// Author address as relayed by the server, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_ip: Option<String>,
    },
    /// Decoy filler; indistinguishable from chat on the wire except for the tag.
    Fake {
        /// Random filler text.
        #[serde(default)]
        text: String,
    },
    /// Any kind this client does not understand.
    #[serde(other)]
    Unknown,
}

impl Message {
    /// Builds an auth message from a username and an already-computed digest.
    #[must_use]
    pub fn auth(username: &str, credential_digest: &str) -> Self {
        Self::Auth {
            username: username.to_string(),
            credential_digest: credential_digest.to_string(),
        }
    }

    /// Builds an outbound chat line.
    #[must_use]
    pub fn chat(sender_name: &str, text: &str) -> Self {
        Self::Chat {
            sender_name: sender_name.to_string(),
            text: text.to_string(),
            sender_ip: None,
        }
    }

    /// Builds a decoy message.
    #[must_use]
    pub fn fake(text: String) -> Self {
        Self::Fake { text }
    }

    /// Returns the wire name of this message's kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        use crate::types::kind;
        match self {
            Self::Auth { .. } => kind::AUTH,
            Self::AuthResult { .. } => kind::AUTH_RESULT,
            Self::Chat { .. } => kind::CHAT,
            Self::Fake { .. } => kind::FAKE,
            Self::Unknown => "unknown",
        }
    }
}
