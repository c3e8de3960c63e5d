use silent_common::fingerprint::FingerprintMismatch;
use silent_common::FrameError;
use thiserror::Error;

/// Errors raised while establishing or running a chat session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// TCP connect failed or did not finish within the dial timeout.
    #[error("dial {addr} failed: {reason}")]
    Dial {
        /// Target address.
        addr: String,
        /// Underlying cause.
        reason: String,
    },
    /// TLS handshake failed or timed out.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),
    /// The server presented no certificate.
    #[error("server presented no certificate")]
    NoCertificate,
    /// The server certificate does not match the configured pin.
    #[error(transparent)]
    FingerprintMismatch(#[from] FingerprintMismatch),
    /// No authentication reply arrived in time.
    #[error("authentication timed out")]
    AuthTimeout,
    /// The server refused the credentials.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    /// The peer sent something the protocol does not allow at this point.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// Frame encoding or decoding failed.
    #[error(transparent)]
    Frame(FrameError),
    /// A write to the transport failed; the session is no longer usable.
    #[error("write failed: {0}")]
    Write(String),
    /// The session was already disconnected.
    #[error("not connected")]
    NotConnected,
    /// A read deadline elapsed with no complete frame.
    #[error("read timed out")]
    ReadTimeout,
    /// The peer closed the connection.
    #[error("connection lost")]
    ConnectionLost,
}

/// How the reconnect policy treats a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Credentials were refused: short fixed delay, attempt counter untouched.
    AuthRejected,
    /// Any other failure: counts toward the escalating backoff.
    Counted,
}

impl SessionError {
    /// Classifies this error for the reconnect policy.
    #[must_use]
    pub const fn retry_class(&self) -> RetryClass {
        match self {
            Self::AuthRejected(_) => RetryClass::AuthRejected,
            _ => RetryClass::Counted,
        }
    }

    /// Returns `true` for a frame that the hard size limit flagged as hostile.
    #[must_use]
    pub const fn is_attack_suspected(&self) -> bool {
        matches!(self, Self::Frame(FrameError::AttackSuspected { .. }))
    }
}

impl From<FrameError> for SessionError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::ZeroLength => Self::ProtocolViolation(err.to_string()),
            other => Self::Frame(other),
        }
    }
}
