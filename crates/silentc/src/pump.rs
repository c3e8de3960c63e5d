use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::session::Session;
use rand::Rng;
use silent_common::types::{command, KILL_SEQUENCE};
use silent_common::{FrameError, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// A chat line received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundChat {
    /// Author display name.
    pub sender: String,
    /// Line content.
    pub text: String,
}

/// How a pump ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// The operator typed `/quit` or `/q`.
    Quit,
    /// The operator typed `/kill`; the shutdown sequence was attempted.
    Killed,
    /// The input side closed its channel.
    InputClosed,
}

/// Timing knobs for the pump.
#[derive(Debug, Clone, Copy)]
pub struct PumpSettings {
    /// Per-read deadline; `None` waits indefinitely.
    pub read_timeout: Option<Duration>,
    /// Upper bound of the random delay before each chat send.
    pub max_send_delay: Duration,
}

impl PumpSettings {
    /// Extracts pump settings from the client configuration.
    #[must_use]
    pub const fn from_config(config: &ClientConfig) -> Self {
        Self {
            read_timeout: config.timeouts.read(),
            max_send_delay: Duration::from_millis(config.jitter.max_send_delay_ms),
        }
    }
}

fn send_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    rand::thread_rng().gen_range(Duration::ZERO..=max)
}

/// Forwards inbound chat lines until the session ends.
///
/// Returns `Ok(())` once the session is closed, whether locally or after a
/// failed write elsewhere.
///
/// # Errors
///
/// [`SessionError::ConnectionLost`] when the peer closes the stream, or the
/// frame/transport error that ended the read.
pub async fn receive_loop<S>(
    session: &Session<S>,
    read_timeout: Option<Duration>,
    inbox_tx: &mpsc::Sender<InboundChat>,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    loop {
        if !session.is_connected() {
            return Ok(());
        }
        match session.receive(read_timeout).await {
            Ok(Message::Chat {
                sender_name, text, ..
            }) => {
                if sender_name.is_empty() || text.is_empty() {
                    debug!("dropping chat message with empty sender or text");
                    continue;
                }
                let chat = InboundChat {
                    sender: sender_name,
                    text,
                };
                if inbox_tx.send(chat).await.is_err() {
                    debug!("inbound chat dropped: no renderer attached");
                }
            }
            Ok(Message::Fake { .. }) => trace!("discarding decoy"),
            Ok(other) => debug!(kind = other.kind(), "ignoring unexpected message"),
            Err(SessionError::ReadTimeout) => {}
            Err(SessionError::NotConnected) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

/// Sends operator lines until a control command, end of input or failure.
///
/// # Errors
///
/// [`SessionError::NotConnected`] if the session closes underneath the loop,
/// or the write error that ended it.
pub async fn send_loop<S>(
    session: &Session<S>,
    username: &str,
    outbox_rx: &mut mpsc::Receiver<String>,
    max_send_delay: Duration,
) -> Result<PumpOutcome, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    loop {
        let line = tokio::select! {
            () = session.closed() => return Err(SessionError::NotConnected),
            line = outbox_rx.recv() => line,
        };
        let Some(line) = line else {
            debug!("input closed");
            return Ok(PumpOutcome::InputClosed);
        };

        let text = line.trim();
        match text {
            "" => continue,
            command::QUIT | command::QUIT_SHORT => {
                info!("quit requested");
                return Ok(PumpOutcome::Quit);
            }
            command::KILL => {
                match session.send_raw(&KILL_SEQUENCE).await {
                    Ok(()) => info!("server shutdown sequence sent"),
                    Err(e) => warn!(error = %e, "failed to send server shutdown sequence"),
                }
                return Ok(PumpOutcome::Killed);
            }
            _ => {}
        }

        let delay = send_jitter(max_send_delay);
        if !delay.is_zero() {
            tokio::select! {
                () = session.closed() => return Err(SessionError::NotConnected),
                () = tokio::time::sleep(delay) => {}
            }
        }

        match session.send(&Message::chat(username, text)).await {
            Ok(()) => trace!(len = text.len(), "chat sent"),
            Err(e @ SessionError::Frame(FrameError::SizeExceeded { .. })) => {
                warn!(error = %e, "message too long, not sent");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Runs the receive and send loops over one session until either ends.
///
/// Whichever side finishes first closes the session, which stops the other;
/// both have exited when this returns.
///
/// # Errors
///
/// The error that ended the session. A peer-initiated close surfaces as
/// [`SessionError::ConnectionLost`].
pub async fn run_pump<S>(
    session: &Arc<Session<S>>,
    username: &str,
    outbox_rx: &mut mpsc::Receiver<String>,
    inbox_tx: &mpsc::Sender<InboundChat>,
    settings: PumpSettings,
) -> Result<PumpOutcome, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let inbound = async {
        let result = receive_loop(session, settings.read_timeout, inbox_tx).await;
        session.close().await;
        result
    };
    let outbound = async {
        let result = send_loop(session, username, outbox_rx, settings.max_send_delay).await;
        session.close().await;
        result
    };

    let (inbound_result, outbound_result) = tokio::join!(inbound, outbound);

    match (outbound_result, inbound_result) {
        (Ok(outcome), _) => Ok(outcome),
        (Err(_), Err(e)) | (Err(e), Ok(())) if !matches!(e, SessionError::NotConnected) => Err(e),
        _ => Err(SessionError::ConnectionLost),
    }
}
