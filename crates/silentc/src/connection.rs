use crate::backoff::ReconnectBackoff;
use crate::config::ClientConfig;
use crate::decoy::spawn_decoy;
use crate::error::{RetryClass, SessionError};
use crate::pump::{run_pump, InboundChat, PumpOutcome, PumpSettings};
use crate::session::Session;
use crate::tls::Dialer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

/// Connection state published to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    /// No transport.
    Disconnected,
    /// Dialing and verifying the server certificate.
    Connecting,
    /// Waiting for the authentication verdict.
    Authenticating,
    /// Authenticated; chat traffic flows.
    Connected,
    /// Tearing the session down.
    Ending,
}

/// Login material reused on every reconnect.
pub struct Credentials {
    /// Chat display name.
    pub username: String,
    /// Server password; wiped from memory on drop.
    pub password: Zeroizing<String>,
}

#[derive(Debug)]
enum AttemptError {
    /// Failed before the session was authenticated.
    Establish(SessionError),
    /// An authenticated session ended with an error.
    Lost(SessionError),
}

/// Aborts the wrapped task if the owner is dropped before awaiting it.
struct TaskGuard(Option<JoinHandle<()>>);

impl TaskGuard {
    async fn join(mut self) {
        if let Some(handle) = self.0.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task failed");
            }
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Top-level connection loop with automatic reconnection and backoff.
///
/// Returns once a session ends without error (operator quit, kill, or end
/// of input). Every other failure is logged and retried.
pub async fn connection_manager<D: Dialer>(
    config: Arc<ClientConfig>,
    dialer: &D,
    credentials: &Credentials,
    mut outbox_rx: mpsc::Receiver<String>,
    inbox_tx: mpsc::Sender<InboundChat>,
    status_tx: watch::Sender<ConnStatus>,
) -> PumpOutcome {
    let mut backoff = ReconnectBackoff::from_config(&config.reconnect);

    loop {
        status_tx.send_replace(ConnStatus::Connecting);

        let result = connect_and_run(
            &config,
            dialer,
            credentials,
            &mut outbox_rx,
            &inbox_tx,
            &status_tx,
            &mut backoff,
        )
        .await;
        status_tx.send_replace(ConnStatus::Disconnected);

        let delay = match result {
            Ok(outcome) => {
                info!(?outcome, "chat session finished");
                return outcome;
            }
            Err(AttemptError::Establish(e)) => {
                let delay = backoff.next_delay(e.retry_class());
                match e.retry_class() {
                    RetryClass::AuthRejected => {
                        warn!(error = %e, delay_ms = millis(delay), "authentication rejected, retrying");
                    }
                    RetryClass::Counted if backoff.attempts() >= backoff.max_retries() => {
                        warn!(
                            error = %e,
                            attempt = backoff.attempts(),
                            delay_ms = millis(delay),
                            "connection failed, backing off"
                        );
                    }
                    RetryClass::Counted => {
                        warn!(
                            error = %e,
                            attempt = backoff.attempts(),
                            max_retries = backoff.max_retries(),
                            delay_ms = millis(delay),
                            "connection failed, retrying"
                        );
                    }
                }
                delay
            }
            Err(AttemptError::Lost(e)) => {
                if e.is_attack_suspected() {
                    error!(error = %e, "server sent an oversized frame, possible attack");
                } else {
                    warn!(error = %e, "connection lost");
                }
                backoff.base_delay()
            }
        };

        info!(delay_ms = millis(delay), "reconnecting");
        tokio::time::sleep(delay).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn connect_and_run<D: Dialer>(
    config: &ClientConfig,
    dialer: &D,
    credentials: &Credentials,
    outbox_rx: &mut mpsc::Receiver<String>,
    inbox_tx: &mpsc::Sender<InboundChat>,
    status_tx: &watch::Sender<ConnStatus>,
    backoff: &mut ReconnectBackoff,
) -> Result<PumpOutcome, AttemptError> {
    let stream = dialer.dial().await.map_err(AttemptError::Establish)?;
    let session = Arc::new(Session::new(stream, config.frame_limits()));

    status_tx.send_replace(ConnStatus::Authenticating);
    session
        .authenticate(
            &credentials.username,
            &credentials.password,
            config.timeouts.auth(),
        )
        .await
        .map_err(AttemptError::Establish)?;

    status_tx.send_replace(ConnStatus::Connected);
    backoff.reset();
    info!(username = %credentials.username, "connected to chat server");

    let decoy = TaskGuard(
        config
            .decoy
            .enabled
            .then(|| spawn_decoy(Arc::clone(&session), &config.decoy)),
    );

    let result = run_pump(
        &session,
        &credentials.username,
        outbox_rx,
        inbox_tx,
        PumpSettings::from_config(config),
    )
    .await;

    status_tx.send_replace(ConnStatus::Ending);
    session.close().await;
    decoy.join().await;
    debug!("session torn down");

    result.map_err(AttemptError::Lost)
}
