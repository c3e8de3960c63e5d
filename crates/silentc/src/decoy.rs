use crate::config::DecoyConfig;
use crate::session::Session;
use rand::Rng;
use silent_common::crypto::random_filler_in;
use silent_common::Message;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Picks the decoy period for one session, uniformly from `range_s` seconds.
#[must_use]
pub fn pick_period(range_s: RangeInclusive<u64>) -> Duration {
    Duration::from_secs(rand::thread_rng().gen_range(range_s))
}

/// Spawns the decoy generator for `session`.
///
/// The task ends on its own once the session closes or a send fails; the
/// caller awaits the handle during teardown.
pub fn spawn_decoy<S>(session: Arc<Session<S>>, config: &DecoyConfig) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let period = pick_period(config.period_range_s());
    let filler_len = config.len_range();
    debug!(period_s = period.as_secs(), "decoy generator scheduled");
    tokio::spawn(run_decoy(session, period, filler_len))
}

/// Sends one `fake` message of random length every `period`, starting one
/// period from now, until the session goes down.
pub async fn run_decoy<S>(session: Arc<Session<S>>, period: Duration, filler_len: RangeInclusive<usize>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = session.closed() => break,
            _ = ticker.tick() => {}
        }
        if !session.is_connected() {
            break;
        }

        let decoy = Message::fake(random_filler_in(filler_len.clone()));
        if let Err(e) = session.send(&decoy).await {
            debug!(error = %e, "decoy send failed, stopping");
            break;
        }
        trace!("decoy sent");
    }

    debug!("decoy generator stopped");
}
