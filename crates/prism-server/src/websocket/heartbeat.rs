//! Idle-deadline liveness for WebSocket clients.
//!
//! Every inbound frame (including protocol pongs and application `ping`s)
//! calls [`ClientConnection::touch`], resetting the connection's idle clock.
//! This probe wakes on a fixed cadence and reports the connection dead once
//! its idle time crosses the grace period — no per-tick bookkeeping, the
//! connection itself carries the deadline state.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::connection::ClientConnection;

/// Why the liveness probe stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client was silent for longer than the grace period.
    TimedOut,
    /// The probe was cancelled externally (disconnect or shutdown).
    Cancelled,
}

/// Watch a connection's idle time until it exceeds `grace` or `cancel` fires.
///
/// `probe_every` only bounds detection latency; the actual deadline is the
/// idle time accumulated on the connection since its last [`touch`].
///
/// [`touch`]: ClientConnection::touch
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    probe_every: Duration,
    grace: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut probe = tokio::time::interval(probe_every);
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
            _ = probe.tick() => {
                if connection.idle_for() >= grace {
                    return HeartbeatResult::TimedOut;
                }
            }
        }
    }
}
