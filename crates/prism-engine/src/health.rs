//! Health supervisor — named checks, periodic evaluation, recovery hook.
//!
//! Each registered check is an async callback producing a status and a
//! details payload. Checks are evaluated on a fixed interval and on demand,
//! with a hard per-check timeout; a timeout or panic records `Unhealthy`
//! with the error. Entering `Unhealthy` triggers exactly one recovery
//! attempt (re-running the check).

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use prism_core::{EventBus, HealthStatus, MatchEvent};

/// Hard cap on a single check evaluation.
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of one check evaluation.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub status: HealthStatus,
    pub details: serde_json::Value,
}

impl CheckOutcome {
    #[must_use]
    pub fn healthy(details: serde_json::Value) -> Self {
        Self {
            status: HealthStatus::Healthy,
            details,
        }
    }

    #[must_use]
    pub fn degraded(details: serde_json::Value) -> Self {
        Self {
            status: HealthStatus::Degraded,
            details,
        }
    }

    #[must_use]
    pub fn unhealthy(details: serde_json::Value) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            details,
        }
    }
}

type CheckFuture = Pin<Box<dyn Future<Output = CheckOutcome> + Send>>;
type CheckFn = Arc<dyn Fn() -> CheckFuture + Send + Sync>;

/// Aggregate view over all checks.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: BTreeMap<String, CheckOutcome>,
}

struct Registered {
    name: String,
    check: CheckFn,
}

/// Registry and evaluator for named health checks.
pub struct HealthSupervisor {
    checks: Mutex<Vec<Registered>>,
    last: Mutex<BTreeMap<String, CheckOutcome>>,
    bus: EventBus,
    check_timeout: Duration,
}

impl HealthSupervisor {
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            checks: Mutex::new(Vec::new()),
            last: Mutex::new(BTreeMap::new()),
            bus,
            check_timeout: CHECK_TIMEOUT,
        }
    }

    /// Override the per-check timeout (tests).
    #[must_use]
    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    /// Register a named check. Re-registering a name replaces the callback.
    pub fn register<F, Fut>(&self, name: &str, check: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CheckOutcome> + Send + 'static,
    {
        let mut checks = self.checks.lock();
        checks.retain(|r| r.name != name);
        checks.push(Registered {
            name: name.to_owned(),
            check: Arc::new(move || Box::pin(check())),
        });
        debug!(check = name, "health check registered");
    }

    /// Number of registered checks.
    #[must_use]
    pub fn check_count(&self) -> usize {
        self.checks.lock().len()
    }

    /// Evaluate every registered check once, emitting status-change and
    /// recovery events.
    pub async fn evaluate_all(&self) {
        let snapshot: Vec<(String, CheckFn)> = self
            .checks
            .lock()
            .iter()
            .map(|r| (r.name.clone(), r.check.clone()))
            .collect();

        for (name, check) in snapshot {
            let outcome = self.run_check(&check).await;
            self.record(&name, outcome, &check).await;
        }
    }

    /// Run one check under the timeout, converting panics and timeouts into
    /// `Unhealthy` outcomes.
    async fn run_check(&self, check: &CheckFn) -> CheckOutcome {
        let fut = check();
        match tokio::time::timeout(self.check_timeout, tokio::spawn(fut)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => CheckOutcome::unhealthy(json!({
                "error": format!("check panicked: {join_err}"),
            })),
            Err(_) => CheckOutcome::unhealthy(json!({
                "error": format!("check timed out after {:?}", self.check_timeout),
            })),
        }
    }

    async fn record(&self, name: &str, outcome: CheckOutcome, check: &CheckFn) {
        let previous = {
            let last = self.last.lock();
            last.get(name)
                .map_or(HealthStatus::Healthy, |o| o.status)
        };
        let new = outcome.status;
        self.last.lock().insert(name.to_owned(), outcome);

        if new != previous {
            info!(check = name, from = %previous, to = %new, "health status changed");
            self.bus.emit(&MatchEvent::HealthChanged {
                check: name.to_owned(),
                from: previous,
                to: new,
            });
        }

        if new == HealthStatus::Unhealthy && previous != HealthStatus::Unhealthy {
            self.bus.emit(&MatchEvent::ServiceUnhealthy {
                check: name.to_owned(),
            });
            self.attempt_recovery(name, check).await;
        }
    }

    /// One recovery attempt: re-run the check and see whether it comes back.
    async fn attempt_recovery(&self, name: &str, check: &CheckFn) {
        let outcome = self.run_check(check).await;
        if outcome.status == HealthStatus::Unhealthy {
            warn!(check = name, "recovery attempt failed");
            self.last.lock().insert(name.to_owned(), outcome);
            self.bus.emit(&MatchEvent::RecoveryFail {
                check: name.to_owned(),
            });
        } else {
            info!(check = name, status = %outcome.status, "recovery attempt succeeded");
            self.last.lock().insert(name.to_owned(), outcome);
            self.bus.emit(&MatchEvent::RecoveryOk {
                check: name.to_owned(),
            });
        }
    }

    /// Worst status across all checks; `Healthy` when nothing is registered.
    #[must_use]
    pub fn overall(&self) -> HealthStatus {
        self.last
            .lock()
            .values()
            .map(|o| o.status)
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }

    /// Snapshot of the latest outcomes.
    #[must_use]
    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: self.overall(),
            checks: self.last.lock().clone(),
        }
    }
}

/// Periodic evaluation driver: evaluates all checks every `interval` until
/// cancelled.
pub async fn run_health_loop(
    supervisor: Arc<HealthSupervisor>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                supervisor.evaluate_all().await;
            }
            () = cancel.cancelled() => {
                debug!("health loop cancelled");
                break;
            }
        }
    }
}
