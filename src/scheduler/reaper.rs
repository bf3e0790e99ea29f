//! Stale request reaper.
//!
//! Periodically sweeps every tenant queue and fails units that have waited at
//! least `request_timeout`. Only queue residency counts: units already running
//! are never touched.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;
use crate::scheduler::tenant::{SharedConfig, Tenant};

/// Evict and fail every unit of `tenant` queued for at least `timeout`.
///
/// Returns the number of evicted units.
pub(crate) fn sweep_tenant(tenant: &Tenant, timeout: Duration, now: Instant) -> usize {
    let expired = {
        let mut state = tenant.state.lock();
        state
            .queue
            .remove_where(|unit| now.saturating_duration_since(unit.enqueued_at) >= timeout)
    };

    let count = expired.len();
    for unit in expired {
        let waited = now.saturating_duration_since(unit.enqueued_at);
        tracing::info!(
            tenant = %tenant.id,
            unit = unit.id,
            priority = %unit.priority,
            waited_ms = waited.as_millis() as u64,
            timeout_ms = timeout.as_millis() as u64,
            "Work unit timed out in queue"
        );
        let error = SchedulerError::RequestTimeout {
            id: unit.id,
            tenant: tenant.id.clone(),
            waited,
            timeout,
        };
        unit.reject(error);
    }

    if count > 0 {
        tenant.wake();
    }
    count
}

/// Sweep a set of tenants with one shared clock reading.
pub(crate) fn sweep<'a, I>(tenants: I, timeout: Duration, now: Instant) -> usize
where
    I: IntoIterator<Item = &'a Arc<Tenant>>,
{
    tenants
        .into_iter()
        .map(|tenant| sweep_tenant(tenant, timeout, now))
        .sum()
}

/// Run `sweep_all` every `reap_interval` until cancelled.
///
/// `sweep_all` returns `None` once there is nothing left to sweep (the
/// scheduler was dropped), which also ends the task.
pub(crate) fn spawn<F>(config: SharedConfig, cancel: CancellationToken, sweep_all: F) -> JoinHandle<()>
where
    F: Fn() -> Option<usize> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let interval = config.read().reap_interval();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            match sweep_all() {
                Some(0) => {}
                Some(evicted) => tracing::debug!(evicted, "Reaper sweep evicted stale work"),
                None => break,
            }
        }
        tracing::debug!("Reaper stopped");
    })
}
