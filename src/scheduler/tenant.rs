//! Per-tenant scheduling state and the task that drains it.
//!
//! Each tenant owns its queue, quota set and bypass budget behind one lock, and
//! one long-lived task that re-runs the admission decision whenever it is woken:
//! on enqueue, quota update, reconfiguration, reaper eviction, completion of a
//! unit, or when a throttle delay / quota reset elapses.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::scheduler::bypass::BypassBudget;
use crate::scheduler::queue::PriorityQueue;
use crate::scheduler::rate_limit::{QuotaTracker, ResourceClass};
use crate::scheduler::select::{Step, choose};
use crate::scheduler::work::WorkUnit;

/// Active configuration snapshot shared by every tenant task.
pub(crate) type SharedConfig = Arc<RwLock<Arc<SchedulerConfig>>>;

/// Identifier of an isolated caller (user, session, installation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&TenantId> for TenantId {
    fn from(value: &TenantId) -> Self {
        value.clone()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mutable scheduling state of one tenant.
#[derive(Debug)]
pub(crate) struct TenantState {
    pub(crate) queue: PriorityQueue<WorkUnit>,
    pub(crate) quotas: QuotaTracker,
    pub(crate) bypass: BypassBudget,
    /// Last dispatch per resource class, for throttled pacing.
    pub(crate) last_dispatch: HashMap<ResourceClass, Instant>,
    /// Set once the tenant has been dropped from the scheduler.
    pub(crate) retired: bool,
}

impl TenantState {
    fn new(now: Instant) -> Self {
        Self {
            queue: PriorityQueue::new(),
            quotas: QuotaTracker::new(),
            bypass: BypassBudget::new(now),
            last_dispatch: HashMap::new(),
            retired: false,
        }
    }

    /// Restore quotas whose reset time has passed, logging each one.
    pub(crate) fn roll_over(&mut self, tenant: &TenantId, wall_now: DateTime<Utc>) {
        for class in self.quotas.roll_over(wall_now) {
            tracing::info!(
                tenant = %tenant,
                resource = %class,
                "Quota window reset elapsed, releasing queued work"
            );
        }
    }
}

pub(crate) struct Tenant {
    pub(crate) id: TenantId,
    pub(crate) state: Mutex<TenantState>,
    wake: Notify,
    cancel: CancellationToken,
}

impl Tenant {
    pub(crate) fn new(id: TenantId, parent: &CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: Mutex::new(TenantState::new(Instant::now())),
            wake: Notify::new(),
            cancel: parent.child_token(),
        })
    }

    /// Ask the scheduling task to re-run admission.
    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }

    /// Stop the scheduling task and hand back everything still queued.
    pub(crate) fn retire(&self) -> Vec<WorkUnit> {
        let mut state = self.state.lock();
        state.retired = true;
        state.quotas.clear();
        self.cancel.cancel();
        state.queue.drain()
    }

    /// Start the unit's job on the runtime; the tenant is woken when it finishes.
    pub(crate) fn dispatch(self: &Arc<Self>, unit: WorkUnit) {
        tracing::debug!(
            tenant = %self.id,
            unit = unit.id,
            priority = %unit.priority,
            resource = %unit.resource_class,
            waited_ms = unit.enqueued_at.elapsed().as_millis() as u64,
            "Dispatching work unit"
        );

        let tenant = Arc::clone(self);
        tokio::spawn(async move {
            unit.execute().await;
            tenant.wake();
        });
    }

    /// Spawn the tenant's scheduling task.
    pub(crate) fn spawn(self: &Arc<Self>, config: SharedConfig) -> JoinHandle<()> {
        let tenant = Arc::clone(self);
        tokio::spawn(async move { tenant.run(config).await })
    }

    async fn run(self: Arc<Self>, config: SharedConfig) {
        tracing::debug!(tenant = %self.id, "Tenant scheduling task started");

        loop {
            let snapshot = Arc::clone(&*config.read());

            let until = match self.admit_next(&snapshot) {
                Step::RunNow => continue,
                Step::Idle => None,
                Step::Throttled { until } => Some(until),
                Step::AwaitReset { until } => {
                    tracing::debug!(
                        tenant = %self.id,
                        wait_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
                        "Quota exhausted, waiting for reset"
                    );
                    Some(until)
                }
            };

            match until {
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = self.wake.notified() => {}
                    }
                }
                Some(until) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep_until(until) => {}
                    }
                }
            }
        }

        tracing::debug!(tenant = %self.id, "Tenant scheduling task stopped");
    }

    /// Run one admission decision; on `RunNow` dispatches the most urgent unit
    /// of the chosen class.
    fn admit_next(self: &Arc<Self>, config: &SchedulerConfig) -> Step {
        let now = Instant::now();
        let mut state = self.state.lock();
        if state.retired {
            return Step::Idle;
        }

        let wall_now = Utc::now();
        state.roll_over(&self.id, wall_now);

        let (step, class) = choose(
            state.queue.iter().map(|unit| &unit.resource_class),
            &state.quotas,
            &state.last_dispatch,
            config,
            now,
            wall_now,
        );

        if let Some(class) = class
            && let Some(unit) = state.queue.remove_first(|unit| unit.resource_class == class)
        {
            state.last_dispatch.insert(class, now);
            drop(state);
            self.dispatch(unit);
        }

        step
    }
}

impl fmt::Debug for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tenant").field("id", &self.id).finish()
    }
}
