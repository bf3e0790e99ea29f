//! Scheduler facade: admission control across many tenants.
//!
//! The Scheduler:
//! 1. Rejects work synchronously when a tenant's queue is full
//! 2. Starts HIGH units immediately while the tenant's bypass budget allows
//! 3. Queues everything else for the tenant's scheduling task
//! 4. Accepts quota feedback and configuration changes at any time
//! 5. Runs the stale request reaper in the background

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::scheduler::priority::Priority;
use crate::scheduler::rate_limit::{QuotaState, QuotaUpdate, ResourceClass};
use crate::scheduler::reaper;
use crate::scheduler::select::may_bypass;
use crate::scheduler::tenant::{SharedConfig, Tenant, TenantId};
use crate::scheduler::work::{Admission, Ticket, WorkUnit};

/// Queue snapshot for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TenantStats {
    pub total: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    /// Wait time of the longest-queued unit.
    pub oldest_age: Duration,
    /// Bypasses granted in the current window.
    pub bypass_count: u64,
}

struct Inner {
    config: SharedConfig,
    tenants: RwLock<HashMap<TenantId, Arc<Tenant>>>,
    /// Parent of every background task.
    root: CancellationToken,
    closed: AtomicBool,
}

impl Inner {
    fn reap_stale(&self) -> usize {
        let timeout = self.config.read().request_timeout();
        let tenants: Vec<Arc<Tenant>> = self.tenants.read().values().cloned().collect();
        reaper::sweep(&tenants, timeout, Instant::now())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Per-tenant admission controller in front of a rate-limited upstream.
///
/// Cheap to clone; clones share state. Background tasks stop when the last
/// clone is dropped or [`Scheduler::shutdown`] is called.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a scheduler and start its reaper.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new(Inner {
            config: Arc::new(RwLock::new(Arc::new(config))),
            tenants: RwLock::new(HashMap::new()),
            root: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        reaper::spawn(inner.config.clone(), inner.root.child_token(), move || {
            weak.upgrade().map(|inner| inner.reap_stale())
        });

        tracing::info!("Scheduler started");
        Ok(Self { inner })
    }

    /// Submit a work unit for `tenant`.
    ///
    /// Returns synchronously with `QueueCapacity` when the tenant's queue is
    /// full; otherwise returns a [`Ticket`] resolving to the job's outcome.
    /// Errors returned by the job reach the caller untouched.
    pub fn enqueue<F, Fut, T, E>(
        &self,
        tenant: impl Into<TenantId>,
        priority: Priority,
        resource_class: impl Into<ResourceClass>,
        job: F,
    ) -> Result<Ticket<T, E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.ensure_open()?;
        let tenant_id = tenant.into();
        let resource_class = resource_class.into();
        let config = self.config();

        loop {
            let tenant = self.tenant(&tenant_id);
            let mut state = tenant.state.lock();
            if state.retired {
                // Lost a race with clear_queues; pick up the fresh tenant
                continue;
            }

            if state.queue.size() >= config.max_queue_size {
                tracing::warn!(
                    tenant = %tenant_id,
                    capacity = config.max_queue_size,
                    priority = %priority,
                    "Queue full, rejecting work unit"
                );
                return Err(SchedulerError::QueueCapacity {
                    tenant: tenant_id,
                    capacity: config.max_queue_size,
                });
            }

            let now = Instant::now();
            state.roll_over(&tenant_id, Utc::now());

            if may_bypass(priority, &resource_class, &state.quotas) {
                let combined_limit = state.quotas.combined_limit();
                if state
                    .bypass
                    .try_consume(now, combined_limit, config.max_bypass_rate, config.bypass_window())
                {
                    let bypass_count = state.bypass.count(now, config.bypass_window());
                    drop(state);

                    let (unit, rx) = WorkUnit::new(tenant_id, priority, resource_class, now, job);
                    let id = unit.id;
                    tracing::debug!(
                        tenant = %tenant.id,
                        unit = id,
                        bypass_count,
                        combined_limit,
                        "HIGH priority work unit bypassing queue"
                    );
                    tenant.dispatch(unit);
                    return Ok(Ticket::new(id, Admission::Bypassed, rx));
                }
            }

            let (unit, rx) = WorkUnit::new(tenant_id, priority, resource_class, now, job);
            let id = unit.id;
            tracing::debug!(
                tenant = %tenant.id,
                unit = id,
                priority = %priority,
                resource = %unit.resource_class,
                queued = state.queue.size() + 1,
                "Work unit queued"
            );
            state.queue.enqueue(unit);
            drop(state);

            tenant.wake();
            return Ok(Ticket::new(id, Admission::Queued, rx));
        }
    }

    /// Record fresh quota numbers for a tenant's resource class.
    pub fn update_quota(
        &self,
        tenant: impl Into<TenantId>,
        resource_class: impl Into<ResourceClass>,
        update: QuotaUpdate,
    ) -> Result<()> {
        self.ensure_open()?;
        let tenant_id = tenant.into();
        let resource_class = resource_class.into();

        loop {
            let tenant = self.tenant(&tenant_id);
            let mut state = tenant.state.lock();
            if state.retired {
                continue;
            }
            state.quotas.update(&resource_class, update);
            drop(state);

            tracing::debug!(
                tenant = %tenant_id,
                resource = %resource_class,
                remaining = update.remaining,
                limit = update.limit,
                reset_at = %update.reset_at,
                "Quota updated"
            );
            tenant.wake();
            return Ok(());
        }
    }

    /// Replace the active policy; applies to subsequent decisions only.
    pub fn configure(&self, config: SchedulerConfig) -> Result<()> {
        config.validate()?;
        tracing::info!(?config, "Scheduler reconfigured");
        *self.inner.config.write() = Arc::new(config);

        for tenant in self.inner.tenants.read().values() {
            tenant.wake();
        }
        Ok(())
    }

    /// Active configuration snapshot.
    pub fn config(&self) -> Arc<SchedulerConfig> {
        Arc::clone(&*self.inner.config.read())
    }

    /// Queue statistics for `tenant`; all zero for an unknown tenant.
    pub fn stats(&self, tenant: &TenantId) -> TenantStats {
        let Some(tenant) = self.inner.tenants.read().get(tenant).cloned() else {
            return TenantStats::default();
        };
        let window = self.config().bypass_window();
        let now = Instant::now();

        let state = tenant.state.lock();
        TenantStats {
            total: state.queue.size(),
            high: state.queue.size_by_tier(Priority::High),
            normal: state.queue.size_by_tier(Priority::Normal),
            low: state.queue.size_by_tier(Priority::Low),
            oldest_age: state.queue.oldest_age(now),
            bypass_count: state.bypass.count(now, window),
        }
    }

    /// Last known quota for a tenant's resource class.
    pub fn quota(&self, tenant: &TenantId, resource_class: &ResourceClass) -> Option<QuotaState> {
        let tenant = self.inner.tenants.read().get(tenant).cloned()?;
        let state = tenant.state.lock();
        state.quotas.get(resource_class).copied()
    }

    /// Tenants currently known to the scheduler.
    pub fn tenants(&self) -> Vec<TenantId> {
        let mut ids: Vec<TenantId> = self.inner.tenants.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run one reaper sweep now; returns the number of evicted units.
    pub fn reap_stale(&self) -> usize {
        self.inner.reap_stale()
    }

    /// Drop every tenant's state, failing queued units with `Cleared`.
    ///
    /// Units already running are left to finish. The scheduler stays usable.
    pub fn clear_queues(&self) {
        let tenants: Vec<Arc<Tenant>> = self.inner.tenants.write().drain().map(|(_, tenant)| tenant).collect();

        let mut cleared = 0usize;
        for tenant in &tenants {
            for unit in tenant.retire() {
                let id = unit.id;
                unit.reject(SchedulerError::Cleared { id });
                cleared += 1;
            }
        }

        tracing::info!(tenants = tenants.len(), cleared, "Scheduler queues cleared");
    }

    /// Clear all queues, stop background tasks and refuse further work.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.clear_queues();
        self.inner.root.cancel();
        tracing::info!("Scheduler shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SchedulerError::Closed);
        }
        Ok(())
    }

    /// Look up a tenant, creating it and its scheduling task on first use.
    fn tenant(&self, id: &TenantId) -> Arc<Tenant> {
        if let Some(tenant) = self.inner.tenants.read().get(id) {
            return Arc::clone(tenant);
        }

        let mut tenants = self.inner.tenants.write();
        let tenant = tenants.entry(id.clone()).or_insert_with(|| {
            tracing::debug!(tenant = %id, "Creating tenant");
            let tenant = Tenant::new(id.clone(), &self.inner.root);
            tenant.spawn(self.inner.config.clone());
            tenant
        });
        Arc::clone(tenant)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &*self.config())
            .field("tenants", &self.inner.tenants.read().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
