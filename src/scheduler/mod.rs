//! Admission control for calls against a rate-limited upstream.
//!
//! This module provides:
//! - **Priority queue**: Three FIFO tiers per tenant (HIGH, NORMAL, LOW).
//! - **Quota tracking**: Last known `remaining / limit / reset` per resource class.
//! - **Bypass budget**: Lets a bounded number of HIGH units skip the queue.
//! - **Reaper**: Fails units that waited in a queue past `request_timeout`.
//! - **Scheduler**: The facade tying it together, one scheduling task per tenant.
//!
//! # Architecture
//!
//! 1. Callers submit work with [`Scheduler::enqueue`] and await the [`Ticket`]
//! 2. Each tenant's task re-runs [`choose`] over its queued classes when woken
//! 3. Callers report upstream rate-limit headers with [`Scheduler::update_quota`]
//! 4. The reaper sweeps every queue on a fixed interval
//!
//! # Example
//!
//! ```no_run
//! use quotaflow::config::SchedulerConfig;
//! use quotaflow::scheduler::{Priority, QuotaUpdate, Scheduler};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = Scheduler::new(SchedulerConfig::default())?;
//!
//! let ticket = scheduler.enqueue("octocat", Priority::High, "graphql", || async {
//!     Ok::<_, std::io::Error>("response body")
//! })?;
//! let body = ticket.await?;
//!
//! scheduler.update_quota("octocat", "graphql", QuotaUpdate::new(4999, 5000, chrono::Utc::now()))?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

mod bypass;
mod manager;
mod priority;
mod queue;
mod rate_limit;
mod reaper;
mod select;
mod tenant;
mod work;

pub use bypass::BypassBudget;
pub use manager::{Scheduler, TenantStats};
pub use priority::{Priority, TIER_COUNT};
pub use queue::{Prioritized, PriorityQueue};
pub use rate_limit::{
    HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, HEADER_RESOURCE, QuotaState, QuotaTracker, QuotaUpdate, ResourceClass,
};
pub use select::{Step, choose, decide, may_bypass};
pub use tenant::TenantId;
pub use work::{Admission, Ticket, WorkUnit};
