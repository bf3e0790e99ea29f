//! Quotaflow - per-tenant admission control for rate-limited APIs
//!
//! Quotaflow sits between callers and an upstream API that enforces quota
//! windows (GitHub's GraphQL and REST limits being the model). It queues work
//! per tenant by priority, slows down as a quota drains, holds work while a
//! quota is exhausted, and fails work that waits too long.

pub mod config;
pub mod error;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use error::{RequestError, Result, SchedulerError};
pub use scheduler::{Admission, Priority, QuotaUpdate, ResourceClass, Scheduler, TenantId, TenantStats, Ticket};
