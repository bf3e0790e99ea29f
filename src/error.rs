//! Error types for quotaflow
//!
//! Centralized error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

use crate::scheduler::TenantId;

/// Errors raised by the scheduler itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Tenant queue is full; the unit was never queued
    #[error("Queue capacity of {capacity} reached for tenant {tenant}; retry the request later")]
    QueueCapacity { tenant: TenantId, capacity: usize },

    /// Unit waited in the queue longer than the configured timeout
    #[error(
        "Request {id} for tenant {tenant} timed out after waiting {}ms in queue (timeout {}ms)",
        .waited.as_millis(),
        .timeout.as_millis()
    )]
    RequestTimeout {
        id: u64,
        tenant: TenantId,
        waited: Duration,
        timeout: Duration,
    },

    /// Unit was still queued when the scheduler queues were cleared
    #[error("Request {id} dropped: scheduler queues were cleared")]
    Cleared { id: u64 },

    /// Unit's task ended without reporting an outcome
    #[error("Request {id} abandoned before reporting an outcome")]
    Abandoned { id: u64 },

    /// Scheduler has been shut down
    #[error("Scheduler is shut down")]
    Closed,

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Rate-limit headers missing or malformed
    #[error("Invalid rate-limit header: {0}")]
    InvalidHeader(String),
}

/// Outcome error observed by a caller awaiting a work unit.
///
/// `Work` carries the job's own error untouched.
#[derive(Debug, Error)]
pub enum RequestError<E> {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("{0}")]
    Work(E),
}

impl<E> RequestError<E> {
    /// The scheduler-raised error, if this is one.
    pub fn scheduler(&self) -> Option<&SchedulerError> {
        match self {
            RequestError::Scheduler(err) => Some(err),
            RequestError::Work(_) => None,
        }
    }

    /// Consume into the job's own error, if this is one.
    pub fn into_work(self) -> Option<E> {
        match self {
            RequestError::Work(err) => Some(err),
            RequestError::Scheduler(_) => None,
        }
    }
}

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;
