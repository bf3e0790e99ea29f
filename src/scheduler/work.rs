//! Work units and the handle callers await.
//!
//! A work unit owns a type-erased job plus the sending half of its result
//! channel. Every terminal path (run, time out, clear) consumes the unit, so a
//! caller's result is completed at most once.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{RequestError, SchedulerError};
use crate::scheduler::priority::Priority;
use crate::scheduler::queue::Prioritized;
use crate::scheduler::rate_limit::ResourceClass;
use crate::scheduler::tenant::TenantId;

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique work unit id.
pub(crate) fn next_unit_id() -> u64 {
    NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A job whose outcome is reported through its own result channel.
pub(crate) trait Dispatch: Send {
    /// Run the job and report its outcome.
    fn run(self: Box<Self>) -> BoxFuture<'static, ()>;

    /// Report a scheduler failure without running the job.
    fn reject(self: Box<Self>, error: SchedulerError);
}

type Outcome<T, E> = Result<T, RequestError<E>>;

struct Job<T, E> {
    make: Box<dyn FnOnce() -> BoxFuture<'static, Result<T, E>> + Send>,
    tx: oneshot::Sender<Outcome<T, E>>,
}

impl<T, E> Dispatch for Job<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
        let Job { make, tx } = *self;
        Box::pin(async move {
            let outcome = make().await.map_err(RequestError::Work);
            // Receiver gone means the caller stopped waiting
            let _ = tx.send(outcome);
        })
    }

    fn reject(self: Box<Self>, error: SchedulerError) {
        let _ = self.tx.send(Err(RequestError::Scheduler(error)));
    }
}

/// One pending call, from enqueue until it runs or is evicted.
pub struct WorkUnit {
    pub id: u64,
    pub tenant: TenantId,
    pub priority: Priority,
    pub resource_class: ResourceClass,
    pub enqueued_at: Instant,
    job: Box<dyn Dispatch>,
}

impl std::fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnit")
            .field("id", &self.id)
            .field("tenant", &self.tenant)
            .field("priority", &self.priority)
            .field("resource_class", &self.resource_class)
            .field("enqueued_at", &self.enqueued_at)
            .field("job", &"<fn>")
            .finish()
    }
}

impl WorkUnit {
    /// Build a unit and the ticket its caller will await.
    pub(crate) fn new<F, Fut, T, E>(
        tenant: TenantId,
        priority: Priority,
        resource_class: ResourceClass,
        enqueued_at: Instant,
        job: F,
    ) -> (Self, oneshot::Receiver<Outcome<T, E>>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let make: Box<dyn FnOnce() -> BoxFuture<'static, Result<T, E>> + Send> = Box::new(move || job().boxed());
        let unit = Self {
            id: next_unit_id(),
            tenant,
            priority,
            resource_class,
            enqueued_at,
            job: Box::new(Job { make, tx }),
        };
        (unit, rx)
    }

    /// Run the job, completing the caller's result.
    pub(crate) fn execute(self) -> BoxFuture<'static, ()> {
        self.job.run()
    }

    /// Fail the caller's result without running the job.
    pub(crate) fn reject(self, error: SchedulerError) {
        self.job.reject(error);
    }
}

impl Prioritized for WorkUnit {
    fn priority(&self) -> Priority {
        self.priority
    }

    fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }
}

/// How a unit got past admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// HIGH unit started immediately on the bypass budget.
    Bypassed,
    /// Unit entered its tenant's queue.
    Queued,
}

/// Handle to a submitted work unit; resolves to the job's outcome.
#[must_use = "a ticket does nothing unless awaited"]
pub struct Ticket<T, E> {
    id: u64,
    admission: Admission,
    rx: oneshot::Receiver<Outcome<T, E>>,
}

impl<T, E> Ticket<T, E> {
    pub(crate) fn new(id: u64, admission: Admission, rx: oneshot::Receiver<Outcome<T, E>>) -> Self {
        Self { id, admission, rx }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn admission(&self) -> Admission {
        self.admission
    }
}

impl<T, E> std::fmt::Debug for Ticket<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("id", &self.id)
            .field("admission", &self.admission)
            .finish()
    }
}

impl<T, E> Future for Ticket<T, E> {
    type Output = Outcome<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RequestError::Scheduler(SchedulerError::Abandoned { id: this.id }))),
        }
    }
}
