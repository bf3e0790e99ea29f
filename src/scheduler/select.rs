//! Admission decisions for a tenant's queue.
//!
//! Decides, per resource class, whether the next unit may run now, must be
//! paced, or must wait for the quota window to reset:
//! - Quota exhausted: wait until `reset_at`
//! - Utilization at or above the throttle threshold: space dispatches by
//!   `min_request_interval / throttle_rate`
//! - Otherwise: run immediately
//!
//! Classes are independent: [`choose`] serves the most urgent unit whose own
//! class is admissible, so an exhausted class never blocks another.
//!
//! Bypass eligibility for HIGH units is decided at enqueue time, see
//! [`may_bypass`].

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::config::SchedulerConfig;
use crate::scheduler::priority::Priority;
use crate::scheduler::rate_limit::{QuotaTracker, ResourceClass};

/// What the tenant's scheduling task should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing queued.
    Idle,
    /// Dequeue and run the head now.
    RunNow,
    /// Utilization is high; the next dispatch is paced.
    Throttled { until: Instant },
    /// Quota is exhausted; nothing runs before the window resets.
    AwaitReset { until: Instant },
}

/// Whether a unit may try the bypass budget.
pub fn may_bypass(priority: Priority, class: &ResourceClass, quotas: &QuotaTracker) -> bool {
    priority == Priority::High && !quotas.is_exhausted(class)
}

/// Decide the next step for a queue whose head targets `head`.
pub fn decide(
    head: Option<&ResourceClass>,
    quotas: &QuotaTracker,
    last_dispatch: Option<Instant>,
    config: &SchedulerConfig,
    now: Instant,
    wall_now: DateTime<Utc>,
) -> Step {
    let Some(class) = head else {
        return Step::Idle;
    };

    let Some(quota) = quotas.get(class) else {
        return Step::RunNow;
    };

    if quota.is_exhausted() {
        let until_reset = (quota.reset_at - wall_now).to_std().unwrap_or(Duration::ZERO);
        if until_reset.is_zero() {
            // Window already reset; released optimistically until fresh numbers arrive
            return Step::RunNow;
        }
        return Step::AwaitReset {
            until: now + until_reset,
        };
    }

    if quota.utilization() >= config.throttle_threshold
        && let Some(last) = last_dispatch
    {
        let ready = last + config.throttled_interval();
        if ready > now {
            return Step::Throttled { until: ready };
        }
    }

    Step::RunNow
}

/// Pick the class to serve next from a tenant's queued classes.
///
/// `classes` must be in service order. Returns `RunNow` with the first class
/// that may run, otherwise the earliest wait across all queued classes.
pub fn choose<'a, I>(
    classes: I,
    quotas: &QuotaTracker,
    last_dispatch: &HashMap<ResourceClass, Instant>,
    config: &SchedulerConfig,
    now: Instant,
    wall_now: DateTime<Utc>,
) -> (Step, Option<ResourceClass>)
where
    I: IntoIterator<Item = &'a ResourceClass>,
{
    let mut seen: Vec<&ResourceClass> = Vec::new();
    let mut wait = Step::Idle;

    for class in classes {
        if seen.contains(&class) {
            continue;
        }
        seen.push(class);

        let step = decide(Some(class), quotas, last_dispatch.get(class).copied(), config, now, wall_now);
        match (step, wait) {
            (Step::RunNow, _) => return (Step::RunNow, Some(class.clone())),
            (Step::Idle, _) => {}
            (step, Step::Idle) => wait = step,
            (step, current) => {
                if wake_at(step) < wake_at(current) {
                    wait = step;
                }
            }
        }
    }

    (wait, None)
}

fn wake_at(step: Step) -> Option<Instant> {
    match step {
        Step::Throttled { until } | Step::AwaitReset { until } => Some(until),
        Step::Idle | Step::RunNow => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::rate_limit::QuotaUpdate;
    use chrono::Duration as ChronoDuration;

    fn tracker(remaining: u64, limit: u64, reset_in_secs: i64) -> QuotaTracker {
        let mut quotas = QuotaTracker::new();
        quotas.update(
            &ResourceClass::graphql(),
            QuotaUpdate::new(remaining, limit, Utc::now() + ChronoDuration::seconds(reset_in_secs)),
        );
        quotas
    }

    #[test]
    fn test_idle_when_queue_empty() {
        let quotas = QuotaTracker::new();
        let step = decide(None, &quotas, None, &SchedulerConfig::default(), Instant::now(), Utc::now());
        assert_eq!(step, Step::Idle);
    }

    #[test]
    fn test_unknown_quota_runs_now() {
        let quotas = QuotaTracker::new();
        let now = Instant::now();
        let step = decide(
            Some(&ResourceClass::rest()),
            &quotas,
            Some(now),
            &SchedulerConfig::default(),
            now,
            Utc::now(),
        );
        assert_eq!(step, Step::RunNow);
    }

    #[test]
    fn test_healthy_quota_runs_now_without_spacing() {
        let quotas = tracker(4500, 5000, 3600);
        let now = Instant::now();
        let step = decide(
            Some(&ResourceClass::graphql()),
            &quotas,
            Some(now),
            &SchedulerConfig::default(),
            now,
            Utc::now(),
        );
        assert_eq!(step, Step::RunNow);
    }

    #[test]
    fn test_high_utilization_paces_dispatches() {
        let quotas = tracker(750, 5000, 3600);
        let config = SchedulerConfig::default().with_min_request_interval(Duration::from_millis(100));
        let last = Instant::now();
        let now = last + Duration::from_millis(50);

        let step = decide(Some(&ResourceClass::graphql()), &quotas, Some(last), &config, now, Utc::now());
        assert_eq!(
            step,
            Step::Throttled {
                until: last + Duration::from_millis(200)
            }
        );

        let later = last + Duration::from_millis(200);
        let step = decide(Some(&ResourceClass::graphql()), &quotas, Some(last), &config, later, Utc::now());
        assert_eq!(step, Step::RunNow);
    }

    #[test]
    fn test_first_throttled_dispatch_runs_now() {
        let quotas = tracker(750, 5000, 3600);
        let step = decide(
            Some(&ResourceClass::graphql()),
            &quotas,
            None,
            &SchedulerConfig::default(),
            Instant::now(),
            Utc::now(),
        );
        assert_eq!(step, Step::RunNow);
    }

    #[test]
    fn test_exhausted_quota_waits_for_reset() {
        let quotas = tracker(0, 5000, 2);
        let now = Instant::now();
        let step = decide(
            Some(&ResourceClass::graphql()),
            &quotas,
            None,
            &SchedulerConfig::default(),
            now,
            Utc::now(),
        );
        match step {
            Step::AwaitReset { until } => {
                let wait = until - now;
                assert!(wait > Duration::from_millis(1500));
                assert!(wait <= Duration::from_secs(2));
            }
            other => panic!("expected AwaitReset, got {:?}", other),
        }
    }

    #[test]
    fn test_exhausted_quota_past_reset_is_released() {
        let quotas = tracker(0, 5000, -1);
        let step = decide(
            Some(&ResourceClass::graphql()),
            &quotas,
            None,
            &SchedulerConfig::default(),
            Instant::now(),
            Utc::now(),
        );
        assert_eq!(step, Step::RunNow);
    }

    #[test]
    fn test_may_bypass_only_high_with_quota_left() {
        let class = ResourceClass::graphql();
        let healthy = tracker(100, 5000, 3600);
        let exhausted = tracker(0, 5000, 3600);

        assert!(may_bypass(Priority::High, &class, &healthy));
        assert!(!may_bypass(Priority::Normal, &class, &healthy));
        assert!(!may_bypass(Priority::Low, &class, &healthy));
        assert!(!may_bypass(Priority::High, &class, &exhausted));
    }

    fn two_classes(graphql: QuotaUpdate, rest: QuotaUpdate) -> QuotaTracker {
        let mut quotas = QuotaTracker::new();
        quotas.update(&ResourceClass::graphql(), graphql);
        quotas.update(&ResourceClass::rest(), rest);
        quotas
    }

    fn in_secs(secs: i64) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::seconds(secs)
    }

    #[test]
    fn test_choose_empty_is_idle() {
        let (step, class) = choose(
            std::iter::empty::<&ResourceClass>(),
            &QuotaTracker::new(),
            &HashMap::new(),
            &SchedulerConfig::default(),
            Instant::now(),
            Utc::now(),
        );
        assert_eq!(step, Step::Idle);
        assert!(class.is_none());
    }

    #[test]
    fn test_choose_skips_exhausted_class() {
        let quotas = two_classes(
            QuotaUpdate::new(0, 5000, in_secs(60)),
            QuotaUpdate::new(4999, 5000, in_secs(3600)),
        );
        let graphql = ResourceClass::graphql();
        let rest = ResourceClass::rest();

        let (step, class) = choose(
            [&graphql, &graphql, &rest],
            &quotas,
            &HashMap::new(),
            &SchedulerConfig::default(),
            Instant::now(),
            Utc::now(),
        );
        assert_eq!(step, Step::RunNow);
        assert_eq!(class, Some(rest));
    }

    #[test]
    fn test_choose_prefers_first_admissible_in_service_order() {
        let quotas = two_classes(
            QuotaUpdate::new(4000, 5000, in_secs(3600)),
            QuotaUpdate::new(4999, 5000, in_secs(3600)),
        );
        let graphql = ResourceClass::graphql();
        let rest = ResourceClass::rest();

        let (_, class) = choose(
            [&graphql, &rest],
            &quotas,
            &HashMap::new(),
            &SchedulerConfig::default(),
            Instant::now(),
            Utc::now(),
        );
        assert_eq!(class, Some(graphql));
    }

    #[test]
    fn test_choose_waits_for_earliest_class() {
        let now = Instant::now();
        let quotas = two_classes(
            QuotaUpdate::new(0, 5000, in_secs(60)),
            QuotaUpdate::new(750, 5000, in_secs(3600)),
        );
        let graphql = ResourceClass::graphql();
        let rest = ResourceClass::rest();
        let last_dispatch = HashMap::from([(rest.clone(), now)]);

        let (step, class) = choose(
            [&graphql, &rest],
            &quotas,
            &last_dispatch,
            &SchedulerConfig::default(),
            now,
            Utc::now(),
        );
        assert!(class.is_none());
        assert_eq!(
            step,
            Step::Throttled {
                until: now + SchedulerConfig::default().throttled_interval()
            }
        );
    }

    #[test]
    fn test_choose_paces_each_class_separately() {
        let now = Instant::now();
        let quotas = two_classes(
            QuotaUpdate::new(750, 5000, in_secs(3600)),
            QuotaUpdate::new(750, 5000, in_secs(3600)),
        );
        let graphql = ResourceClass::graphql();
        let rest = ResourceClass::rest();
        let last_dispatch = HashMap::from([(graphql.clone(), now)]);

        let (step, class) = choose(
            [&graphql, &rest],
            &quotas,
            &last_dispatch,
            &SchedulerConfig::default(),
            now,
            Utc::now(),
        );
        assert_eq!(step, Step::RunNow);
        assert_eq!(class, Some(rest));
    }
}
