//! Three-tier FIFO queue holding one tenant's waiting work.
//!
//! Pure data structure: no rate-limit knowledge and no clock of its own.
//! Callers pass `now` wherever an age is computed.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::scheduler::priority::{Priority, TIER_COUNT};

/// Anything that can sit in a [`PriorityQueue`].
pub trait Prioritized {
    fn priority(&self) -> Priority;
    fn enqueued_at(&self) -> Instant;
}

/// Per-tier FIFO queue served High, then Normal, then Low.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    tiers: [VecDeque<T>; TIER_COUNT],
}

impl<T: Prioritized> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Prioritized> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            tiers: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
        }
    }

    /// Append to the tail of the item's tier.
    pub fn enqueue(&mut self, item: T) {
        self.tiers[item.priority().index()].push_back(item);
    }

    /// Remove the head of the most urgent non-empty tier.
    pub fn dequeue(&mut self) -> Option<T> {
        self.tiers.iter_mut().find_map(|tier| tier.pop_front())
    }

    /// Head of the most urgent non-empty tier, without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.tiers.iter().find_map(|tier| tier.front())
    }

    /// Every item in service order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.tiers.iter().flatten()
    }

    /// Remove the first item, in service order, matching `predicate`.
    pub fn remove_first<F>(&mut self, mut predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        self.tiers.iter_mut().find_map(|tier| {
            let index = tier.iter().position(&mut predicate)?;
            tier.remove(index)
        })
    }

    pub fn size(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    pub fn size_by_tier(&self, priority: Priority) -> usize {
        self.tiers[priority.index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(VecDeque::is_empty)
    }

    /// Extract every item matching `predicate`.
    ///
    /// Survivors keep their relative order. Extracted items are returned in
    /// service order.
    pub fn remove_where<F>(&mut self, mut predicate: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let mut removed = Vec::new();
        for tier in self.tiers.iter_mut() {
            if !tier.iter().any(&mut predicate) {
                continue;
            }
            let mut kept = VecDeque::with_capacity(tier.len());
            for item in tier.drain(..) {
                if predicate(&item) {
                    removed.push(item);
                } else {
                    kept.push_back(item);
                }
            }
            *tier = kept;
        }
        removed
    }

    /// Drain every item in service order.
    pub fn drain(&mut self) -> Vec<T> {
        self.tiers.iter_mut().flat_map(|tier| tier.drain(..)).collect()
    }

    /// Wait time of the longest-waiting item, zero when empty.
    pub fn oldest_age(&self, now: Instant) -> Duration {
        // Each tier is FIFO, so its head is its oldest item
        self.tiers
            .iter()
            .filter_map(|tier| tier.front())
            .map(|item| item.enqueued_at())
            .min()
            .map(|oldest| now.saturating_duration_since(oldest))
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Item {
        name: &'static str,
        priority: Priority,
        enqueued_at: Instant,
    }

    impl Prioritized for Item {
        fn priority(&self) -> Priority {
            self.priority
        }

        fn enqueued_at(&self) -> Instant {
            self.enqueued_at
        }
    }

    fn item(name: &'static str, priority: Priority, enqueued_at: Instant) -> Item {
        Item {
            name,
            priority,
            enqueued_at,
        }
    }

    fn names(items: &[Item]) -> Vec<&'static str> {
        items.iter().map(|i| i.name).collect()
    }

    #[test]
    fn test_empty_queue() {
        let mut queue: PriorityQueue<Item> = PriorityQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.size(), 0);
        assert!(queue.peek().is_none());
        assert!(queue.dequeue().is_none());
        assert_eq!(queue.oldest_age(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn test_dequeue_serves_high_then_normal_then_low() {
        let now = Instant::now();
        let mut queue = PriorityQueue::new();
        queue.enqueue(item("low-1", Priority::Low, now));
        queue.enqueue(item("normal-1", Priority::Normal, now));
        queue.enqueue(item("high-1", Priority::High, now));
        queue.enqueue(item("normal-2", Priority::Normal, now));
        queue.enqueue(item("high-2", Priority::High, now));

        let mut order = Vec::new();
        while let Some(next) = queue.dequeue() {
            order.push(next.name);
        }
        assert_eq!(order, vec!["high-1", "high-2", "normal-1", "normal-2", "low-1"]);
    }

    #[test]
    fn test_peek_does_not_remove() {
        let now = Instant::now();
        let mut queue = PriorityQueue::new();
        queue.enqueue(item("a", Priority::Normal, now));
        queue.enqueue(item("b", Priority::High, now));

        assert_eq!(queue.peek().map(|i| i.name), Some("b"));
        assert_eq!(queue.size(), 2);
        assert_eq!(queue.dequeue().map(|i| i.name), Some("b"));
    }

    #[test]
    fn test_size_by_tier() {
        let now = Instant::now();
        let mut queue = PriorityQueue::new();
        queue.enqueue(item("a", Priority::High, now));
        queue.enqueue(item("b", Priority::Low, now));
        queue.enqueue(item("c", Priority::Low, now));

        assert_eq!(queue.size(), 3);
        assert_eq!(queue.size_by_tier(Priority::High), 1);
        assert_eq!(queue.size_by_tier(Priority::Normal), 0);
        assert_eq!(queue.size_by_tier(Priority::Low), 2);
    }

    #[test]
    fn test_remove_where_preserves_survivor_order() {
        let now = Instant::now();
        let mut queue = PriorityQueue::new();
        queue.enqueue(item("n1", Priority::Normal, now));
        queue.enqueue(item("x1", Priority::Normal, now));
        queue.enqueue(item("n2", Priority::Normal, now));
        queue.enqueue(item("x2", Priority::Low, now));
        queue.enqueue(item("h1", Priority::High, now));

        let removed = queue.remove_where(|i| i.name.starts_with('x'));
        assert_eq!(names(&removed), vec!["x1", "x2"]);
        assert_eq!(names(&queue.drain()), vec!["h1", "n1", "n2"]);
    }

    #[test]
    fn test_remove_where_no_match_keeps_everything() {
        let now = Instant::now();
        let mut queue = PriorityQueue::new();
        queue.enqueue(item("a", Priority::Normal, now));

        assert!(queue.remove_where(|_| false).is_empty());
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_oldest_age_spans_tiers() {
        let base = Instant::now();
        let mut queue = PriorityQueue::new();
        // Oldest item sits in the Low tier
        queue.enqueue(item("low", Priority::Low, base));
        queue.enqueue(item("high", Priority::High, base + Duration::from_millis(300)));

        let now = base + Duration::from_millis(1000);
        assert_eq!(queue.oldest_age(now), Duration::from_millis(1000));

        queue.remove_where(|i| i.name == "low");
        assert_eq!(queue.oldest_age(now), Duration::from_millis(700));
    }

    #[test]
    fn test_default_is_empty() {
        let queue: PriorityQueue<Item> = PriorityQueue::default();
        assert!(queue.is_empty());
        assert_eq!(queue.iter().count(), 0);
    }

    #[test]
    fn test_iter_yields_service_order() {
        let now = Instant::now();
        let mut queue = PriorityQueue::new();
        queue.enqueue(item("low", Priority::Low, now));
        queue.enqueue(item("normal", Priority::Normal, now));
        queue.enqueue(item("high", Priority::High, now));

        let order: Vec<_> = queue.iter().map(|i| i.name).collect();
        assert_eq!(order, vec!["high", "normal", "low"]);
    }

    #[test]
    fn test_remove_first_takes_most_urgent_match() {
        let now = Instant::now();
        let mut queue = PriorityQueue::new();
        queue.enqueue(item("x-low", Priority::Low, now));
        queue.enqueue(item("y-high", Priority::High, now));
        queue.enqueue(item("x-normal-1", Priority::Normal, now));
        queue.enqueue(item("x-normal-2", Priority::Normal, now));

        let taken = queue.remove_first(|i| i.name.starts_with('x'));
        assert_eq!(taken.map(|i| i.name), Some("x-normal-1"));
        assert_eq!(names(&queue.drain()), vec!["y-high", "x-normal-2", "x-low"]);
    }

    #[test]
    fn test_remove_first_without_match() {
        let now = Instant::now();
        let mut queue = PriorityQueue::new();
        queue.enqueue(item("a", Priority::High, now));

        assert!(queue.remove_first(|i| i.name == "b").is_none());
        assert_eq!(queue.size(), 1);
    }
}
