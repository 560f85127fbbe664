//! Time-ordered, thread-safe queue of pending messages.
//!
//! Entries are kept sorted by absolute delivery time.  A new entry is placed
//! after every entry due at the same instant or earlier, so equal delivery
//! times keep their insertion order.
//!
//! # Waking the consumer
//!
//! [`MessageQueue::next`] never returns an entry before it is due.  When
//! nothing is due it blocks on a condition variable and then returns `None`,
//! leaving the re-scan to the caller.  The wait is bounded by the delivery
//! time of the head entry, so a lone delayed message is served on time even
//! if nothing else is ever enqueued.  The pending entries themselves live
//! under the same lock as the wait, which means a signal sent while the
//! consumer is busy is never lost: the consumer re-checks the entries before
//! it waits again.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Delivery horizon for delays that do not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

struct Entry<T> {
    when: Instant,
    item: T,
}

/// Unbounded, delivery-time ordered queue.
pub struct MessageQueue<T> {
    entries: Mutex<VecDeque<Entry<T>>>,
    available: Condvar,
}

impl<T> MessageQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Schedules `item` for delivery `delay` from now and wakes one waiter.
    ///
    /// A delay past the platform's `Instant` range is clamped to a delivery
    /// time decades away.
    pub fn enqueue(&self, item: T, delay: Duration) {
        let now = Instant::now();
        let when = now
            .checked_add(delay)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        {
            let mut entries = self.lock();
            let index = entries.partition_point(|entry| entry.when <= when);
            entries.insert(index, Entry { when, item });
        }
        self.available.notify_one();
    }

    /// Removes and returns the first entry whose delivery time has arrived.
    ///
    /// Returns `None` after waiting when nothing is due yet; call again.
    pub fn next(&self) -> Option<T> {
        let mut entries = self.lock();
        let now = Instant::now();
        match entries.front() {
            Some(head) if head.when <= now => entries.pop_front().map(|entry| entry.item),
            Some(head) => {
                let timeout = head.when - now;
                drop(
                    self.available
                        .wait_timeout(entries, timeout)
                        .unwrap_or_else(PoisonError::into_inner),
                );
                None
            }
            None => {
                drop(
                    self.available
                        .wait(entries)
                        .unwrap_or_else(PoisonError::into_inner),
                );
                None
            }
        }
    }

    /// Returns the first due entry without blocking.
    pub fn try_next(&self) -> Option<T> {
        let mut entries = self.lock();
        match entries.front() {
            Some(head) if head.when <= Instant::now() => {
                entries.pop_front().map(|entry| entry.item)
            }
            _ => None,
        }
    }

    /// Number of pending entries, due or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// `true` when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops every pending entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Entry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn drain(queue: &MessageQueue<u32>, count: usize) -> Vec<u32> {
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            if let Some(item) = queue.next() {
                out.push(item);
            }
        }
        out
    }

    #[test]
    fn test_immediate_entries_keep_insertion_order() {
        // Arrange
        let queue = MessageQueue::new();
        for i in 0..5 {
            queue.enqueue(i, Duration::ZERO);
        }

        // Act
        let out = drain(&queue, 5);

        // Assert
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_delayed_entries_dequeue_by_delivery_time() {
        // Arrange – submit d3, d1, d2
        let queue = MessageQueue::new();
        queue.enqueue(30, Duration::from_millis(30));
        queue.enqueue(10, Duration::from_millis(10));
        queue.enqueue(20, Duration::from_millis(20));

        // Act
        let out = drain(&queue, 3);

        // Assert
        assert_eq!(out, vec![10, 20, 30]);
    }

    #[test]
    fn test_entry_is_never_delivered_early() {
        // Arrange
        let queue = MessageQueue::new();
        let delay = Duration::from_millis(25);
        let submitted = Instant::now();
        queue.enqueue(1, delay);

        // Act
        let out = drain(&queue, 1);

        // Assert
        assert_eq!(out, vec![1]);
        assert!(submitted.elapsed() >= delay, "delivered before its due time");
    }

    #[test]
    fn test_try_next_returns_none_before_due_time() {
        let queue = MessageQueue::new();
        queue.enqueue(1, Duration::from_secs(60));
        assert_eq!(queue.try_next(), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_unrepresentable_delay_is_held_back_without_panicking() {
        // Arrange
        let queue = MessageQueue::new();

        // Act
        queue.enqueue(1u32, Duration::MAX);
        queue.enqueue(2u32, Duration::ZERO);

        // Assert – the immediate entry overtakes the clamped one
        assert_eq!(queue.try_next(), Some(2));
        assert_eq!(queue.try_next(), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_lone_delayed_entry_wakes_consumer_without_new_enqueue() {
        // Arrange – nothing else will ever be enqueued
        let queue = Arc::new(MessageQueue::new());
        queue.enqueue(99, Duration::from_millis(20));

        // Act – the bounded wait must expire on its own
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || drain(&queue, 1))
        };

        // Assert
        assert_eq!(consumer.join().expect("consumer panicked"), vec![99]);
    }

    #[test]
    fn test_concurrent_enqueues_are_each_delivered_once() {
        // Arrange
        let queue = Arc::new(MessageQueue::new());
        let producers: Vec<_> = (0..4u32)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..50u32 {
                        queue.enqueue(p * 1000 + i, Duration::ZERO);
                    }
                })
            })
            .collect();

        // Act
        let mut out = drain(&queue, 200);
        for producer in producers {
            producer.join().expect("producer panicked");
        }

        // Assert
        out.sort_unstable();
        out.dedup();
        assert_eq!(out.len(), 200, "every entry exactly once");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear_drops_pending_entries() {
        let queue = MessageQueue::new();
        queue.enqueue(1, Duration::ZERO);
        queue.enqueue(2, Duration::from_secs(5));
        queue.clear();
        assert!(queue.is_empty());
    }
}
