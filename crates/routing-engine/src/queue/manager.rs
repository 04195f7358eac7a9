use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::RoutingError;
use crate::work::{WorkItem, WorkItemId};

/// Drain order key: higher priority first, then enqueue sequence
type EntryKey = (Reverse<u32>, u64);

/// Length and timeout limits for one named queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    pub max_length: usize,
    pub timeout: Duration,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_length: 100,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Rejected enqueue; the item is handed back to the caller
#[derive(Debug, Error)]
pub enum EnqueueError<T> {
    #[error("queue {queue} is full ({max_length} entries)")]
    CapacityExceeded {
        queue: String,
        max_length: usize,
        item: T,
    },

    #[error("item is already queued in {queue}")]
    Duplicate { queue: String, item: T },
}

impl<T> EnqueueError<T> {
    /// Take back the item that could not be queued
    pub fn into_item(self) -> T {
        match self {
            EnqueueError::CapacityExceeded { item, .. } => item,
            EnqueueError::Duplicate { item, .. } => item,
        }
    }

    pub fn item(&self) -> &T {
        match self {
            EnqueueError::CapacityExceeded { item, .. } => item,
            EnqueueError::Duplicate { item, .. } => item,
        }
    }
}

impl<T: WorkItem> From<EnqueueError<T>> for RoutingError {
    fn from(err: EnqueueError<T>) -> Self {
        match err {
            EnqueueError::CapacityExceeded { queue, max_length, .. } => {
                RoutingError::CapacityExceeded { queue, max_length }
            }
            EnqueueError::Duplicate { item, .. } => RoutingError::AlreadyQueued(item.id().to_string()),
        }
    }
}

/// Where a dequeued item came from. Handing it back to
/// [`QueueManager::restore`] puts the item back in its original slot.
#[derive(Debug, Clone)]
pub struct QueueTicket {
    queue: String,
    priority: u32,
    seq: u64,
    enqueued_at: Instant,
    queued_at: DateTime<Utc>,
}

impl QueueTicket {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Priority the entry was queued with
    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn queued_at(&self) -> DateTime<Utc> {
        self.queued_at
    }
}

/// An item removed from the head of a queue
#[derive(Debug)]
pub struct QueuedItem<T> {
    pub item: T,
    pub waited: Duration,
    pub ticket: QueueTicket,
}

impl<T> QueuedItem<T> {
    pub fn into_parts(self) -> (T, QueueTicket) {
        (self.item, self.ticket)
    }
}

/// An item dropped because it waited longer than its queue's timeout
#[derive(Debug)]
pub struct ExpiredItem<T> {
    pub item: T,
    pub queue: String,
    pub waited: Duration,
}

/// Point-in-time statistics for one queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue: String,
    pub depth: usize,
    pub max_length: usize,
    pub oldest_wait_ms: u64,
    pub average_wait_ms: u64,
}

#[derive(Debug)]
struct Entry<T> {
    item: T,
    enqueued_at: Instant,
    queued_at: DateTime<Utc>,
}

#[derive(Debug)]
struct NamedQueue<T> {
    limits: QueueLimits,
    entries: BTreeMap<EntryKey, Entry<T>>,
}

impl<T> NamedQueue<T> {
    fn new(limits: QueueLimits) -> Self {
        Self {
            limits,
            entries: BTreeMap::new(),
        }
    }
}

/// Named, bounded priority queues.
///
/// Queues are created on first use with either their configured override or
/// the default limits. Each item id may be queued at most once across all
/// queues. The manager does not interpret priorities beyond ordering; retry
/// and decay policy belong to the caller.
#[derive(Debug)]
pub struct QueueManager<T: WorkItem> {
    defaults: QueueLimits,
    overrides: HashMap<String, QueueLimits>,
    queues: HashMap<String, NamedQueue<T>>,
    locations: HashMap<WorkItemId, (String, EntryKey)>,
    next_seq: u64,
}

impl<T: WorkItem> QueueManager<T> {
    /// Create a new queue manager
    pub fn new(defaults: QueueLimits) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            queues: HashMap::new(),
            locations: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Override the limits of one queue. Entries already queued stay put even
    /// if the new maximum is lower.
    pub fn configure_queue(&mut self, name: impl Into<String>, limits: QueueLimits) {
        let name = name.into();
        info!("📋 Configuring queue {} (max {}, timeout {:?})", name, limits.max_length, limits.timeout);
        if let Some(queue) = self.queues.get_mut(&name) {
            queue.limits = limits;
        }
        self.overrides.insert(name, limits);
    }

    /// Limits that apply to `name`
    pub fn limits(&self, name: &str) -> QueueLimits {
        self.overrides.get(name).copied().unwrap_or(self.defaults)
    }

    /// Insert `item` with `priority`; returns its position in drain order
    pub fn add_to_queue(
        &mut self,
        queue: &str,
        item: T,
        priority: u32,
    ) -> std::result::Result<usize, EnqueueError<T>> {
        if let Some((existing, _)) = self.locations.get(item.id()) {
            warn!("📞 {} {} already in queue {}, not re-queuing", item.kind(), item.id(), existing);
            return Err(EnqueueError::Duplicate {
                queue: existing.clone(),
                item,
            });
        }

        let limits = self.limits(queue);
        let named = self
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| NamedQueue::new(limits));

        if named.entries.len() >= named.limits.max_length {
            warn!("🚫 Queue {} is full ({} entries), rejecting {}", queue, named.limits.max_length, item.id());
            return Err(EnqueueError::CapacityExceeded {
                queue: queue.to_string(),
                max_length: named.limits.max_length,
                item,
            });
        }

        let key = (Reverse(priority), self.next_seq);
        self.next_seq += 1;

        let position = named.entries.range(..key).count();
        self.locations
            .insert(item.id().clone(), (queue.to_string(), key));

        info!(
            "📞 Enqueuing {} {} to queue {} (priority: {}, position: {})",
            item.kind(),
            item.id(),
            queue,
            priority,
            position
        );
        named.entries.insert(
            key,
            Entry {
                item,
                enqueued_at: Instant::now(),
                queued_at: Utc::now(),
            },
        );
        debug!("📊 Queue {} size: {}", queue, named.entries.len());

        Ok(position)
    }

    /// Remove and return the head of `queue`
    pub fn get_next_from_queue(&mut self, queue: &str) -> Option<QueuedItem<T>> {
        self.take_first_where(queue, |_| true)
    }

    /// Remove the first entry, in drain order, that `accept` approves.
    ///
    /// Entries `accept` rejects keep their place, so items nobody can serve
    /// right now do not hold back the ones behind them.
    pub fn take_first_where<F>(&mut self, queue: &str, mut accept: F) -> Option<QueuedItem<T>>
    where
        F: FnMut(&T) -> bool,
    {
        let named = self.queues.get_mut(queue)?;
        let key = named
            .entries
            .iter()
            .find(|(_, entry)| accept(&entry.item))
            .map(|(key, _)| *key)?;
        let entry = named.entries.remove(&key)?;
        self.locations.remove(entry.item.id());

        let waited = entry.enqueued_at.elapsed();
        debug!(
            "📤 Dequeued {} from queue {} after {:?} (remaining: {})",
            entry.item.id(),
            queue,
            waited,
            named.entries.len()
        );

        Some(QueuedItem {
            item: entry.item,
            waited,
            ticket: QueueTicket {
                queue: queue.to_string(),
                priority: key.0 .0,
                seq: key.1,
                enqueued_at: entry.enqueued_at,
                queued_at: entry.queued_at,
            },
        })
    }

    /// Put a dequeued item back in the slot it was taken from.
    ///
    /// Intended for a drain loop that lost a race for the agent it expected.
    /// The restored entry keeps its original enqueue time and ordering, and is
    /// not subject to the length limit since it held that slot moments ago.
    pub fn restore(&mut self, item: T, ticket: QueueTicket) -> std::result::Result<(), EnqueueError<T>> {
        if let Some((existing, _)) = self.locations.get(item.id()) {
            return Err(EnqueueError::Duplicate {
                queue: existing.clone(),
                item,
            });
        }

        let limits = self.limits(&ticket.queue);
        let named = self
            .queues
            .entry(ticket.queue.clone())
            .or_insert_with(|| NamedQueue::new(limits));

        if named.entries.len() >= named.limits.max_length {
            warn!(
                "↩️ Restoring {} to queue {} beyond its limit ({} entries, max {})",
                item.id(),
                ticket.queue,
                named.entries.len(),
                named.limits.max_length
            );
        }

        let key = (Reverse(ticket.priority), ticket.seq);
        debug!("↩️ Restoring {} to queue {}", item.id(), ticket.queue);
        self.locations.insert(item.id().clone(), (ticket.queue, key));
        named.entries.insert(
            key,
            Entry {
                item,
                enqueued_at: ticket.enqueued_at,
                queued_at: ticket.queued_at,
            },
        );
        Ok(())
    }

    /// Evict every entry that has waited longer than its queue's timeout
    pub fn evict_expired(&mut self) -> Vec<ExpiredItem<T>> {
        self.evict_expired_at(Instant::now())
    }

    /// Eviction against an explicit clock reading
    pub fn evict_expired_at(&mut self, now: Instant) -> Vec<ExpiredItem<T>> {
        let mut expired = Vec::new();

        for (name, named) in self.queues.iter_mut() {
            let timeout = named.limits.timeout;
            let stale: Vec<EntryKey> = named
                .entries
                .iter()
                .filter(|(_, entry)| now.saturating_duration_since(entry.enqueued_at) > timeout)
                .map(|(key, _)| *key)
                .collect();

            for key in stale {
                if let Some(entry) = named.entries.remove(&key) {
                    let waited = now.saturating_duration_since(entry.enqueued_at);
                    warn!("⏰ Removing expired {} from queue {} (waited {:?})", entry.item.id(), name, waited);
                    self.locations.remove(entry.item.id());
                    expired.push(ExpiredItem {
                        item: entry.item,
                        queue: name.clone(),
                        waited,
                    });
                }
            }
        }

        expired
    }

    /// Number of entries in `queue`
    pub fn len(&self, queue: &str) -> usize {
        self.queues.get(queue).map(|q| q.entries.len()).unwrap_or(0)
    }

    /// Number of entries across all queues
    pub fn total_len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn is_full(&self, queue: &str) -> bool {
        self.len(queue) >= self.limits(queue).max_length
    }

    /// Name of the queue holding `id`, if any
    pub fn queue_of(&self, id: &WorkItemId) -> Option<&str> {
        self.locations.get(id).map(|(queue, _)| queue.as_str())
    }

    pub fn contains(&self, id: &WorkItemId) -> bool {
        self.locations.contains_key(id)
    }

    /// Copy of a queued item
    pub fn peek_item(&self, id: &WorkItemId) -> Option<T> {
        let (queue, key) = self.locations.get(id)?;
        self.queues
            .get(queue)
            .and_then(|q| q.entries.get(key))
            .map(|entry| entry.item.clone())
    }

    /// Names of every queue that has been used
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stats(&self, queue: &str) -> Option<QueueStats> {
        let named = self.queues.get(queue)?;
        let now = Instant::now();

        let waits: Vec<u64> = named
            .entries
            .values()
            .map(|e| now.saturating_duration_since(e.enqueued_at).as_millis() as u64)
            .collect();
        let oldest_wait_ms = waits.iter().copied().max().unwrap_or(0);
        let average_wait_ms = if waits.is_empty() {
            0
        } else {
            waits.iter().sum::<u64>() / waits.len() as u64
        };

        Some(QueueStats {
            queue: queue.to_string(),
            depth: named.entries.len(),
            max_length: named.limits.max_length,
            oldest_wait_ms,
            average_wait_ms,
        })
    }

    pub fn all_stats(&self) -> Vec<QueueStats> {
        self.queue_names()
            .iter()
            .filter_map(|name| self.stats(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::{Call, Customer};

    fn call(id: &str) -> Call {
        Call::inbound(Customer::new("cust")).with_id(id)
    }

    fn limits(max_length: usize) -> QueueLimits {
        QueueLimits {
            max_length,
            timeout: Duration::from_secs(60),
        }
    }

    fn drain(manager: &mut QueueManager<Call>, queue: &str) -> Vec<String> {
        std::iter::from_fn(|| manager.get_next_from_queue(queue))
            .map(|q| q.item.id.to_string())
            .collect()
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut manager = QueueManager::new(limits(10));
        manager.add_to_queue("general", call("low-1"), 1).unwrap();
        manager.add_to_queue("general", call("high-1"), 5).unwrap();
        manager.add_to_queue("general", call("low-2"), 1).unwrap();
        manager.add_to_queue("general", call("high-2"), 5).unwrap();

        assert_eq!(drain(&mut manager, "general"), vec!["high-1", "high-2", "low-1", "low-2"]);
        assert!(manager.get_next_from_queue("general").is_none());
    }

    #[test]
    fn test_position_reflects_drain_order() {
        let mut manager = QueueManager::new(limits(10));
        assert_eq!(manager.add_to_queue("q", call("a"), 1).unwrap(), 0);
        assert_eq!(manager.add_to_queue("q", call("b"), 1).unwrap(), 1);
        assert_eq!(manager.add_to_queue("q", call("c"), 9).unwrap(), 0);
    }

    #[test]
    fn test_capacity_exceeded_returns_item() {
        let mut manager = QueueManager::new(QueueLimits::default());
        manager.configure_queue("general", limits(1));

        manager.add_to_queue("general", call("first"), 0).unwrap();
        let err = manager.add_to_queue("general", call("second"), 0).unwrap_err();

        assert!(matches!(err, EnqueueError::CapacityExceeded { max_length: 1, .. }));
        assert_eq!(err.into_item().id.as_str(), "second");
        assert!(manager.contains(&WorkItemId::from("first")));
        assert_eq!(manager.len("general"), 1);
    }

    #[test]
    fn test_item_queued_once_across_queues() {
        let mut manager = QueueManager::new(limits(10));
        manager.add_to_queue("a", call("x"), 0).unwrap();

        let err = manager.add_to_queue("b", call("x"), 0).unwrap_err();
        assert!(matches!(err, EnqueueError::Duplicate { ref queue, .. } if queue == "a"));
        assert_eq!(manager.total_len(), 1);
    }

    #[test]
    fn test_take_first_where_skips_rejected_entries() {
        let mut manager = QueueManager::new(limits(10));
        manager.add_to_queue("q", call("head"), 5).unwrap();
        manager.add_to_queue("q", call("b-1"), 1).unwrap();
        manager.add_to_queue("q", call("b-2"), 1).unwrap();

        assert!(manager.take_first_where("q", |_| false).is_none());
        assert_eq!(manager.len("q"), 3);

        let taken = manager.take_first_where("q", |c| c.id.as_str().starts_with("b-")).unwrap();
        assert_eq!(taken.item.id.as_str(), "b-1");
        assert_eq!(taken.ticket.priority(), 1);

        // The skipped head keeps its place
        assert_eq!(drain(&mut manager, "q"), vec!["head", "b-2"]);
    }

    #[test]
    fn test_restore_keeps_original_slot() {
        let mut manager = QueueManager::new(limits(2));
        manager.add_to_queue("q", call("a"), 0).unwrap();
        manager.add_to_queue("q", call("b"), 0).unwrap();

        let (item, ticket) = manager.get_next_from_queue("q").unwrap().into_parts();
        manager.add_to_queue("q", call("c"), 0).unwrap();
        manager.restore(item, ticket).unwrap();

        assert_eq!(drain(&mut manager, "q"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_restore_into_refilled_queue_exceeds_limit_once() {
        let mut manager = QueueManager::new(limits(1));
        manager.add_to_queue("q", call("a"), 0).unwrap();

        let (item, ticket) = manager.get_next_from_queue("q").unwrap().into_parts();
        manager.add_to_queue("q", call("b"), 0).unwrap();
        manager.restore(item, ticket).unwrap();
        assert_eq!(manager.len("q"), 2);
        assert!(manager.is_full("q"));

        // New arrivals are still turned away while over the limit
        let err = manager.add_to_queue("q", call("c"), 9).unwrap_err();
        assert!(matches!(err, EnqueueError::CapacityExceeded { max_length: 1, .. }));
        assert_eq!(drain(&mut manager, "q"), vec!["a", "b"]);
    }

    #[test]
    fn test_evicts_only_entries_past_timeout() {
        let mut manager = QueueManager::new(QueueLimits {
            max_length: 10,
            timeout: Duration::from_millis(100),
        });
        manager.add_to_queue("q", call("a"), 0).unwrap();

        let now = Instant::now();
        assert!(manager.evict_expired_at(now).is_empty());

        let expired = manager.evict_expired_at(now + Duration::from_millis(500));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].queue, "q");
        assert!(expired[0].waited > Duration::from_millis(100));
        assert!(!manager.contains(&WorkItemId::from("a")));
    }

    #[test]
    fn test_stats() {
        let mut manager = QueueManager::new(limits(5));
        manager.add_to_queue("q", call("a"), 0).unwrap();
        manager.add_to_queue("q", call("b"), 0).unwrap();

        let stats = manager.stats("q").unwrap();
        assert_eq!(stats.depth, 2);
        assert_eq!(stats.max_length, 5);
        assert!(stats.oldest_wait_ms >= stats.average_wait_ms);
        assert!(manager.stats("missing").is_none());
    }
}
