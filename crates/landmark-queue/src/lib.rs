// In-process durable work queue with partitioned logs and manual acknowledgement.
//
// Messages are appended to a partition chosen by hashing the message key, so
// all deliveries for one key stay ordered. Consumers take static partition
// assignments (Kafka-style consumer group) and receive `Delivery` guards:
// dropping a guard without acknowledging it puts the message back at the head
// of its partition for redelivery, bounded by `max_delivery_attempts`.
use bytes::Bytes;
use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::warn;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(thiserror::Error, Debug)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
    #[error("partition {partition} backlog full (capacity {capacity})")]
    Backlog { partition: u32, capacity: usize },
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub partitions: u32,
    // Bound on undelivered messages per partition; enqueue fails beyond it.
    pub partition_capacity: usize,
    // A message dropped without acknowledgement this many times is dead-lettered.
    pub max_delivery_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            partitions: 8,
            partition_capacity: 1024,
            max_delivery_attempts: 5,
        }
    }
}

#[derive(Debug)]
struct QueuedMessage {
    offset: u64,
    attempt: u32,
    key: String,
    payload: Bytes,
}

#[derive(Debug, Default)]
struct PartitionState {
    ready: VecDeque<QueuedMessage>,
    next_offset: u64,
}

/// Partitioned at-least-once queue shared between producers and a consumer group.
///
/// ```
/// use bytes::Bytes;
/// use landmark_queue::{DurableQueue, QueueConfig};
///
/// let queue = DurableQueue::new("webhook-processing", QueueConfig::default());
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     queue.enqueue("req-1", Bytes::from_static(b"payload")).expect("enqueue");
///     let all: Vec<u32> = (0..queue.partition_count()).collect();
///     let delivery = queue.recv(&all).await.expect("delivery");
///     assert_eq!(delivery.payload(), &Bytes::from_static(b"payload"));
///     delivery.ack();
/// });
/// ```
#[derive(Debug)]
pub struct DurableQueue {
    topic: String,
    partitions: Vec<Mutex<PartitionState>>,
    notify: Notify,
    closed: AtomicBool,
    config: QueueConfig,
}

impl DurableQueue {
    pub fn new(topic: impl Into<String>, config: QueueConfig) -> Self {
        let partition_count = config.partitions.max(1) as usize;
        let partitions = (0..partition_count)
            .map(|_| Mutex::new(PartitionState::default()))
            .collect();
        Self {
            topic: topic.into(),
            partitions,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            config,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    pub fn partition_for(&self, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions.len() as u64) as u32
    }

    /// Round-robin partition assignment for a consumer group of `consumers`.
    pub fn assignments(&self, consumers: usize) -> Vec<Vec<u32>> {
        let consumers = consumers.max(1);
        let mut assigned = vec![Vec::new(); consumers];
        for partition in 0..self.partition_count() {
            assigned[partition as usize % consumers].push(partition);
        }
        assigned
    }

    /// Append a message, returning its partition offset once durably accepted.
    ///
    /// The call returns only after the message is in the partition log; an
    /// error means nothing was accepted and the producer must treat the
    /// submission as failed.
    pub fn enqueue(&self, key: &str, payload: Bytes) -> Result<u64> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        let partition = self.partition_for(key);
        let offset = {
            let mut state = self.partitions[partition as usize]
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if state.ready.len() >= self.config.partition_capacity {
                return Err(QueueError::Backlog {
                    partition,
                    capacity: self.config.partition_capacity,
                });
            }
            let offset = state.next_offset;
            state.next_offset += 1;
            state.ready.push_back(QueuedMessage {
                offset,
                attempt: 1,
                key: key.to_string(),
                payload,
            });
            offset
        };
        self.notify.notify_waiters();
        Ok(offset)
    }

    /// Wait for the next message on any of the given partitions.
    ///
    /// Returns `None` once the queue is closed and the partitions are drained.
    pub async fn recv(&self, partitions: &[u32]) -> Option<Delivery<'_>> {
        loop {
            // Register interest before scanning so a concurrent enqueue cannot
            // slip between the scan and the wait. `enable` is required: an
            // unpolled `Notified` is invisible to `notify_waiters`.
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            for &partition in partitions {
                let mut state = self.partitions[partition as usize]
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Some(message) = state.ready.pop_front() {
                    drop(state);
                    return Some(Delivery {
                        queue: self,
                        partition,
                        message: Some(message),
                    });
                }
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }

    /// Stop accepting messages and wake all consumers so they can drain and exit.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Undelivered messages across all partitions.
    pub fn depth(&self) -> usize {
        self.partitions
            .iter()
            .map(|partition| {
                partition
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .ready
                    .len()
            })
            .sum()
    }

    fn requeue(&self, partition: u32, mut message: QueuedMessage) {
        if message.attempt >= self.config.max_delivery_attempts {
            warn!(
                topic = %self.topic,
                partition,
                key = %message.key,
                offset = message.offset,
                attempts = message.attempt,
                "dropping message after exhausting delivery attempts"
            );
            return;
        }
        message.attempt += 1;
        {
            let mut state = self.partitions[partition as usize]
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Head of the partition so per-key ordering is preserved.
            state.ready.push_front(message);
        }
        self.notify.notify_waiters();
    }
}

/// One in-flight message. Call [`Delivery::ack`] after the handler reaches a
/// terminal outcome; dropping the guard un-acked schedules a redelivery.
#[derive(Debug)]
pub struct Delivery<'a> {
    queue: &'a DurableQueue,
    partition: u32,
    message: Option<QueuedMessage>,
}

impl Delivery<'_> {
    pub fn payload(&self) -> &Bytes {
        &self.message.as_ref().expect("delivery payload").payload
    }

    pub fn key(&self) -> &str {
        &self.message.as_ref().expect("delivery key").key
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// Delivery attempt number, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.message.as_ref().expect("delivery attempt").attempt
    }

    pub fn ack(mut self) {
        self.message = None;
    }
}

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            self.queue.requeue(self.partition, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(partitions: u32, max_attempts: u32) -> DurableQueue {
        DurableQueue::new(
            "webhook-processing",
            QueueConfig {
                partitions,
                partition_capacity: 8,
                max_delivery_attempts: max_attempts,
            },
        )
    }

    fn all_partitions(queue: &DurableQueue) -> Vec<u32> {
        (0..queue.partition_count()).collect()
    }

    #[tokio::test]
    async fn ack_removes_message() {
        let queue = queue_with(2, 3);
        queue.enqueue("a", Bytes::from_static(b"1")).expect("enqueue");
        assert_eq!(queue.depth(), 1);
        let delivery = queue.recv(&all_partitions(&queue)).await.expect("recv");
        assert_eq!(delivery.attempt(), 1);
        delivery.ack();
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn unacked_drop_redelivers_with_incremented_attempt() {
        let queue = queue_with(1, 3);
        queue.enqueue("a", Bytes::from_static(b"1")).expect("enqueue");
        let partitions = all_partitions(&queue);

        let delivery = queue.recv(&partitions).await.expect("recv");
        drop(delivery);

        let redelivered = queue.recv(&partitions).await.expect("redelivery");
        assert_eq!(redelivered.attempt(), 2);
        assert_eq!(redelivered.payload(), &Bytes::from_static(b"1"));
        redelivered.ack();
    }

    #[tokio::test]
    async fn dead_letters_after_max_attempts() {
        let queue = queue_with(1, 2);
        queue.enqueue("a", Bytes::from_static(b"1")).expect("enqueue");
        let partitions = all_partitions(&queue);

        drop(queue.recv(&partitions).await.expect("first"));
        drop(queue.recv(&partitions).await.expect("second"));
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn redelivery_preserves_partition_order() {
        let queue = queue_with(1, 5);
        queue.enqueue("a", Bytes::from_static(b"1")).expect("enqueue");
        queue.enqueue("a", Bytes::from_static(b"2")).expect("enqueue");
        let partitions = all_partitions(&queue);

        // Fail the first delivery; it must come back ahead of the second message.
        drop(queue.recv(&partitions).await.expect("first"));
        let next = queue.recv(&partitions).await.expect("redelivery");
        assert_eq!(next.payload(), &Bytes::from_static(b"1"));
        next.ack();
        let tail = queue.recv(&partitions).await.expect("tail");
        assert_eq!(tail.payload(), &Bytes::from_static(b"2"));
        tail.ack();
    }

    #[tokio::test]
    async fn same_key_lands_on_same_partition() {
        let queue = queue_with(8, 3);
        let first = queue.partition_for("request-123");
        let second = queue.partition_for("request-123");
        assert_eq!(first, second);
    }

    #[test]
    fn assignments_cover_all_partitions_without_overlap() {
        let queue = queue_with(8, 3);
        let assigned = queue.assignments(3);
        assert_eq!(assigned.len(), 3);
        let mut seen: Vec<u32> = assigned.into_iter().flatten().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn close_drains_consumers() {
        let queue = queue_with(1, 3);
        queue.enqueue("a", Bytes::from_static(b"1")).expect("enqueue");
        queue.close();
        assert!(matches!(
            queue.enqueue("b", Bytes::from_static(b"2")),
            Err(QueueError::Closed)
        ));
        let partitions = all_partitions(&queue);
        let last = queue.recv(&partitions).await.expect("drain");
        last.ack();
        assert!(queue.recv(&partitions).await.is_none());
    }

    #[tokio::test]
    async fn backlog_limit_rejects_enqueue() {
        let queue = DurableQueue::new(
            "webhook-processing",
            QueueConfig {
                partitions: 1,
                partition_capacity: 1,
                max_delivery_attempts: 3,
            },
        );
        queue.enqueue("a", Bytes::from_static(b"1")).expect("enqueue");
        assert!(matches!(
            queue.enqueue("b", Bytes::from_static(b"2")),
            Err(QueueError::Backlog { .. })
        ));
    }
}
