//! In-process event fanout for sync, analysis, batch, and AI job status.
//!
//! One bus per process. Publishers never block and never see subscriber
//! errors; each subscriber owns a bounded queue (default 1,000 events) that
//! drops its oldest entry on overflow. Events carry a per-topic monotonic
//! sequence number so remote consumers can detect gaps after a drop.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

use dedupe_storage::{AiJobStatus, BatchKind, BatchStatus, RunStatus};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1_000;

// ── Topics and payloads ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTopic {
    Sync,
    Analysis,
    Batch,
    AiJob,
}

impl EventTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventTopic::Sync => "sync",
            EventTopic::Analysis => "analysis",
            EventTopic::Batch => "batch",
            EventTopic::AiJob => "ai_job",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub operation_id: Uuid,
    pub current: u64,
    pub total: Option<u64>,
    pub current_step: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub operation_id: Uuid,
    pub pages: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub orphaned: u64,
    pub failed: u64,
    /// First N item error strings; later failures are only counted.
    pub errors: Vec<String>,
    pub cancelled: bool,
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self {
            operation_id: Uuid::nil(),
            current: 0,
            total: None,
            current_step: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisProgress {
    pub run_id: Uuid,
    pub current: u64,
    pub total: u64,
    pub current_step: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub documents_processed: u64,
    pub groups_found: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub operation_id: Uuid,
    pub kind: BatchKind,
    pub status: BatchStatus,
    pub total_items: u64,
    pub processed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiJobProgress {
    pub job_id: Uuid,
    pub status: AiJobStatus,
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
}

/// Typed event payloads, one variant per wire event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    SyncUpdate(SyncProgress),
    SyncCompleted(SyncReport),
    AnalysisUpdate(AnalysisProgress),
    AnalysisCompleted(AnalysisOutcome),
    BatchUpdate(BatchProgress),
    BatchCompleted(BatchProgress),
    AiJobUpdate(AiJobProgress),
    AiJobCompleted(AiJobProgress),
}

impl EventBody {
    pub fn topic(&self) -> EventTopic {
        match self {
            EventBody::SyncUpdate(_) | EventBody::SyncCompleted(_) => EventTopic::Sync,
            EventBody::AnalysisUpdate(_) | EventBody::AnalysisCompleted(_) => EventTopic::Analysis,
            EventBody::BatchUpdate(_) | EventBody::BatchCompleted(_) => EventTopic::Batch,
            EventBody::AiJobUpdate(_) | EventBody::AiJobCompleted(_) => EventTopic::AiJob,
        }
    }

    /// The operation this event belongs to, for subscriber filters.
    pub fn operation_id(&self) -> Uuid {
        match self {
            EventBody::SyncUpdate(p) => p.operation_id,
            EventBody::SyncCompleted(r) => r.operation_id,
            EventBody::AnalysisUpdate(p) => p.run_id,
            EventBody::AnalysisCompleted(o) => o.run_id,
            EventBody::BatchUpdate(p) | EventBody::BatchCompleted(p) => p.operation_id,
            EventBody::AiJobUpdate(p) | EventBody::AiJobCompleted(p) => p.job_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventBody::SyncCompleted(_)
                | EventBody::AnalysisCompleted(_)
                | EventBody::BatchCompleted(_)
                | EventBody::AiJobCompleted(_)
        )
    }
}

/// Published envelope: `{topic, sequence, timestamp, body}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: EventTopic,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub body: EventBody,
}

// ── Bus ────────────────────────────────────────────────────────────────────

struct SubscriberQueue {
    events: Mutex<VecDeque<Event>>,
    notify: Notify,
    dropped: AtomicU64,
}

struct Subscriber {
    filter: Option<Uuid>,
    queue: Arc<SubscriberQueue>,
}

/// Process-local publish/subscribe. Delivery is at-most-once per subscriber
/// and fire-and-forget: a slow subscriber loses its oldest events, never
/// the publisher's time.
pub struct EventBus {
    capacity: usize,
    /// Sequence assignment and fanout happen under one lock so every
    /// subscriber observes strictly increasing sequences per topic.
    sequences: Mutex<HashMap<EventTopic, u64>>,
    subscribers: Arc<DashMap<u64, Subscriber>>,
    next_subscriber_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            sequences: Mutex::new(HashMap::new()),
            subscribers: Arc::new(DashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber, optionally filtered to a single operation id.
    pub fn subscribe(&self, filter: Option<Uuid>) -> Subscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue {
            events: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        });
        self.subscribers.insert(
            id,
            Subscriber {
                filter,
                queue: queue.clone(),
            },
        );
        Subscription {
            id,
            queue,
            subscribers: self.subscribers.clone(),
        }
    }

    /// Publish an event to all matching subscribers.
    pub fn publish(&self, body: EventBody) {
        let topic = body.topic();
        let operation_id = body.operation_id();

        let mut sequences = self.sequences.lock();
        let sequence = {
            let counter = sequences.entry(topic).or_insert(0);
            *counter += 1;
            *counter
        };
        let event = Event {
            topic,
            sequence,
            timestamp: Utc::now(),
            body,
        };

        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if let Some(filter) = subscriber.filter {
                if filter != operation_id {
                    continue;
                }
            }
            let mut queue = subscriber.queue.events.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                subscriber.queue.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(event.clone());
            drop(queue);
            subscriber.queue.notify.notify_one();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// A subscriber's receiving end. Dropping it unregisters the subscriber.
pub struct Subscription {
    id: u64,
    queue: Arc<SubscriberQueue>,
    subscribers: Arc<DashMap<u64, Subscriber>>,
}

impl Subscription {
    pub fn try_recv(&self) -> Option<Event> {
        self.queue.events.lock().pop_front()
    }

    /// Await the next event.
    pub async fn recv(&self) -> Event {
        loop {
            if let Some(event) = self.try_recv() {
                return event;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<Event> {
        let mut queue = self.queue.events.lock();
        queue.drain(..).collect()
    }

    /// Events lost to queue overflow since subscription.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.subscribers.remove(&self.id);
    }
}
