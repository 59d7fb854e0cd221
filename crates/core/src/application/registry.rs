// Queue Item Registry
// In-memory bookkeeping for pending/active items, per-user fairness
// counters and lifetime statistics. One coarse mutex guards all of it;
// the lock is only ever held for bookkeeping, never across an await.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::application::queue::SubmitRequest;
use crate::application::worker::constants::MAX_MESSAGE_CHARS;
use crate::domain::{
    DomainError, PersistedItem, QueueConfig, QueueItem, QueueStats, RequestId, UserId,
};
use crate::error::{QueueError, Result};
use crate::port::{IdProvider, ProgressSink, TimeProvider};

/// What a result slot resolves with, exactly once.
pub type SlotResult = Result<serde_json::Value>;

/// Why a waiting caller stopped waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    Timeout,
    Cancelled,
}

/// How a worker finished with a claimed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    Processed,
    Errored,
    /// Slot was already resolved (timed out or cancelled) before the
    /// worker could deliver; nothing to count
    AlreadyResolved,
}

/// A queue item plus its runtime-only companions: the single-assignment
/// result slot and the optional progress sink. Terminal accounting is
/// tied to slot ownership - whoever takes the sender counts the outcome.
pub struct TrackedItem {
    pub item: QueueItem,
    pub progress_sink: Option<Arc<dyn ProgressSink>>,
    slot: Mutex<Option<oneshot::Sender<SlotResult>>>,
}

impl TrackedItem {
    fn new(
        item: QueueItem,
        progress_sink: Option<Arc<dyn ProgressSink>>,
    ) -> (Arc<Self>, oneshot::Receiver<SlotResult>) {
        let (tx, rx) = oneshot::channel();
        let tracked = Arc::new(Self {
            item,
            progress_sink,
            slot: Mutex::new(Some(tx)),
        });
        (tracked, rx)
    }

    /// Take ownership of the result slot. Returns `None` if the item was
    /// already resolved by another party.
    pub(crate) fn take_slot(&self) -> Option<oneshot::Sender<SlotResult>> {
        self.slot.lock().unwrap().take()
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.lock().unwrap().is_none()
    }
}

/// Successful admission: the tracked entry, the caller's receiving end
/// of the result slot, and the 1-based queue position.
pub struct Admitted {
    pub entry: Arc<TrackedItem>,
    pub rx: oneshot::Receiver<SlotResult>,
    pub position: usize,
}

impl std::fmt::Debug for Admitted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admitted")
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Inner {
    /// Submission-ordered pending items
    pending: Vec<Arc<TrackedItem>>,
    /// Items currently being processed by a worker
    active: HashMap<RequestId, Arc<TrackedItem>>,
    /// FIFO dispatch queue workers pull from; may hold already-resolved
    /// entries which workers discard on claim
    dispatch: VecDeque<Arc<TrackedItem>>,

    user_pending: HashMap<UserId, usize>,
    user_active: HashMap<UserId, usize>,

    submitted: u64,
    processed: u64,
    errors: u64,
    rejected: u64,
    timeouts: u64,
    cancelled: u64,

    peak_pending: usize,
    peak_active: usize,

    /// Total wall-clock handler time across processed items (for ETA)
    handler_time_ms: u64,
}

fn decrement_user(counters: &mut HashMap<UserId, usize>, user_id: &str) {
    if let Some(count) = counters.get_mut(user_id) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            counters.remove(user_id);
        }
    }
}

/// Registry of all in-flight work, plus the admission policy checks.
pub struct Registry {
    config: QueueConfig,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new(
        config: QueueConfig,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            config,
            time_provider,
            id_provider,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Validate and admit a new submission.
    ///
    /// Per-user fairness is checked before global capacity; both checks,
    /// item creation and all counter updates happen under one lock
    /// acquisition so no concurrent admission can observe a limit breach.
    pub fn admit(&self, req: SubmitRequest) -> Result<Admitted> {
        validate_request(&req)?;

        let mut inner = self.inner.lock().unwrap();
        inner.submitted += 1;

        let user_total = inner.user_pending.get(&req.user_id).copied().unwrap_or(0)
            + inner.user_active.get(&req.user_id).copied().unwrap_or(0);
        if user_total >= self.config.per_user_limit {
            inner.rejected += 1;
            return Err(QueueError::CapacityUser {
                user_id: req.user_id,
                limit: self.config.per_user_limit,
            });
        }

        let total = inner.pending.len() + inner.active.len();
        if total >= self.config.max_size {
            inner.rejected += 1;
            return Err(QueueError::CapacityGlobal {
                max_size: self.config.max_size,
            });
        }

        let item = QueueItem::new(
            self.id_provider.generate_id(),
            req.user_id.clone(),
            req.session_id,
            req.message,
            self.time_provider.now_millis(),
            req.priority,
            req.context,
        );
        let (entry, rx) = TrackedItem::new(item, req.progress_sink);

        inner.pending.push(Arc::clone(&entry));
        inner.dispatch.push_back(Arc::clone(&entry));
        *inner.user_pending.entry(req.user_id).or_insert(0) += 1;
        inner.peak_pending = inner.peak_pending.max(inner.pending.len());
        let position = inner.pending.len();
        drop(inner);

        debug!(
            request_id = %entry.item.request_id,
            user_id = %entry.item.user_id,
            position = position,
            "Request admitted"
        );

        Ok(Admitted {
            entry,
            rx,
            position,
        })
    }

    /// Claim the next dispatchable item, moving it pending -> active.
    ///
    /// Entries whose slot was already resolved (timed out or cancelled
    /// before being claimed) are discarded without invoking the handler.
    pub fn claim_next(&self) -> Option<Arc<TrackedItem>> {
        let mut inner = self.inner.lock().unwrap();

        while let Some(entry) = inner.dispatch.pop_front() {
            if entry.is_resolved() {
                debug!(
                    request_id = %entry.item.request_id,
                    "Discarding pre-resolved item from dispatch queue"
                );
                continue;
            }

            let request_id = entry.item.request_id.clone();
            if let Some(idx) = inner
                .pending
                .iter()
                .position(|e| e.item.request_id == request_id)
            {
                inner.pending.remove(idx);
            }
            decrement_user(&mut inner.user_pending, &entry.item.user_id);
            *inner
                .user_active
                .entry(entry.item.user_id.clone())
                .or_insert(0) += 1;
            inner.active.insert(request_id, Arc::clone(&entry));
            inner.peak_active = inner.peak_active.max(inner.active.len());

            return Some(entry);
        }

        None
    }

    /// Worker cleanup for a claimed item, counting the terminal outcome.
    pub fn finish(&self, entry: &TrackedItem, outcome: WorkOutcome, duration_ms: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.active.remove(&entry.item.request_id);
        decrement_user(&mut inner.user_active, &entry.item.user_id);

        match outcome {
            WorkOutcome::Processed => {
                inner.processed += 1;
                inner.handler_time_ms += duration_ms;
            }
            WorkOutcome::Errored => inner.errors += 1,
            WorkOutcome::AlreadyResolved => {}
        }
    }

    /// Deregister an item whose caller stopped waiting.
    ///
    /// Returns true if this call owned the resolution; false means the
    /// item was already resolved elsewhere and nothing was counted.
    pub fn abandon(&self, entry: &TrackedItem, reason: AbandonReason) -> bool {
        let Some(tx) = entry.take_slot() else {
            return false;
        };
        // Dropping the sender wakes the receiver with a closed-channel
        // error; the caller side maps that to Cancelled.
        drop(tx);

        let mut inner = self.inner.lock().unwrap();
        let request_id = &entry.item.request_id;
        if let Some(idx) = inner
            .pending
            .iter()
            .position(|e| &e.item.request_id == request_id)
        {
            inner.pending.remove(idx);
            decrement_user(&mut inner.user_pending, &entry.item.user_id);
        }
        match reason {
            AbandonReason::Timeout => inner.timeouts += 1,
            AbandonReason::Cancelled => inner.cancelled += 1,
        }
        true
    }

    /// Administrative cancel by request ID.
    pub fn cancel(&self, request_id: &str) -> bool {
        let entry = {
            let inner = self.inner.lock().unwrap();
            inner
                .pending
                .iter()
                .find(|e| e.item.request_id == request_id)
                .or_else(|| inner.active.get(request_id))
                .cloned()
        };
        match entry {
            Some(entry) => self.abandon(&entry, AbandonReason::Cancelled),
            None => false,
        }
    }

    /// Cancel every still-waiting caller (shutdown path). Pending items
    /// are dropped entirely; active items stay in the active map until
    /// their worker finishes cleanup.
    pub fn cancel_all_waiting(&self) -> usize {
        let entries: Vec<Arc<TrackedItem>> = {
            let mut inner = self.inner.lock().unwrap();
            let mut entries: Vec<_> = inner.pending.drain(..).collect();
            entries.extend(inner.active.values().cloned());
            inner.dispatch.clear();
            inner.user_pending.clear();
            entries
        };

        let count = entries
            .iter()
            .filter(|entry| entry.take_slot().is_some())
            .count();
        self.inner.lock().unwrap().cancelled += count as u64;
        count
    }

    /// 1-based pending position, 0 if claimed by a worker, None if gone.
    pub fn position_of(&self, request_id: &str) -> Option<usize> {
        let inner = self.inner.lock().unwrap();
        if let Some(idx) = inner
            .pending
            .iter()
            .position(|e| e.item.request_id == request_id)
        {
            Some(idx + 1)
        } else if inner.active.contains_key(request_id) {
            Some(0)
        } else {
            None
        }
    }

    /// Snapshot of each unresolved pending item and its 1-based position,
    /// for the position broadcaster.
    pub fn position_updates(&self) -> Vec<(Arc<TrackedItem>, usize)> {
        let inner = self.inner.lock().unwrap();
        inner
            .pending
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_resolved())
            .map(|(idx, entry)| (Arc::clone(entry), idx + 1))
            .collect()
    }

    /// Everything worth persisting: pending items in order, then active.
    pub fn persistable_items(&self) -> Vec<PersistedItem> {
        let inner = self.inner.lock().unwrap();
        inner
            .pending
            .iter()
            .chain(inner.active.values())
            .map(|entry| PersistedItem::from(&entry.item))
            .collect()
    }

    /// Observed mean handler duration, once at least one item completed.
    pub fn mean_handler_ms(&self) -> Option<u64> {
        let inner = self.inner.lock().unwrap();
        if inner.processed == 0 {
            None
        } else {
            Some(inner.handler_time_ms / inner.processed)
        }
    }

    pub fn stats(&self, uptime: Duration) -> QueueStats {
        let inner = self.inner.lock().unwrap();
        let uptime_secs = uptime.as_secs();
        let throughput_per_min = if uptime_secs == 0 {
            0.0
        } else {
            inner.processed as f64 / (uptime_secs as f64 / 60.0)
        };

        QueueStats {
            max_size: self.config.max_size,
            num_workers: self.config.num_workers,
            per_user_limit: self.config.per_user_limit,
            request_timeout_secs: self.config.request_timeout.as_secs(),
            pending: inner.pending.len(),
            active: inner.active.len(),
            submitted: inner.submitted,
            processed: inner.processed,
            errors: inner.errors,
            rejected: inner.rejected,
            timeouts: inner.timeouts,
            cancelled: inner.cancelled,
            peak_pending: inner.peak_pending,
            peak_active: inner.peak_active,
            throughput_per_min,
            uptime_secs,
        }
    }
}

fn validate_request(req: &SubmitRequest) -> Result<()> {
    if req.user_id.trim().is_empty() {
        return Err(DomainError::Validation("user_id must not be empty".to_string()).into());
    }
    if req.session_id.trim().is_empty() {
        return Err(DomainError::Validation("session_id must not be empty".to_string()).into());
    }
    if req.message.trim().is_empty() {
        return Err(DomainError::Validation("message must not be empty".to_string()).into());
    }
    if req.message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(DomainError::Validation(format!(
            "message too long (max {} chars)",
            MAX_MESSAGE_CHARS
        ))
        .into());
    }
    Ok(())
}
