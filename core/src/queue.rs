//! Deferred operation queue
//!
//! Producers (web handlers, the command poller, the schedulers) never talk to
//! the network or the hardware directly. They enqueue an [`Operation`] and the
//! driver loop drains the queue one item per tick, no faster than the minimum
//! processing interval.
//!
//! Ordering is FIFO for operations that succeed first time. A failed operation
//! goes back to the *tail* with its retry count bumped, behind anything that
//! was enqueued in the meantime. After [`MAX_RETRIES`] retries it is dropped.

use alloc::string::String;
use heapless::Deque;
use serde::Serialize;

use hal_abstractions::Method;

/// Fixed queue depth
pub const QUEUE_CAPACITY: usize = 20;

/// Retries after the first attempt before an operation is discarded
pub const MAX_RETRIES: u8 = 3;

/// Default minimum spacing between two processed items
pub const DEFAULT_PROCESS_INTERVAL_MS: u64 = 2_000;

/// What a queued operation does when it reaches the head of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperationKind {
    /// Remote store read
    Get,
    /// Remote store write (replace)
    Put,
    /// Remote store append
    Post,
    /// Remote store delete
    Delete,
    /// Refresh the weather line
    FetchWeather,
    /// Print the payload on the receipt printer
    PrintReceipt,
    DispenseStart,
    DispenseStop,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
            Self::FetchWeather => "FETCH_WEATHER",
            Self::PrintReceipt => "PRINT_RECEIPT",
            Self::DispenseStart => "DISPENSE_START",
            Self::DispenseStop => "DISPENSE_STOP",
        }
    }

    /// HTTP verb for remote store operations, `None` for device actions
    pub fn method(&self) -> Option<Method> {
        match self {
            Self::Get => Some(Method::Get),
            Self::Put => Some(Method::Put),
            Self::Post => Some(Method::Post),
            Self::Delete => Some(Method::Delete),
            _ => None,
        }
    }
}

impl core::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request for deferred work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationKind,
    /// Store path (e.g. `/reminders.json`); empty for device actions
    pub path: String,
    /// JSON body for writes, text for prints
    pub payload: String,
}

impl Operation {
    pub fn new(kind: OperationKind, path: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            payload: payload.into(),
        }
    }

    pub fn put(path: impl Into<String>, json: impl Into<String>) -> Self {
        Self::new(OperationKind::Put, path, json)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(OperationKind::Delete, path, String::new())
    }

    pub fn print(text: impl Into<String>) -> Self {
        Self::new(OperationKind::PrintReceipt, String::new(), text)
    }

    /// Device action without path or payload
    pub fn device(kind: OperationKind) -> Self {
        Self::new(kind, String::new(), String::new())
    }
}

/// An [`Operation`] plus the queue's bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedOperation {
    pub operation: Operation,
    pub enqueued_at_ms: u64,
    pub retry_attempts: u8,
    /// Set once the item has been handed out for processing
    pub consumed: bool,
}

impl QueuedOperation {
    pub fn kind(&self) -> OperationKind {
        self.operation.kind
    }
}

/// What happened to a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RetryOutcome {
    /// Back at the tail; `attempt` is the new retry count
    Requeued { attempt: u8 },
    /// Retry budget spent, operation discarded
    Exhausted,
    /// No room to re-queue, operation discarded
    QueueFull,
}

/// Result of settling one processed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Settlement {
    pub kind: OperationKind,
    pub succeeded: bool,
    /// `None` when the operation succeeded
    pub retry: Option<RetryOutcome>,
}

/// Diagnostics snapshot, served as `/api/queue`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub size: usize,
    pub max_size: usize,
    pub is_empty: bool,
    pub is_full: bool,
    /// `None` before the first processed item
    pub ms_since_last_processed: Option<u64>,
}

/// Bounded FIFO of deferred operations with a processing rate limit
#[derive(Debug)]
pub struct OperationQueue {
    items: Deque<QueuedOperation, QUEUE_CAPACITY>,
    last_processed_at_ms: Option<u64>,
    min_process_interval_ms: u64,
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationQueue {
    pub const fn new() -> Self {
        Self::with_process_interval(DEFAULT_PROCESS_INTERVAL_MS)
    }

    pub const fn with_process_interval(min_process_interval_ms: u64) -> Self {
        Self {
            items: Deque::new(),
            last_processed_at_ms: None,
            min_process_interval_ms,
        }
    }

    pub fn set_process_interval(&mut self, ms: u64) {
        self.min_process_interval_ms = ms;
    }

    pub fn process_interval_ms(&self) -> u64 {
        self.min_process_interval_ms
    }

    /// Append `operation` stamped with `now_ms`.
    ///
    /// Returns `false` without touching the queue when it is full.
    pub fn enqueue(&mut self, operation: Operation, now_ms: u64) -> bool {
        let kind = operation.kind;
        let queued = QueuedOperation {
            operation,
            enqueued_at_ms: now_ms,
            retry_attempts: 0,
            consumed: false,
        };

        match self.items.push_back(queued) {
            Ok(()) => {
                debug!("Queued {} (size {}/{})", kind, self.items.len(), QUEUE_CAPACITY);
                true
            }
            Err(_) => {
                warn!("Operation queue full, dropping {}", kind);
                false
            }
        }
    }

    /// Whether an item may be processed at `now_ms`
    pub fn should_process(&self, now_ms: u64) -> bool {
        !self.items.is_empty() && self.interval_elapsed(now_ms)
    }

    /// Pop the head if the processing interval has elapsed.
    ///
    /// The caller owns the operation until it hands it back through
    /// [`settle`](Self::settle) (or [`retry`](Self::retry) followed by
    /// [`mark_processed`](Self::mark_processed)).
    pub fn dequeue_if_due(&mut self, now_ms: u64) -> Option<QueuedOperation> {
        if !self.should_process(now_ms) {
            return None;
        }
        let mut op = self.items.pop_front()?;
        op.consumed = true;
        Some(op)
    }

    /// Record that an item finished processing, whatever the outcome
    pub fn mark_processed(&mut self, now_ms: u64) {
        self.last_processed_at_ms = Some(now_ms);
    }

    /// Put a failed operation back at the tail, or discard it once its
    /// retry budget is spent.
    pub fn retry(&mut self, mut op: QueuedOperation) -> RetryOutcome {
        let kind = op.kind();
        if op.retry_attempts >= MAX_RETRIES {
            error!(
                "Dropping {} {} after {} retries",
                kind,
                op.operation.path.as_str(),
                MAX_RETRIES
            );
            return RetryOutcome::Exhausted;
        }

        op.retry_attempts += 1;
        op.consumed = false;
        let attempt = op.retry_attempts;
        match self.items.push_back(op) {
            Ok(()) => {
                warn!("Re-queued {} (retry {}/{})", kind, attempt, MAX_RETRIES);
                RetryOutcome::Requeued { attempt }
            }
            Err(_) => {
                error!("Operation queue full, retry of {} lost", kind);
                RetryOutcome::QueueFull
            }
        }
    }

    /// Finish one processed item: retry on failure, then stamp the
    /// processing time.
    pub fn settle(&mut self, op: QueuedOperation, succeeded: bool, now_ms: u64) -> Settlement {
        let kind = op.kind();
        let retry = if succeeded {
            None
        } else {
            Some(self.retry(op))
        };
        self.mark_processed(now_ms);
        Settlement {
            kind,
            succeeded,
            retry,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.is_full()
    }

    pub fn capacity(&self) -> usize {
        QUEUE_CAPACITY
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Pending operations, head first
    pub fn iter(&self) -> impl Iterator<Item = &QueuedOperation> {
        self.items.iter()
    }

    /// Whether a write of `path` is still waiting to go out
    pub fn has_pending(&self, kind: OperationKind, path: &str) -> bool {
        self.items
            .iter()
            .any(|op| op.operation.kind == kind && op.operation.path == path)
    }

    pub fn status(&self, now_ms: u64) -> QueueStatus {
        QueueStatus {
            size: self.items.len(),
            max_size: QUEUE_CAPACITY,
            is_empty: self.items.is_empty(),
            is_full: self.items.is_full(),
            ms_since_last_processed: self.last_processed_at_ms.map(|t| now_ms.saturating_sub(t)),
        }
    }

    fn interval_elapsed(&self, now_ms: u64) -> bool {
        match self.last_processed_at_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.min_process_interval_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;
    use alloc::vec::Vec;

    fn put(n: usize) -> Operation {
        Operation::put(format!("/item{}.json", n), "{}")
    }

    fn drain_paths(queue: &mut OperationQueue, mut now: u64) -> Vec<String> {
        let mut paths = Vec::new();
        while let Some(op) = queue.dequeue_if_due(now) {
            paths.push(op.operation.path.clone());
            queue.settle(op, true, now);
            now += DEFAULT_PROCESS_INTERVAL_MS;
        }
        paths
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = OperationQueue::new();
        for n in 0..5 {
            assert!(queue.enqueue(put(n), 0));
        }

        let paths = drain_paths(&mut queue, 0);
        let expected: Vec<String> = (0..5).map(|n| format!("/item{}.json", n)).collect();
        assert_eq!(paths, expected);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_full_is_rejected_without_mutation() {
        let mut queue = OperationQueue::new();
        for n in 0..QUEUE_CAPACITY {
            assert!(queue.enqueue(put(n), 10));
        }
        assert!(queue.is_full());

        let before: Vec<QueuedOperation> = queue.iter().cloned().collect();
        assert!(!queue.enqueue(put(99), 20));
        let after: Vec<QueuedOperation> = queue.iter().cloned().collect();
        assert_eq!(before, after);
        assert_eq!(queue.len(), QUEUE_CAPACITY);
    }

    #[test]
    fn test_enqueue_stamps_metadata() {
        let mut queue = OperationQueue::new();
        queue.enqueue(Operation::device(OperationKind::DispenseStart), 1234);

        let head = queue.iter().next().unwrap();
        assert_eq!(head.enqueued_at_ms, 1234);
        assert_eq!(head.retry_attempts, 0);
        assert!(!head.consumed);

        let op = queue.dequeue_if_due(1234).unwrap();
        assert!(op.consumed);
    }

    #[test]
    fn test_min_interval_gates_processing() {
        let mut queue = OperationQueue::new();
        queue.enqueue(put(1), 0);
        queue.enqueue(put(2), 0);

        // First item after boot is due immediately
        let op = queue.dequeue_if_due(100).unwrap();
        queue.settle(op, true, 150);

        assert!(!queue.should_process(150 + DEFAULT_PROCESS_INTERVAL_MS - 1));
        assert!(queue.dequeue_if_due(150 + DEFAULT_PROCESS_INTERVAL_MS - 1).is_none());
        assert!(queue.dequeue_if_due(150 + DEFAULT_PROCESS_INTERVAL_MS).is_some());
    }

    #[test]
    fn test_set_process_interval() {
        let mut queue = OperationQueue::with_process_interval(500);
        assert_eq!(queue.process_interval_ms(), 500);
        queue.enqueue(put(1), 0);
        queue.enqueue(put(2), 0);

        let op = queue.dequeue_if_due(0).unwrap();
        queue.settle(op, true, 0);
        queue.set_process_interval(50);
        assert!(queue.dequeue_if_due(49).is_none());
        assert!(queue.dequeue_if_due(50).is_some());
    }

    #[test]
    fn test_empty_queue_is_never_due() {
        let queue = OperationQueue::new();
        assert!(!queue.should_process(1_000_000));
    }

    #[test]
    fn test_failed_operation_goes_to_tail() {
        let mut queue = OperationQueue::with_process_interval(0);
        queue.enqueue(put(1), 0);
        queue.enqueue(put(2), 0);
        queue.enqueue(put(3), 0);

        let first = queue.dequeue_if_due(0).unwrap();
        let settlement = queue.settle(first, false, 0);
        assert_eq!(settlement.retry, Some(RetryOutcome::Requeued { attempt: 1 }));

        let order: Vec<(String, u8)> = queue
            .iter()
            .map(|op| (op.operation.path.clone(), op.retry_attempts))
            .collect();
        assert_eq!(
            order,
            alloc::vec![
                (String::from("/item2.json"), 0),
                (String::from("/item3.json"), 0),
                (String::from("/item1.json"), 1),
            ]
        );
        assert!(!queue.iter().last().unwrap().consumed);
    }

    #[test]
    fn test_retry_budget_discards_operation() {
        let mut queue = OperationQueue::with_process_interval(0);
        queue.enqueue(put(1), 0);

        let mut executions = 0;
        let mut last = None;
        while let Some(op) = queue.dequeue_if_due(0) {
            executions += 1;
            last = queue.settle(op, false, 0).retry;
        }

        // first attempt plus MAX_RETRIES retries
        assert_eq!(executions, 1 + MAX_RETRIES as usize);
        assert_eq!(last, Some(RetryOutcome::Exhausted));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_retry_into_full_queue_is_dropped() {
        let mut queue = OperationQueue::with_process_interval(0);
        for n in 0..QUEUE_CAPACITY {
            queue.enqueue(put(n), 0);
        }
        let op = queue.dequeue_if_due(0).unwrap();
        // A producer fills the freed slot while the head is in flight
        assert!(queue.enqueue(put(100), 0));

        assert_eq!(queue.retry(op), RetryOutcome::QueueFull);
        assert_eq!(queue.len(), QUEUE_CAPACITY);
    }

    #[test]
    fn test_status_report() {
        let mut queue = OperationQueue::new();
        assert_eq!(queue.status(5).ms_since_last_processed, None);

        queue.enqueue(put(1), 0);
        let op = queue.dequeue_if_due(0).unwrap();
        queue.settle(op, true, 1_000);
        queue.enqueue(put(2), 1_000);

        let status = queue.status(1_500);
        assert_eq!(status.size, 1);
        assert_eq!(status.max_size, QUEUE_CAPACITY);
        assert!(!status.is_empty);
        assert!(!status.is_full);
        assert_eq!(status.ms_since_last_processed, Some(500));

        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(
            json,
            r#"{"size":1,"maxSize":20,"isEmpty":false,"isFull":false,"msSinceLastProcessed":500}"#
        );
    }

    #[test]
    fn test_clear() {
        let mut queue = OperationQueue::new();
        queue.enqueue(put(1), 0);
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), QUEUE_CAPACITY);
    }

    #[test]
    fn test_has_pending() {
        let mut queue = OperationQueue::new();
        queue.enqueue(Operation::put("/reminders.json", "{}"), 0);
        assert!(queue.has_pending(OperationKind::Put, "/reminders.json"));
        assert!(!queue.has_pending(OperationKind::Put, "/groceries.json"));
        assert!(!queue.has_pending(OperationKind::Delete, "/reminders.json"));
    }
}
