use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::db::{message_repo, Database};
use crate::error::QueueError;
use crate::lifecycle::MessageLifecycle;
use crate::message::{now, ErrorKind};
use crate::queue::DeliveryQueue;
use crate::retry::{RetryPolicy, RetryScheduler};

const TICK: Duration = Duration::from_millis(100);

/// Outcome of one delivery attempt made by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub message_id: i64,
    pub sent: bool,
    pub error: Option<String>,
}

impl DeliveryResult {
    fn failed(message_id: i64, error: impl Into<String>) -> Self {
        Self {
            message_id,
            sent: false,
            error: Some(error.into()),
        }
    }
}

/// Schedules a backoff retry whenever the transport rejects a message.
#[derive(Clone)]
pub struct AutoRetry {
    pub scheduler: Arc<RetryScheduler>,
    pub policy: RetryPolicy,
}

/// Producer side of the dispatcher channel.
#[derive(Clone)]
struct ScheduleHandle {
    sender: Sender<i64>,
    shutdown: Arc<AtomicBool>,
}

impl DeliveryQueue for ScheduleHandle {
    fn enqueue(&self, message_id: i64) -> Result<(), QueueError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(QueueError::ChannelClosed);
        }

        self.sender
            .send(message_id)
            .map_err(|_| QueueError::ChannelClosed)
    }
}

/// Background delivery on a pool of worker threads.
///
/// A dispatcher thread holds enqueued messages until their `scheduled_at`
/// has passed and then hands them to the workers. Messages still waiting
/// when the queue stops remain unsent in the database and can be picked up
/// again with [`WorkerQueue::requeue_unsent`].
pub struct WorkerQueue {
    handle: ScheduleHandle,
    result_receiver: Receiver<DeliveryResult>,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    db: Database,
}

impl WorkerQueue {
    pub fn start(lifecycle: Arc<MessageLifecycle>, worker_count: usize) -> Result<Self, QueueError> {
        Self::with_retry(lifecycle, worker_count, None)
    }

    /// Starts the queue. With `retry` set, a message that fails in the
    /// transport gets a follow-up attempt scheduled on this same queue.
    pub fn with_retry(
        lifecycle: Arc<MessageLifecycle>,
        worker_count: usize,
        retry: Option<AutoRetry>,
    ) -> Result<Self, QueueError> {
        if worker_count == 0 {
            return Err(QueueError::SpawnFailed("worker_count must be > 0".to_string()));
        }

        let (schedule_sender, schedule_receiver) = unbounded::<i64>();
        let (job_sender, job_receiver) = bounded::<i64>(worker_count * 2);
        let (result_sender, result_receiver) = bounded::<DeliveryResult>(worker_count * 16);
        let shutdown = Arc::new(AtomicBool::new(false));
        let db = lifecycle.database().clone();

        let handle = ScheduleHandle {
            sender: schedule_sender,
            shutdown: Arc::clone(&shutdown),
        };

        let dispatcher = {
            let shutdown_flag = Arc::clone(&shutdown);
            let dispatcher_db = db.clone();
            thread::Builder::new()
                .name("postman-dispatcher".to_string())
                .spawn(move || run_dispatcher(schedule_receiver, job_sender, shutdown_flag, dispatcher_db))
                .map_err(|e| QueueError::SpawnFailed(e.to_string()))?
        };

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_lifecycle = Arc::clone(&lifecycle);
            let worker_retry = retry.clone();
            let retry_handle = handle.clone();

            let spawned = thread::Builder::new()
                .name(format!("postman-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        job_rx,
                        result_tx,
                        shutdown_flag,
                        worker_lifecycle,
                        worker_retry,
                        retry_handle,
                    );
                });

            match spawned {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    shutdown.store(true, Ordering::Relaxed);
                    return Err(QueueError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} delivery workers", worker_count);

        Ok(Self {
            handle,
            result_receiver,
            dispatcher,
            workers,
            shutdown,
            db,
        })
    }

    /// Enqueues every live message that has neither been sent nor failed.
    ///
    /// Returns the number of messages enqueued.
    pub fn requeue_unsent(&self) -> crate::error::Result<usize> {
        let pending = message_repo::find_pending(&self.db)?;
        for (id, _) in &pending {
            self.enqueue(*id)?;
        }
        if !pending.is_empty() {
            info!("Requeued {} unsent messages", pending.len());
        }
        Ok(pending.len())
    }

    pub fn try_recv_result(&self) -> Option<DeliveryResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<DeliveryResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down delivery queue...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Stops the queue and joins all threads. In-flight deliveries finish
    /// first.
    pub fn wait(self) {
        self.shutdown();
        drop(self.handle);

        if let Err(e) = self.dispatcher.join() {
            error!("Dispatcher panicked: {:?}", e);
        }

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All delivery workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

impl DeliveryQueue for WorkerQueue {
    fn enqueue(&self, message_id: i64) -> Result<(), QueueError> {
        self.handle.enqueue(message_id)
    }
}

fn due_at(db: &Database, message_id: i64) -> Option<i64> {
    match message_repo::find_by_id(db, message_id) {
        Ok(Some(row)) => Some(row.scheduled_at.unwrap_or(0)),
        Ok(None) => {
            warn!("Queued message {} does not exist, dropping", message_id);
            None
        }
        Err(e) => {
            // Deliver anyway; the worker reports the failure.
            warn!("Could not read schedule of message {}: {}", message_id, e);
            Some(0)
        }
    }
}

fn run_dispatcher(
    schedule_receiver: Receiver<i64>,
    job_sender: Sender<i64>,
    shutdown: Arc<AtomicBool>,
    db: Database,
) {
    debug!("Dispatcher started");
    let mut pending: BinaryHeap<Reverse<(i64, i64)>> = BinaryHeap::new();

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Dispatcher received shutdown signal, {} messages left waiting", pending.len());
            break;
        }

        match schedule_receiver.recv_timeout(TICK) {
            Ok(message_id) => {
                if let Some(due) = due_at(&db, message_id) {
                    pending.push(Reverse((due, message_id)));
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Schedule channel closed");
                break;
            }
        }

        let current = now();
        while let Some(Reverse((due, message_id))) = pending.peek().copied() {
            if due > current {
                break;
            }
            pending.pop();
            if job_sender.send(message_id).is_err() {
                error!("All delivery workers are gone, dispatcher exiting");
                return;
            }
        }
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<i64>,
    result_sender: Sender<DeliveryResult>,
    shutdown: Arc<AtomicBool>,
    lifecycle: Arc<MessageLifecycle>,
    retry: Option<AutoRetry>,
    retry_handle: ScheduleHandle,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(TICK) {
            Ok(message_id) => {
                debug!("Worker {} delivering message {}", worker_id, message_id);
                let result = deliver(&lifecycle, retry.as_ref(), &retry_handle, message_id);

                match result_sender.try_send(result) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => {
                        debug!("Worker {} result channel closed", worker_id);
                        break;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel closed", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} exiting", worker_id);
}

fn deliver(
    lifecycle: &MessageLifecycle,
    retry: Option<&AutoRetry>,
    retry_handle: &ScheduleHandle,
    message_id: i64,
) -> DeliveryResult {
    let mut message = match lifecycle.load_live(message_id) {
        Ok(message) => message,
        Err(e) => return DeliveryResult::failed(message_id, e.to_string()),
    };

    match lifecycle.send_immediately(&mut message) {
        Ok(true) => DeliveryResult {
            message_id,
            sent: true,
            error: None,
        },
        Ok(false) => {
            if let Some(auto) = retry.filter(|_| message.has_error_kind(ErrorKind::FailedToSend)) {
                if let Err(e) = auto.scheduler.repeat_with_policy(&mut message, &auto.policy, retry_handle) {
                    warn!("Could not schedule retry for message {}: {}", message_id, e);
                }
            }
            DeliveryResult {
                message_id,
                sent: false,
                error: message.error.clone(),
            }
        }
        Err(e) => {
            error!("Delivery of message {} aborted: {}", message_id, e);
            DeliveryResult::failed(message_id, e.to_string())
        }
    }
}
