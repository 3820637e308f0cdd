//! Completion-driven multiplexing engine (spec §4.J). No `io_uring` or
//! IOCP binding is available anywhere in the surrounding stack, so
//! completions are emulated with a worker thread pool: `submit` hands a
//! blocking operation to a worker, which posts its result back through a
//! channel that `poll` drains and dispatches from the calling thread —
//! preserving the same "only `poll` may block" suspension-point contract
//! as the reactor.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dashmap::DashMap;

use crate::detach::{DetachContext, EventKind, EventPool, EventLease};
use crate::error::{Result, SocketError};

/// Monotonically increasing identifier for an in-flight operation,
/// stable for the lifetime of one `submit` call — used to correlate a
/// later `cancel` with the right cancellation flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OperationId(u64);

/// Outcome delivered to an operation's completion callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionStatus {
    Ok,
    Cancelled,
    Error,
}

/// What the user-supplied work closure produced, or would have produced
/// had it not been cancelled before starting.
pub struct CompletionResult {
    pub status: CompletionStatus,
    pub bytes_transferred: usize,
    pub error: Option<SocketError>,
}

impl CompletionResult {
    fn cancelled() -> Self {
        Self { status: CompletionStatus::Cancelled, bytes_transferred: 0, error: None }
    }

    fn ok(bytes_transferred: usize) -> Self {
        Self { status: CompletionStatus::Ok, bytes_transferred, error: None }
    }

    fn err(error: SocketError) -> Self {
        Self { status: CompletionStatus::Error, bytes_transferred: 0, error: Some(error) }
    }
}

/// Receives the eventual result of a submitted operation.
pub trait ProactorCallback: Send + Sync {
    fn on_completion(&self, result: CompletionResult);
}

impl<F: Fn(CompletionResult) + Send + Sync> ProactorCallback for F {
    fn on_completion(&self, result: CompletionResult) {
        self(result)
    }
}

/// The blocking work a worker thread performs for one operation. Given a
/// flag it can poll for early cancellation, it returns the number of
/// bytes transferred or a classified error. Timers use a no-op body and
/// rely on `Proactor::timer`'s sleep-then-complete wrapper instead.
pub trait ProactorWork: Send + 'static {
    fn run(self: Box<Self>, cancel_flag: &AtomicBool) -> std::result::Result<usize, SocketError>;
}

impl<F> ProactorWork for F
where
    F: FnOnce(&AtomicBool) -> std::result::Result<usize, SocketError> + Send + 'static,
{
    fn run(self: Box<Self>, cancel_flag: &AtomicBool) -> std::result::Result<usize, SocketError> {
        (*self)(cancel_flag)
    }
}

struct Task {
    id: OperationId,
    cancel_flag: Arc<AtomicBool>,
    work: Box<dyn ProactorWork>,
    callback: Arc<dyn ProactorCallback>,
    _lease: EventLease,
}

enum WorkerMessage {
    Run(Task),
    Shutdown,
}

struct CompletionMessage {
    callback: Arc<dyn ProactorCallback>,
    result: CompletionResult,
}

/// The proactor engine: an `N`-worker thread pool emulating a completion
/// port. `submit` takes an event lease immediately (not at dispatch),
/// matching spec §4.J's rule that an in-flight op keeps its socket from
/// completing detach until the op itself completes or is cancelled.
pub struct Proactor {
    task_tx: Sender<WorkerMessage>,
    completion_rx: Receiver<CompletionMessage>,
    completion_tx: Sender<CompletionMessage>,
    workers: Vec<thread::JoinHandle<()>>,
    cancel_flags: DashMap<OperationId, Arc<AtomicBool>>,
    next_id: AtomicU64,
    event_pool: EventPool,
}

impl Proactor {
    pub fn new(worker_count: usize) -> Self {
        let (task_tx, task_rx) = mpsc::channel::<WorkerMessage>();
        let (completion_tx, completion_rx) = mpsc::channel::<CompletionMessage>();
        let task_rx = Arc::new(parking_lot::Mutex::new(task_rx));

        let workers = (0..worker_count.max(1))
            .map(|_| {
                let task_rx = task_rx.clone();
                let completion_tx = completion_tx.clone();
                thread::spawn(move || loop {
                    let message = task_rx.lock().recv();
                    match message {
                        Ok(WorkerMessage::Run(task)) => {
                            let result = if task.cancel_flag.load(Ordering::Acquire) {
                                CompletionResult::cancelled()
                            } else {
                                match task.work.run(&task.cancel_flag) {
                                    Ok(bytes) => CompletionResult::ok(bytes),
                                    Err(err) => CompletionResult::err(err),
                                }
                            };
                            let _ = completion_tx.send(CompletionMessage {
                                callback: task.callback,
                                result,
                            });
                            // task._lease dropped here, releasing the detach lease
                            // only after the completion has been queued.
                        }
                        Ok(WorkerMessage::Shutdown) | Err(_) => break,
                    }
                })
            })
            .collect();

        Self {
            task_tx,
            completion_rx,
            completion_tx,
            workers,
            cancel_flags: DashMap::new(),
            next_id: AtomicU64::new(0),
            event_pool: EventPool::new(),
        }
    }

    /// Submits `work` against `detach_ctx`, taking a lease immediately.
    /// Fails with `Invalid` if the socket is not ATTACHED (mirrors the
    /// reactor's lease-acquisition failure mode).
    pub fn submit(
        &self,
        detach_ctx: &Arc<DetachContext>,
        work: impl ProactorWork,
        callback: Arc<dyn ProactorCallback>,
    ) -> Result<OperationId> {
        let lease = self.event_pool.checkout(detach_ctx, EventKind::Completion)?;
        let id = OperationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.cancel_flags.insert(id, cancel_flag.clone());
        let task = Task {
            id,
            cancel_flag,
            work: Box::new(work),
            callback,
            _lease: lease,
        };
        self.task_tx
            .send(WorkerMessage::Run(task))
            .map_err(|_| SocketError::Invalid("proactor worker pool has shut down"))?;
        Ok(id)
    }

    /// Submits a timer completing after `deadline` elapses, or
    /// immediately with `Cancelled` if cancelled first. Timers take a
    /// lease exactly like I/O operations, per spec §5.
    pub fn timer(
        &self,
        detach_ctx: &Arc<DetachContext>,
        deadline: Duration,
        callback: Arc<dyn ProactorCallback>,
    ) -> Result<OperationId> {
        self.submit(
            detach_ctx,
            move |cancel_flag: &AtomicBool| {
                let step = Duration::from_millis(10);
                let mut waited = Duration::ZERO;
                while waited < deadline {
                    if cancel_flag.load(Ordering::Acquire) {
                        return Ok(0);
                    }
                    let chunk = step.min(deadline - waited);
                    thread::sleep(chunk);
                    waited += chunk;
                }
                Ok(0)
            },
            callback,
        )
    }

    /// Requests cancellation of `id`. If the operation has not yet
    /// started running in its worker, it completes with
    /// `CompletionStatus::Cancelled` instead of running. An operation
    /// already past its cancellation check point runs to completion
    /// normally — this engine has no preemption mechanism for a blocking
    /// syscall in flight.
    pub fn cancel(&self, id: OperationId) {
        if let Some(flag) = self.cancel_flags.get(&id) {
            flag.store(true, Ordering::Release);
        }
    }

    /// Blocks until at least one completion is ready (or `timeout`
    /// elapses), dispatching each ready completion's callback
    /// synchronously on the calling thread. Never fails on timeout.
    pub fn poll(&self, timeout: Option<Duration>) -> usize {
        let first = match timeout {
            Some(timeout) => match self.completion_rx.recv_timeout(timeout) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => return 0,
                Err(RecvTimeoutError::Disconnected) => return 0,
            },
            None => match self.completion_rx.recv() {
                Ok(message) => message,
                Err(_) => return 0,
            },
        };
        first.callback.on_completion(first.result);
        let mut dispatched = 1;
        while let Ok(message) = self.completion_rx.try_recv() {
            message.callback.on_completion(message.result);
            dispatched += 1;
        }
        dispatched
    }
}

impl Drop for Proactor {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.task_tx.send(WorkerMessage::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct RecordingCallback {
        statuses: Arc<parking_lot::Mutex<Vec<CompletionStatus>>>,
    }

    impl ProactorCallback for RecordingCallback {
        fn on_completion(&self, result: CompletionResult) {
            self.statuses.lock().push(result.status);
        }
    }

    #[test]
    fn submitted_work_completes_and_dispatches() {
        let proactor = Proactor::new(2);
        let ctx = Arc::new(DetachContext::new());
        let statuses = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let callback = Arc::new(RecordingCallback { statuses: statuses.clone() });

        proactor
            .submit(&ctx, |_flag: &AtomicBool| Ok(42usize), callback)
            .unwrap();

        let dispatched = proactor.poll(Some(Duration::from_secs(5)));
        assert_eq!(dispatched, 1);
        assert_eq!(*statuses.lock(), vec![CompletionStatus::Ok]);
    }

    #[test]
    fn submit_on_detached_socket_fails() {
        let proactor = Proactor::new(1);
        let ctx = Arc::new(DetachContext::new());
        ctx.detach().unwrap();
        let callback = Arc::new(RecordingCallback { statuses: Arc::new(parking_lot::Mutex::new(Vec::new())) });
        assert!(matches!(
            proactor.submit(&ctx, |_: &AtomicBool| Ok(0), callback),
            Err(SocketError::Invalid(_))
        ));
    }

    #[test]
    fn detach_defers_until_submitted_op_completes() {
        let proactor = Proactor::new(1);
        let ctx = Arc::new(DetachContext::new());
        let notified = Arc::new(AtomicBool::new(false));
        let notified_clone = notified.clone();
        ctx.set_listener(Arc::new(move || notified_clone.store(true, Ordering::SeqCst)));

        let gate = Arc::new((parking_lot::Mutex::new(false), parking_lot::Condvar::new()));
        let gate_clone = gate.clone();
        let statuses = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let callback = Arc::new(RecordingCallback { statuses: statuses.clone() });

        proactor
            .submit(
                &ctx,
                move |_flag: &AtomicBool| {
                    let (lock, cvar) = &*gate_clone;
                    let mut started = lock.lock();
                    *started = true;
                    cvar.notify_all();
                    Ok(1usize)
                },
                callback,
            )
            .unwrap();

        // wait for the worker to actually start running the op
        {
            let (lock, cvar) = &*gate;
            let mut started = lock.lock();
            if !*started {
                cvar.wait_for(&mut started, Duration::from_secs(5));
            }
        }

        assert!(matches!(ctx.detach(), Err(SocketError::Pending)));
        assert!(!notified.load(Ordering::SeqCst));

        proactor.poll(Some(Duration::from_secs(5)));
        assert!(notified.load(Ordering::SeqCst));
        assert_eq!(ctx.state(), crate::detach::DetachState::Detached);
    }

    #[test]
    fn cancel_before_worker_picks_up_yields_cancelled_status() {
        // A single worker, occupied by a gated first op, lets us cancel the
        // second op while it is still sitting in the channel queue.
        let proactor = Proactor::new(1);
        let ctx = Arc::new(DetachContext::new());
        let release_gate = Arc::new((parking_lot::Mutex::new(false), parking_lot::Condvar::new()));
        let started_gate = Arc::new((parking_lot::Mutex::new(false), parking_lot::Condvar::new()));
        let release_clone = release_gate.clone();
        let started_clone = started_gate.clone();

        let statuses = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let callback_a = Arc::new(RecordingCallback { statuses: statuses.clone() });
        let callback_b = Arc::new(RecordingCallback { statuses: statuses.clone() });

        proactor
            .submit(
                &ctx,
                move |_flag: &AtomicBool| {
                    let (started_lock, started_cvar) = &*started_clone;
                    *started_lock.lock() = true;
                    started_cvar.notify_all();
                    let (lock, cvar) = &*release_clone;
                    let mut released = lock.lock();
                    if !*released {
                        cvar.wait_for(&mut released, Duration::from_secs(5));
                    }
                    Ok(0)
                },
                callback_a,
            )
            .unwrap();

        {
            let (lock, cvar) = &*started_gate;
            let mut started = lock.lock();
            if !*started {
                cvar.wait_for(&mut started, Duration::from_secs(5));
            }
        }

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let id = proactor
            .submit(
                &ctx,
                move |_flag: &AtomicBool| {
                    counter_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                },
                callback_b,
            )
            .unwrap();
        proactor.cancel(id);

        {
            let (lock, cvar) = &*release_gate;
            *lock.lock() = true;
            cvar.notify_all();
        }

        proactor.poll(Some(Duration::from_secs(5)));
        proactor.poll(Some(Duration::from_secs(5)));

        assert_eq!(counter.load(Ordering::SeqCst), 0, "cancelled op must not run its work");
        assert_eq!(*statuses.lock(), vec![CompletionStatus::Ok, CompletionStatus::Cancelled]);
    }
}
