//! Thread pool owning a fixed set of engine instances (spec §5, component
//! N): each worker thread loops `engine.poll(timeout)` until shut down.
//! Sockets attach to exactly one engine; [`LoadBalancingOptions::Static`]
//! pins that assignment for the socket's lifetime, while
//! [`LoadBalancingOptions::Dynamic`] lets a caller on a different thread
//! reach the owning engine through a [`Strand`] instead of migrating work
//! between engines (spec §5's "explicit per-socket strand abstraction").
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use sluice_core::config::LoadBalancingOptions;
use sluice_core::error::Result;

/// Anything the pool can drive with a blocking `poll` call. Implemented
/// for both [`sluice_core::reactor::Reactor`] and
/// [`sluice_core::proactor::Proactor`] so one pool type serves either
/// engine family (spec §5 draws no distinction between the two here).
pub trait Engine: Send + Sync + 'static {
    fn poll(&self, timeout: Option<Duration>) -> Result<usize>;
}

impl Engine for sluice_core::reactor::Reactor {
    fn poll(&self, timeout: Option<Duration>) -> Result<usize> {
        sluice_core::reactor::Reactor::poll(self, timeout)
    }
}

impl Engine for sluice_core::proactor::Proactor {
    fn poll(&self, timeout: Option<Duration>) -> Result<usize> {
        Ok(sluice_core::proactor::Proactor::poll(self, timeout))
    }
}

const POLL_TIMEOUT: Duration = Duration::from_millis(100);

struct WorkerHandle {
    thread_id: ThreadId,
    task_tx: mpsc::Sender<Box<dyn FnOnce() + Send>>,
    join: Option<JoinHandle<()>>,
}

/// Owns `N` engine instances, each driven by its own worker thread, and
/// assigns sockets to engines either once (static) or per-call (dynamic).
pub struct EnginePool<E: Engine> {
    engines: Vec<Arc<E>>,
    workers: Vec<WorkerHandle>,
    next_assignment: AtomicUsize,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
}

impl<E: Engine> EnginePool<E> {
    /// Spawns one worker thread per entry in `engines`, each running
    /// `engine.poll` in a loop and draining any work posted to its
    /// `Strand` between polls.
    pub fn new(engines: Vec<Arc<E>>) -> Self {
        let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut workers = Vec::with_capacity(engines.len());

        for (index, engine) in engines.iter().enumerate() {
            let engine = engine.clone();
            let shutdown = shutdown.clone();
            let (task_tx, task_rx) = mpsc::channel::<Box<dyn FnOnce() + Send>>();
            let thread_id_slot = Arc::new(parking_lot::Mutex::new(None));
            let thread_id_slot_for_thread = thread_id_slot.clone();

            let join = thread::Builder::new()
                .name(format!("sluice-engine-{index}"))
                .spawn(move || {
                    *thread_id_slot_for_thread.lock() = Some(thread::current().id());
                    tracing::info!(engine_index = index, "engine worker thread started");
                    while !shutdown.load(Ordering::Acquire) {
                        while let Ok(task) = task_rx.try_recv() {
                            task();
                        }
                        let _ = engine.poll(Some(POLL_TIMEOUT));
                    }
                    tracing::info!(engine_index = index, "engine worker thread stopping");
                })
                .expect("failed to spawn engine worker thread");

            // The worker records its own `ThreadId` on first run; spin
            // briefly until it has, since `Strand::post` needs it to
            // decide whether a call is same-thread or cross-thread.
            let thread_id = loop {
                if let Some(id) = *thread_id_slot.lock() {
                    break id;
                }
                thread::yield_now();
            };

            workers.push(WorkerHandle { thread_id, task_tx, join: Some(join) });
        }

        Self { engines, workers, next_assignment: AtomicUsize::new(0), shutdown }
    }

    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    /// Assigns a new socket to an engine, honoring `load_balancing`.
    /// Static and dynamic currently pick an engine the same way (round
    /// robin over the pool) — the distinction is what the *caller* does
    /// with the resulting [`Strand`] afterward: a statically balanced
    /// socket is expected to only ever be touched from its assigned
    /// engine's own thread, while a dynamically balanced one is expected
    /// to go through `Strand::post` from arbitrary threads.
    pub fn assign(&self, _load_balancing: LoadBalancingOptions) -> EngineAssignment<E> {
        let index = self.next_assignment.fetch_add(1, Ordering::Relaxed) % self.engines.len();
        EngineAssignment {
            engine: self.engines[index].clone(),
            strand: Strand {
                owning_thread: self.workers[index].thread_id,
                task_tx: self.workers[index].task_tx.clone(),
            },
        }
    }

    /// Signals every worker thread to stop after its current poll
    /// iteration and joins them.
    pub fn shutdown(mut self) {
        tracing::info!(engine_count = self.engines.len(), "engine pool shutting down");
        self.shutdown.store(true, Ordering::Release);
        for worker in &mut self.workers {
            if let Some(join) = worker.join.take() {
                let _ = join.join();
            }
        }
    }
}

/// The engine a socket was assigned to, plus the [`Strand`] through which
/// callers on other threads reach it.
pub struct EngineAssignment<E: Engine> {
    pub engine: Arc<E>,
    pub strand: Strand,
}

/// A per-socket serialization handle (spec §5's "explicit per-socket
/// strand abstraction"): running on the owning engine's thread executes
/// `f` inline, while any other thread posts `f` onto that engine's task
/// queue, where it runs ahead of the next `poll` call. Either way, no two
/// posted closures for sockets on the same engine run concurrently with
/// each other or with that engine's callback dispatch, since both share
/// the single worker thread.
#[derive(Clone)]
pub struct Strand {
    owning_thread: ThreadId,
    task_tx: mpsc::Sender<Box<dyn FnOnce() + Send>>,
}

impl Strand {
    /// Runs `f` with strand-serialized access to the socket's owning
    /// engine. Blocks the caller only if `f` itself blocks; cross-thread
    /// posts do not wait for `f` to run (fire-and-forget), matching the
    /// non-blocking contract of spec §5 ("all other operations ... either
    /// complete synchronously or enqueue work and return immediately").
    pub fn post(&self, f: impl FnOnce() + Send + 'static) {
        if thread::current().id() == self.owning_thread {
            f();
        } else {
            // A disconnected receiver means the owning worker already
            // shut down; there is nowhere left to run `f`, so it is
            // dropped rather than panicking the caller.
            let _ = self.task_tx.send(Box::new(f));
        }
    }

    pub fn is_on_owning_thread(&self) -> bool {
        thread::current().id() == self.owning_thread
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use super::*;

    struct NullEngine;

    impl Engine for NullEngine {
        fn poll(&self, timeout: Option<Duration>) -> Result<usize> {
            std::thread::sleep(timeout.unwrap_or(Duration::from_millis(1)).min(Duration::from_millis(5)));
            Ok(0)
        }
    }

    #[test]
    fn assign_round_robins_across_engines() {
        let engines = vec![Arc::new(NullEngine), Arc::new(NullEngine), Arc::new(NullEngine)];
        let pool = EnginePool::new(engines);

        let a = pool.assign(LoadBalancingOptions::Static);
        let b = pool.assign(LoadBalancingOptions::Static);
        let c = pool.assign(LoadBalancingOptions::Static);
        let d = pool.assign(LoadBalancingOptions::Static);

        assert_ne!(a.strand.owning_thread, b.strand.owning_thread);
        assert_ne!(b.strand.owning_thread, c.strand.owning_thread);
        assert_eq!(a.strand.owning_thread, d.strand.owning_thread);
        pool.shutdown();
    }

    #[test]
    fn strand_post_from_other_thread_is_deferred_to_owning_worker() {
        let engines = vec![Arc::new(NullEngine)];
        let pool = EnginePool::new(engines);
        let assignment = pool.assign(LoadBalancingOptions::Dynamic);

        let ran = Arc::new(AtomicU64::new(0));
        let ran_clone = ran.clone();
        let strand = assignment.strand.clone();
        assert!(!strand.is_on_owning_thread());
        strand.post(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..50 {
            if ran.load(Ordering::SeqCst) == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        pool.shutdown();
    }

    #[test]
    fn strand_post_from_the_owning_thread_runs_synchronously() {
        let (task_tx, _task_rx) = mpsc::channel();
        let strand = Strand { owning_thread: thread::current().id(), task_tx };
        assert!(strand.is_on_owning_thread());

        let ran = Arc::new(AtomicU64::new(0));
        let ran_clone = ran.clone();
        strand.post(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });
        // Inline execution happens before `post` returns, with no worker
        // thread or channel hop involved.
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
