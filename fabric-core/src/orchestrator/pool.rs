use std::{
    collections::VecDeque,
    future::Future,
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    thread::JoinHandle,
};

use futures_channel::oneshot;
use monoio::utils::bind_to_cpu_set;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::RuntimeWrapper;
use crate::{
    affinity::AffinityCache,
    config::{RejectionPolicy, RuntimeConfig},
    error::ExecuteError,
};

type Job = Box<dyn FnOnce(&mut RuntimeWrapper, &AffinityCache) + Send>;

struct Shared {
    state: Mutex<State>,
    available: Condvar,
    capacity: usize,
}

#[derive(Default)]
struct State {
    jobs: VecDeque<Job>,
    shutdown: bool,
}

impl Shared {
    fn next_job(&self) -> Option<Job> {
        let mut state = self.state.lock();
        loop {
            if let Some(job) = state.jobs.pop_front() {
                return Some(job);
            }
            if state.shutdown {
                return None;
            }
            self.available.wait(&mut state);
        }
    }
}

/// Completion of a submitted job.
pub struct JobHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T, ExecuteError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map_err(|_| ExecuteError::Discarded)
    }
}

pub struct WorkerPool {
    config: RuntimeConfig,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `worker_threads` workers and waits until each has its runtime running.
    pub fn start(config: RuntimeConfig) -> Result<Self, ExecuteError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            available: Condvar::new(),
            capacity: config.queue_capacity.max(1),
        });
        let cores = if config.cpu_affinity {
            std::thread::available_parallelism().ok()
        } else {
            None
        };

        let mut pool = WorkerPool {
            config,
            shared,
            workers: Vec::new(),
        };
        let runtime_config = Arc::new(pool.config.clone());
        for worker_id in 0..pool.config.worker_threads.max(1) {
            let shared = pool.shared.clone();
            let runtime_config = runtime_config.clone();
            let (ready_tx, ready_rx) = oneshot::channel::<io::Result<()>>();
            let handle = std::thread::Builder::new()
                .name(format!("fabric-worker-{worker_id}"))
                .spawn(move || {
                    // bind thread to cpu core
                    if let Some(cores) = cores {
                        let core = worker_id % cores;
                        if let Err(e) = bind_to_cpu_set([core]) {
                            warn!("bind thread {worker_id} to core {core} failed: {e}");
                        }
                    }
                    let runtime = match RuntimeWrapper::new(&runtime_config) {
                        Ok(runtime) => {
                            let _ = ready_tx.send(Ok(()));
                            runtime
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    run_worker(worker_id, &shared, runtime);
                })?;
            pool.workers.push(handle);
            match futures::executor::block_on(ready_rx) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(ExecuteError::Shutdown),
            }
        }
        info!(
            workers = pool.workers.len(),
            capacity = pool.shared.capacity,
            policy = ?pool.config.rejection_policy,
            "worker pool started"
        );
        Ok(pool)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Number of jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }

    /// Submits a job. `f` is called on the thread that runs the job with that thread's
    /// affinity cache, and the future it returns is driven to completion there.
    pub fn spawn<F, Fut, T>(&self, f: F) -> Result<JobHandle<T>, ExecuteError>
    where
        F: FnOnce(AffinityCache) -> Fut + Send + 'static,
        Fut: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |runtime, cache| {
            let out = runtime.block_on(f(cache.clone()));
            let _ = tx.send(out);
        });

        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(ExecuteError::Shutdown);
        }
        if state.jobs.len() < self.shared.capacity {
            state.jobs.push_back(job);
            drop(state);
            self.shared.available.notify_one();
            return Ok(JobHandle { rx });
        }

        match self.config.rejection_policy {
            RejectionPolicy::Abort => {
                warn!("work queue full, job rejected");
                Err(ExecuteError::Rejected)
            }
            RejectionPolicy::Discard => {
                warn!("work queue full, job discarded");
                Ok(JobHandle { rx })
            }
            RejectionPolicy::DiscardOldest => {
                warn!("work queue full, oldest job discarded");
                state.jobs.pop_front();
                state.jobs.push_back(job);
                drop(state);
                self.shared.available.notify_one();
                Ok(JobHandle { rx })
            }
            RejectionPolicy::CallerRuns => {
                drop(state);
                debug!("work queue full, running job on the caller thread");
                let mut runtime = RuntimeWrapper::new(&self.config)?;
                job(&mut runtime, &AffinityCache::thread_local());
                Ok(JobHandle { rx })
            }
        }
    }

    /// Stops accepting jobs, lets the workers drain the queue, and joins them.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.available.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(worker_id: usize, shared: &Shared, mut runtime: RuntimeWrapper) {
    let cache = AffinityCache::worker();
    debug!(worker_id, "worker started");
    while let Some(job) = shared.next_job() {
        if catch_unwind(AssertUnwindSafe(|| job(&mut runtime, &cache))).is_err() {
            error!(worker_id, "job panicked");
            // the panicking job may have left its request state behind
            cache.get_and_reset_message();
            cache.get_and_reset_work_context();
        }
    }
    debug!(worker_id, "worker stopped");
}
