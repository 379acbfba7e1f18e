//! Pool of worker contexts
//!
//! A [`ContextPool`] runs N workers started with [`spawn_worker`]. Each
//! worker waits on two channels: the shared job queue, where any idle worker
//! picks up the next job, and its own queue, used to reach every context
//! (e.g. to define the same function everywhere).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use jsbridge_runtime::{Bindings, ContextPool, Definer, Identity, init_default};
//!
//! init_default().unwrap();
//! let bindings = Arc::new(Bindings::new());
//! let add = bindings.register_function("add", |_, args| {
//!     let sum: f64 = args.iter().filter_map(|a| a.as_f64()).sum();
//!     Ok(serde_json::json!(sum))
//! })
//! .unwrap();
//!
//! let pool = ContextPool::new(4, bindings).unwrap();
//! pool.broadcast(move |ctx| ctx.define_function(Identity::GLOBAL, "add", add))
//!     .unwrap();
//! assert_eq!(pool.eval_json("add(1, 2)").unwrap().as_str(), "3");
//! pool.shutdown().unwrap();
//! ```

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Select, Sender, bounded, unbounded};
use jsbridge_core::{Identity, Payload};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tracing::{debug, error, info_span, trace, warn};

use crate::context::{Context, ContextId};
use crate::engine;
use crate::error::{RuntimeError, RuntimeResult};
use crate::host::{HostCallbacks, HostReply};
use crate::scope::Scope;
use crate::worker::{WorkerHandle, WorkerId, panic_message, spawn_worker};

/// Work item run on a pool worker's context
type Job = Box<dyn FnOnce(&mut Context) + Send>;

/// Outcome of one worker's startup
type Ready = (WorkerId, Result<(), String>);

/// Host table installed on pool workers; runs the job loop and forwards the
/// rest to the caller's host.
struct PoolHost {
    inner: Arc<dyn HostCallbacks>,
    jobs: Receiver<Job>,
    private: Mutex<HashMap<WorkerId, Receiver<Job>>>,
    ready: Sender<Ready>,
}

impl PoolHost {
    fn run_jobs(&self, worker: WorkerId, context: &mut Context, own: Receiver<Job>) {
        loop {
            let mut sel = Select::new();
            let shared_idx = sel.recv(&self.jobs);
            let own_idx = sel.recv(&own);
            let op = sel.select();
            let job = match op.index() {
                i if i == own_idx => op.recv(&own),
                i if i == shared_idx => op.recv(&self.jobs),
                _ => unreachable!("select returned an unregistered index"),
            };
            let Ok(job) = job else {
                debug!(worker, "Job channel disconnected");
                break;
            };

            trace!(worker, "Running job");
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| job(context))) {
                error!(worker, panic = %panic_message(panic.as_ref()), "Job panicked");
            }
            if context.is_poisoned() {
                warn!(worker, "Worker context ran out of memory, leaving the pool");
                break;
            }
        }
    }
}

impl HostCallbacks for PoolHost {
    fn on_call(&self, scope: &Scope<'_>, callee: Identity, name: &str, args: &Payload) -> HostReply {
        self.inner.on_call(scope, callee, name, args)
    }

    fn on_error(&self, context: ContextId, filename: &str, line: u32, message: &str) {
        self.inner.on_error(context, filename, line, message)
    }

    fn on_get(&self, scope: &Scope<'_>, owner: Identity, name: &str) -> HostReply {
        self.inner.on_get(scope, owner, name)
    }

    fn on_set(&self, scope: &Scope<'_>, owner: Identity, name: &str, value: &Payload) -> HostReply {
        self.inner.on_set(scope, owner, name, value)
    }

    fn on_worker_ready(&self, worker: WorkerId, context: &mut Context) {
        let Some(own) = self.private.lock().remove(&worker) else {
            error!(worker, "Pool worker has no private queue");
            let _ = self.ready.send((worker, Err("no private queue".into())));
            return;
        };
        let _ = self.ready.send((worker, Ok(())));
        self.run_jobs(worker, context, own);
    }

    fn on_worker_failed(&self, worker: WorkerId, message: &str) {
        let _ = self.ready.send((worker, Err(message.to_owned())));
        self.inner.on_worker_failed(worker, message);
    }

    fn on_result(&self, name: &str, outcome: Result<&Payload, &str>) {
        self.inner.on_result(name, outcome)
    }
}

/// Fixed-size set of worker contexts sharing one host table
pub struct ContextPool {
    jobs: Option<Sender<Job>>,
    private: Vec<Sender<Job>>,
    workers: Vec<WorkerHandle>,
}

impl ContextPool {
    /// Start `size` workers and wait until every one is ready.
    ///
    /// If any worker fails to build its context, the pool is torn down and
    /// the first failure is returned as [`RuntimeError::WorkerInit`].
    pub fn new(size: usize, host: Arc<dyn HostCallbacks>) -> RuntimeResult<Self> {
        let size = size.max(1);
        let engine = engine::engine()?;
        let _span = info_span!("pool", size).entered();

        let (job_tx, job_rx) = unbounded::<Job>();
        let (ready_tx, ready_rx) = unbounded::<Ready>();

        let mut ids = Vec::with_capacity(size);
        let mut private = Vec::with_capacity(size);
        let mut private_rx = HashMap::with_capacity(size);
        for _ in 0..size {
            let id = engine.next_worker_id();
            let (tx, rx) = unbounded::<Job>();
            ids.push(id);
            private.push(tx);
            private_rx.insert(id, rx);
        }

        let pool_host = Arc::new(PoolHost {
            inner: host,
            jobs: job_rx,
            private: Mutex::new(private_rx),
            ready: ready_tx,
        });

        let mut pool = Self {
            jobs: Some(job_tx),
            private,
            workers: Vec::with_capacity(size),
        };
        for id in ids {
            pool.workers.push(spawn_worker(id, pool_host.clone())?);
        }
        drop(pool_host);

        let mut failure = None;
        for _ in 0..size {
            match ready_rx.recv() {
                Ok((_, Ok(()))) => {}
                Ok((id, Err(message))) => {
                    failure.get_or_insert(RuntimeError::WorkerInit { id, message });
                }
                Err(_) => {
                    failure.get_or_insert(RuntimeError::internal(
                        "pool worker exited without reporting",
                    ));
                    break;
                }
            }
        }
        if let Some(err) = failure {
            error!(error = %err, "Pool startup failed");
            let _ = pool.stop();
            return Err(err);
        }

        debug!("Pool ready");
        Ok(pool)
    }

    /// Pool sized from [`crate::EngineConfig::pool_size`]
    pub fn with_default_size(host: Arc<dyn HostCallbacks>) -> RuntimeResult<Self> {
        let size = engine::engine()?.config().pool_size;
        Self::new(size, host)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    fn submit(&self, job: Job) -> RuntimeResult<()> {
        self.jobs
            .as_ref()
            .ok_or(RuntimeError::PoolClosed)?
            .send(job)
            .map_err(|_| RuntimeError::PoolClosed)
    }

    /// Run `f` on whichever context is free next and wait for its result
    pub fn run<F, R>(&self, f: F) -> RuntimeResult<R>
    where
        F: FnOnce(&mut Context) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = bounded(1);
        self.submit(Box::new(move |ctx| {
            let _ = tx.send(f(ctx));
        }))?;
        rx.recv().map_err(|_| RuntimeError::JobDropped)
    }

    /// Evaluate on one context and return the completion value as JSON
    pub fn eval_json(&self, source: impl Into<String>) -> RuntimeResult<Payload> {
        let source = source.into();
        self.run(move |ctx| ctx.eval_json(&source))?
    }

    /// Evaluate on one context and deserialize the completion value
    pub fn eval<T>(&self, source: impl Into<String>) -> RuntimeResult<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let source = source.into();
        self.run(move |ctx| ctx.eval_as::<T>(&source))?
    }

    /// Evaluate on one context for side effects
    pub fn exec(&self, source: impl Into<String>) -> RuntimeResult<()> {
        let source = source.into();
        self.run(move |ctx| ctx.eval(&source))?
    }

    /// [`ContextPool::eval_json`] without blocking the calling task
    pub async fn eval_async(&self, source: impl Into<String>) -> RuntimeResult<Payload> {
        let source = source.into();
        let (tx, rx) = oneshot::channel();
        self.submit(Box::new(move |ctx| {
            let _ = tx.send(ctx.eval_json(&source));
        }))?;
        rx.await.map_err(|_| RuntimeError::JobDropped)?
    }

    /// Run `f` on every context, one after another.
    ///
    /// Stops at the first context that fails and returns its error.
    pub fn broadcast<F>(&self, f: F) -> RuntimeResult<()>
    where
        F: Fn(&mut Context) -> RuntimeResult<()> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        for sender in &self.private {
            let f = f.clone();
            let (tx, rx) = bounded(1);
            sender
                .send(Box::new(move |ctx| {
                    let _ = tx.send(f(ctx));
                }))
                .map_err(|_| RuntimeError::PoolClosed)?;
            rx.recv().map_err(|_| RuntimeError::JobDropped)??;
        }
        Ok(())
    }

    /// Evaluate `source` on every context
    pub fn exec_all(&self, source: impl Into<String>) -> RuntimeResult<()> {
        let source: Arc<str> = source.into().into();
        self.broadcast(move |ctx| ctx.eval(&source))
    }

    /// Stop every worker and wait for the threads to exit
    pub fn shutdown(mut self) -> RuntimeResult<()> {
        self.stop()
    }

    fn stop(&mut self) -> RuntimeResult<()> {
        self.jobs.take();
        self.private.clear();
        let mut result = Ok(());
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.join() {
                error!(error = %e, "Pool worker did not exit cleanly");
                result = Err(e);
            }
        }
        result
    }
}

impl Drop for ContextPool {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
