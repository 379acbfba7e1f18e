//! Worker threads
//!
//! Each worker owns one [`Context`] on a dedicated OS thread. A plain worker
//! hands its context to [`HostCallbacks::on_worker_ready`] and lives as long
//! as that call; a script worker re-runs a fixed source every time it is
//! triggered and reports each outcome through [`HostCallbacks::on_result`].
//! Either way the context is destroyed on the worker thread when it exits,
//! including when the host callback panics.

use std::any::Any;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, error, info_span, trace, warn};

use crate::context::{Context, ContextBuilder};
use crate::engine::{self, EngineStats};
use crate::error::{RuntimeError, RuntimeResult};
use crate::host::HostCallbacks;

/// Host-visible worker number
pub type WorkerId = u32;

/// Handle to a thread started by [`spawn_worker`]
#[derive(Debug)]
pub struct WorkerHandle {
    id: WorkerId,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the worker thread to exit
    pub fn join(self) -> RuntimeResult<()> {
        self.thread
            .join()
            .map_err(|_| RuntimeError::WorkerPanicked(self.id))
    }
}

/// Start a worker thread with its own context.
///
/// The context is built on the new thread with the worker heap ceiling. On
/// success the thread blocks in `host.on_worker_ready(id, &mut context)`;
/// on failure it calls `host.on_worker_failed(id, message)` and exits.
pub fn spawn_worker(id: WorkerId, host: Arc<dyn HostCallbacks>) -> RuntimeResult<WorkerHandle> {
    spawn_worker_with(id, Context::builder(), host)
}

/// [`spawn_worker`] with explicit context settings
pub fn spawn_worker_with(
    id: WorkerId,
    builder: ContextBuilder,
    host: Arc<dyn HostCallbacks>,
) -> RuntimeResult<WorkerHandle> {
    let thread = thread_builder(format!("jsbridge-worker-{id}"))
        .spawn(move || run_worker(id, builder.worker(id), host))
        .map_err(|e| RuntimeError::WorkerSpawn {
            id,
            message: e.to_string(),
        })?;
    Ok(WorkerHandle { id, thread })
}

fn thread_builder(name: String) -> thread::Builder {
    let builder = thread::Builder::new().name(name);
    match engine::engine().ok().and_then(|e| e.config().worker_stack_size) {
        Some(size) => builder.stack_size(size),
        None => builder,
    }
}

/// Build the worker's context, reporting failure to the host
fn start(id: WorkerId, builder: ContextBuilder, host: &Arc<dyn HostCallbacks>) -> Option<Context> {
    match builder.build(host.clone()) {
        Ok(context) => {
            if let Ok(engine) = engine::engine() {
                EngineStats::bump(&engine.stats().workers_spawned);
            }
            debug!(context = %context.id(), "Worker initialized");
            Some(context)
        }
        Err(e) => {
            error!(error = %e, "Failed to create worker context");
            if let Ok(engine) = engine::engine() {
                EngineStats::bump(&engine.stats().workers_failed);
            }
            host.on_worker_failed(id, &e.to_string());
            None
        }
    }
}

fn run_worker(id: WorkerId, builder: ContextBuilder, host: Arc<dyn HostCallbacks>) {
    let _span = info_span!("worker", id).entered();
    debug!("Worker starting");

    let Some(context) = start(id, builder, &host) else {
        return;
    };
    let mut context = scopeguard::guard(context, |context| {
        debug!("Worker stopped");
        context.destroy();
    });

    host.on_worker_ready(id, &mut context);
}

/// A worker that evaluates one fixed source per trigger
#[derive(Debug)]
pub struct ScriptWorker {
    id: WorkerId,
    name: String,
    triggers: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ScriptWorker {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue one run of the source. Never blocks.
    pub fn trigger(&self) -> RuntimeResult<()> {
        self.triggers
            .as_ref()
            .ok_or(RuntimeError::WorkerStopped(self.id))?
            .send(())
            .map_err(|_| RuntimeError::WorkerStopped(self.id))
    }

    /// Stop accepting triggers, finish queued runs and wait for the thread
    pub fn shutdown(mut self) -> RuntimeResult<()> {
        self.triggers.take();
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| RuntimeError::WorkerPanicked(self.id)),
            None => Ok(()),
        }
    }
}

impl Drop for ScriptWorker {
    fn drop(&mut self) {
        // Closing the channel ends the loop once queued runs are done.
        self.triggers.take();
    }
}

/// Start a worker that runs `source` every time it is triggered.
///
/// Each run's completion value is serialized and passed to
/// `host.on_result(name, ..)`. Script errors are passed as `Err(message)`.
/// The worker exits when the [`ScriptWorker`] is shut down or dropped, or
/// when its context runs out of memory.
pub fn spawn_script_worker(
    name: impl Into<String>,
    source: impl Into<String>,
    host: Arc<dyn HostCallbacks>,
) -> RuntimeResult<ScriptWorker> {
    let id = engine::engine()?.next_worker_id();
    let name = name.into();
    let source = source.into();
    let (tx, rx) = unbounded();

    let thread_name = name.clone();
    let thread = thread_builder(format!("jsbridge-script-{id}"))
        .spawn(move || run_script_worker(id, thread_name, source, host, rx))
        .map_err(|e| RuntimeError::WorkerSpawn {
            id,
            message: e.to_string(),
        })?;

    Ok(ScriptWorker {
        id,
        name,
        triggers: Some(tx),
        thread: Some(thread),
    })
}

fn run_script_worker(
    id: WorkerId,
    name: String,
    source: String,
    host: Arc<dyn HostCallbacks>,
    triggers: Receiver<()>,
) {
    let _span = info_span!("script_worker", id, name = %name).entered();
    debug!("Worker starting");

    let Some(context) = start(id, Context::builder().worker(id), &host) else {
        return;
    };
    let context = scopeguard::guard(context, |context| {
        debug!("Worker stopped");
        context.destroy();
    });

    for () in triggers.iter() {
        trace!("Worker triggered");
        match context.eval_json_with_source(&source, &name) {
            Ok(payload) => host.on_result(&name, Ok(&payload)),
            Err(e) => host.on_result(&name, Err(&e.to_string())),
        }
        if context.is_poisoned() {
            warn!("Worker context ran out of memory, stopping");
            break;
        }
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
