//! Process-wide engine state
//!
//! [`init`] runs once per process and must precede every context. It keeps
//! the [`EngineConfig`], the statistics counters and the id sources shared by
//! all contexts and workers.
//!
//! # Example
//!
//! ```no_run
//! use jsbridge_runtime::{EngineConfig, init};
//!
//! let engine = init(EngineConfig::from_env().unwrap()).unwrap();
//! println!("{:?}", engine.stats().snapshot());
//! ```

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use rquickjs::Runtime;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::context::ContextId;
use crate::error::{RuntimeError, RuntimeResult};
use crate::worker::WorkerId;

static ENGINE: OnceLock<Engine> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Statistics about engine operation
///
/// All counters are atomic and can be read at any time without locking.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub contexts_created: AtomicU64,
    pub contexts_destroyed: AtomicU64,
    /// Calls from script into host functions
    pub host_calls: AtomicU64,
    /// Host calls that came back as failures
    pub host_call_failures: AtomicU64,
    /// Property reads and writes routed to the host
    pub property_accesses: AtomicU64,
    pub workers_spawned: AtomicU64,
    pub workers_failed: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get snapshot of current stats
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            contexts_created: self.contexts_created.load(Ordering::Relaxed),
            contexts_destroyed: self.contexts_destroyed.load(Ordering::Relaxed),
            host_calls: self.host_calls.load(Ordering::Relaxed),
            host_call_failures: self.host_call_failures.load(Ordering::Relaxed),
            property_accesses: self.property_accesses.load(Ordering::Relaxed),
            workers_spawned: self.workers_spawned.load(Ordering::Relaxed),
            workers_failed: self.workers_failed.load(Ordering::Relaxed),
        }
    }

    /// Contexts created and not yet destroyed
    pub fn live_contexts(&self) -> u64 {
        let created = self.contexts_created.load(Ordering::Relaxed);
        let destroyed = self.contexts_destroyed.load(Ordering::Relaxed);
        created.saturating_sub(destroyed)
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of engine statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub contexts_created: u64,
    pub contexts_destroyed: u64,
    pub host_calls: u64,
    pub host_call_failures: u64,
    pub property_accesses: u64,
    pub workers_spawned: u64,
    pub workers_failed: u64,
}

impl EngineStatsSnapshot {
    /// Host call success rate as a percentage (0.0 - 100.0)
    pub fn host_call_success_rate(&self) -> f64 {
        if self.host_calls == 0 {
            100.0
        } else {
            let succeeded = self.host_calls.saturating_sub(self.host_call_failures);
            (succeeded as f64 / self.host_calls as f64) * 100.0
        }
    }
}

/// Process-wide engine state, created by [`init`]
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    stats: EngineStats,
    next_context: AtomicU32,
    next_worker: AtomicU32,
}

impl Engine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub(crate) fn next_context_id(&self) -> ContextId {
        ContextId::new(self.next_context.fetch_add(1, Ordering::Relaxed))
    }

    /// Worker ids handed out by pools and script workers
    pub fn next_worker_id(&self) -> WorkerId {
        self.next_worker.fetch_add(1, Ordering::Relaxed)
    }

    /// A fresh runtime with the configured limits applied
    pub(crate) fn new_runtime(&self, memory_limit: Option<usize>) -> RuntimeResult<Runtime> {
        let runtime = Runtime::new()?;
        if let Some(limit) = memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = self.config.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        if let Some(threshold) = self.config.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }
        Ok(runtime)
    }
}

/// Establish process-wide engine state.
///
/// Succeeds exactly once per process; later calls fail with
/// [`RuntimeError::AlreadyInitialized`] and leave the first configuration in
/// place.
pub fn init(config: EngineConfig) -> RuntimeResult<&'static Engine> {
    let _guard = INIT_LOCK.lock();
    if ENGINE.get().is_some() {
        debug!("engine init called twice");
        return Err(RuntimeError::AlreadyInitialized);
    }

    // Probe allocation: fail now rather than on the first context.
    let probe = Runtime::new().map_err(|e| RuntimeError::EngineInit(e.to_string()))?;
    drop(probe);

    info!(
        memory_limit = ?config.memory_limit,
        worker_memory_limit = ?config.worker_memory_limit,
        pool_size = config.pool_size,
        "engine initialized"
    );

    let engine = Engine {
        config,
        stats: EngineStats::new(),
        next_context: AtomicU32::new(1),
        next_worker: AtomicU32::new(1),
    };
    Ok(ENGINE.get_or_init(|| engine))
}

/// Initialize with defaults unless already initialized
pub fn init_default() -> RuntimeResult<&'static Engine> {
    match init(EngineConfig::default()) {
        Err(RuntimeError::AlreadyInitialized) => engine(),
        other => other,
    }
}

pub fn is_initialized() -> bool {
    ENGINE.get().is_some()
}

/// The initialized engine, or [`RuntimeError::NotInitialized`]
pub fn engine() -> RuntimeResult<&'static Engine> {
    ENGINE.get().ok_or(RuntimeError::NotInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_once() {
        init_default().unwrap();
        assert!(is_initialized());
        assert!(matches!(
            init(EngineConfig::default()),
            Err(RuntimeError::AlreadyInitialized)
        ));
        assert!(engine().is_ok());
    }

    #[test]
    fn test_ids_are_unique() {
        let engine = init_default().unwrap();
        let a = engine.next_context_id();
        let b = engine.next_context_id();
        assert_ne!(a, b);
        assert_ne!(engine.next_worker_id(), engine.next_worker_id());
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = EngineStats::new();
        EngineStats::bump(&stats.host_calls);
        EngineStats::bump(&stats.host_calls);
        EngineStats::bump(&stats.host_call_failures);
        EngineStats::bump(&stats.contexts_created);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.host_calls, 2);
        assert_eq!(snapshot.host_call_success_rate(), 50.0);
        assert_eq!(stats.live_contexts(), 1);
    }

    #[test]
    fn test_engine_is_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }
}
