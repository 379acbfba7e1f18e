//! Configuration types for the jsbridge runtime.
//!
//! [`EngineConfig`] is handed to [`crate::init`] once per process. It can be
//! built in code, deserialized with serde, or read from `JSBRIDGE_*`
//! environment variables.

use serde::{Deserialize, Serialize};

use crate::error::{RuntimeError, RuntimeResult};

/// Default heap ceiling for contexts created directly by the host (2 GiB)
pub const DEFAULT_MEMORY_LIMIT: usize = 2 << 30;

/// Default heap ceiling for worker contexts (256 MiB)
pub const DEFAULT_WORKER_MEMORY_LIMIT: usize = 256 << 20;

/// Process-wide engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Heap ceiling in bytes for host-created contexts.
    /// `None` disables the limit.
    pub memory_limit: Option<usize>,

    /// Heap ceiling in bytes for worker contexts.
    pub worker_memory_limit: Option<usize>,

    /// Maximum native stack the engine may use while evaluating.
    pub max_stack_size: Option<usize>,

    /// Allocation volume after which the engine runs its collector.
    pub gc_threshold: Option<usize>,

    /// Number of workers in a [`crate::ContextPool`] built with
    /// [`crate::ContextPool::with_default_size`].
    /// Default: number of CPU cores
    pub pool_size: usize,

    /// Stack size of spawned worker threads. `None` keeps the platform default.
    pub worker_stack_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_limit: Some(DEFAULT_MEMORY_LIMIT),
            worker_memory_limit: Some(DEFAULT_WORKER_MEMORY_LIMIT),
            max_stack_size: None,
            gc_threshold: None,
            pool_size: num_cpus::get().max(1),
            worker_stack_size: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `JSBRIDGE_*` environment variables.
    ///
    /// Recognized: `JSBRIDGE_MEMORY_LIMIT`, `JSBRIDGE_WORKER_MEMORY_LIMIT`,
    /// `JSBRIDGE_MAX_STACK_SIZE`, `JSBRIDGE_GC_THRESHOLD`, `JSBRIDGE_POOL_SIZE`
    /// and `JSBRIDGE_WORKER_STACK_SIZE`. A value of `0` or `none` clears an
    /// optional limit.
    pub fn from_env() -> RuntimeResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Same as [`EngineConfig::from_env`] over an explicit variable list
    pub fn from_vars<I, K, V>(vars: I) -> RuntimeResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let value = value.as_ref().trim();
            match key.as_ref() {
                "JSBRIDGE_MEMORY_LIMIT" => config.memory_limit = parse_limit(key.as_ref(), value)?,
                "JSBRIDGE_WORKER_MEMORY_LIMIT" => {
                    config.worker_memory_limit = parse_limit(key.as_ref(), value)?
                }
                "JSBRIDGE_MAX_STACK_SIZE" => {
                    config.max_stack_size = parse_limit(key.as_ref(), value)?
                }
                "JSBRIDGE_GC_THRESHOLD" => config.gc_threshold = parse_limit(key.as_ref(), value)?,
                "JSBRIDGE_WORKER_STACK_SIZE" => {
                    config.worker_stack_size = parse_limit(key.as_ref(), value)?
                }
                "JSBRIDGE_POOL_SIZE" => {
                    config.pool_size = parse_size(key.as_ref(), value)?.max(1);
                }
                _ => {}
            }
        }
        Ok(config)
    }

    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> RuntimeResult<Self> {
        serde_json::from_str(json).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    /// Set the heap ceiling for host-created contexts.
    pub fn memory_limit(mut self, bytes: impl Into<Option<usize>>) -> Self {
        self.memory_limit = bytes.into();
        self
    }

    /// Set the heap ceiling for worker contexts.
    pub fn worker_memory_limit(mut self, bytes: impl Into<Option<usize>>) -> Self {
        self.worker_memory_limit = bytes.into();
        self
    }

    pub fn max_stack_size(mut self, bytes: impl Into<Option<usize>>) -> Self {
        self.max_stack_size = bytes.into();
        self
    }

    pub fn gc_threshold(mut self, bytes: impl Into<Option<usize>>) -> Self {
        self.gc_threshold = bytes.into();
        self
    }

    /// Set the default pool size. Zero is raised to one.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    pub fn worker_stack_size(mut self, bytes: impl Into<Option<usize>>) -> Self {
        self.worker_stack_size = bytes.into();
        self
    }
}

fn parse_size(key: &str, value: &str) -> RuntimeResult<usize> {
    value
        .parse::<usize>()
        .map_err(|e| RuntimeError::Config(format!("{key}={value:?}: {e}")))
}

fn parse_limit(key: &str, value: &str) -> RuntimeResult<Option<usize>> {
    if value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    match parse_size(key, value)? {
        0 => Ok(None),
        n => Ok(Some(n)),
    }
}
