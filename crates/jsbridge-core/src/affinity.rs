//! Thread affinity of engine contexts
//!
//! A context's runtime, global object and root table may only be touched by
//! the thread that created it. Call sites check [`ThreadAffinity::check`]
//! before every operation instead of trusting the caller.

use std::thread::{self, ThreadId};

use tracing::warn;

use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone)]
pub struct ThreadAffinity {
    owner: ThreadId,
    owner_name: Option<String>,
}

impl ThreadAffinity {
    /// Bind to the calling thread
    pub fn current() -> Self {
        let current = thread::current();
        Self {
            owner: current.id(),
            owner_name: current.name().map(str::to_owned),
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn owner_name(&self) -> Option<&str> {
        self.owner_name.as_deref()
    }

    /// May the calling thread access the bound resource?
    pub fn can_access(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub fn check(&self) -> BridgeResult<()> {
        if self.can_access() {
            return Ok(());
        }
        warn!(
            owner = ?self.owner,
            owner_name = self.owner_name.as_deref().unwrap_or("<unnamed>"),
            caller = ?thread::current().id(),
            "cross-thread context access rejected"
        );
        Err(BridgeError::WrongThread)
    }
}
