//! Behavior before `init` has been called
//!
//! Lives in its own test binary so no other test initializes the engine.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Sender, unbounded};
use jsbridge_runtime::{
    Context, ContextPool, HostCallbacks, HostReply, Identity, Payload, RuntimeError, Scope,
    WorkerId, is_initialized, spawn_worker,
};

struct FailureProbe {
    failures: Sender<(WorkerId, String)>,
}

impl HostCallbacks for FailureProbe {
    fn on_call(&self, _: &Scope<'_>, _: Identity, name: &str, _: &Payload) -> HostReply {
        Err(format!("{name} is not implemented"))
    }

    fn on_worker_failed(&self, worker: WorkerId, message: &str) {
        let _ = self.failures.send((worker, message.to_owned()));
    }
}

fn probe() -> (Arc<FailureProbe>, crossbeam_channel::Receiver<(WorkerId, String)>) {
    let (tx, rx) = unbounded();
    (Arc::new(FailureProbe { failures: tx }), rx)
}

#[test]
fn test_context_requires_init() {
    assert!(!is_initialized());
    let (host, _rx) = probe();
    assert!(matches!(
        Context::new(host),
        Err(RuntimeError::NotInitialized)
    ));
}

#[test]
fn test_worker_reports_failed_init() {
    let (host, rx) = probe();
    let handle = spawn_worker(5, host).unwrap();
    let (worker, message) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    handle.join().unwrap();
    assert_eq!(worker, 5);
    assert!(message.contains("not initialized"), "{message}");
}

#[test]
fn test_pool_requires_init() {
    let (host, _rx) = probe();
    assert!(matches!(
        ContextPool::new(2, host),
        Err(RuntimeError::NotInitialized)
    ));
}
