use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Approved,
    Denied,
}

/// Suspended permission decisions awaiting the host, each bounded by a
/// timeout that resolves to [`PermissionDecision::Denied`].
#[derive(Debug)]
pub struct PermissionGate {
    timeout: Duration,
    pending: Mutex<HashMap<String, oneshot::Sender<PermissionDecision>>>,
}

impl PermissionGate {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn open(&self) -> (String, oneshot::Receiver<PermissionDecision>) {
        let request_id = format!("perm-{}", Uuid::new_v4().simple());
        let (tx, rx) = oneshot::channel();
        self.lock().insert(request_id.clone(), tx);
        (request_id, rx)
    }

    pub(crate) async fn wait(
        &self,
        request_id: &str,
        decision: oneshot::Receiver<PermissionDecision>,
    ) -> PermissionDecision {
        match tokio::time::timeout(self.timeout, decision).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) => PermissionDecision::Denied,
            Err(_) => {
                self.lock().remove(request_id);
                warn!(request_id, timeout_secs = self.timeout.as_secs(), "Permission request timed out, denying");
                PermissionDecision::Denied
            }
        }
    }

    /// Answer a pending request. Returns false for unknown or expired ids.
    pub fn respond(&self, request_id: &str, approved: bool) -> bool {
        let Some(sender) = self.lock().remove(request_id) else {
            debug!(request_id, "No pending permission request");
            return false;
        };
        let decision = if approved {
            PermissionDecision::Approved
        } else {
            PermissionDecision::Denied
        };
        sender.send(decision).is_ok()
    }

    pub fn deny_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        for (_, sender) in drained {
            let _ = sender.send(PermissionDecision::Denied);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<PermissionDecision>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn approval_reaches_the_waiter() {
        let gate = PermissionGate::new(Duration::from_secs(300));
        let (id, rx) = gate.open();
        assert!(gate.respond(&id, true));
        assert_eq!(gate.wait(&id, rx).await, PermissionDecision::Approved);
        assert!(!gate.respond(&id, true));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_is_denied_after_timeout() {
        let gate = PermissionGate::new(Duration::from_secs(300));
        let (id, rx) = gate.open();
        assert_eq!(gate.wait(&id, rx).await, PermissionDecision::Denied);
        assert_eq!(gate.pending_count(), 0);
        assert!(!gate.respond(&id, true));
    }

    #[tokio::test]
    async fn deny_all_releases_waiters() {
        let gate = PermissionGate::new(Duration::from_secs(300));
        let (id, rx) = gate.open();
        assert_eq!(gate.deny_all(), 1);
        assert_eq!(gate.wait(&id, rx).await, PermissionDecision::Denied);
    }
}
