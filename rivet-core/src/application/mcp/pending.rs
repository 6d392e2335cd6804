use super::error::ProviderError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

pub(crate) type Reply = Result<Value, ProviderError>;

/// Requests awaiting a correlated response, keyed by request id.
///
/// Each entry resolves at most once: whichever of response, timeout or
/// disconnect removes it first wins, later attempts find nothing.
#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    entries: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
}

impl PendingRequests {
    pub(crate) fn register(&self, id: u64) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        rx
    }

    /// Deliver `reply` to the request `id`. Returns false when no such
    /// request is waiting.
    pub(crate) fn resolve(&self, id: u64, reply: Reply) -> bool {
        match self.lock().remove(&id) {
            Some(sender) => {
                // The waiter may have given up already; that is not an error.
                let _ = sender.send(reply);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Reject every waiting request with an error built by `error`.
    pub(crate) fn reject_all(&self, error: impl Fn() -> ProviderError) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        for (_, sender) in drained {
            let _ = sender.send(Err(error()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn disconnected() -> ProviderError {
        ProviderError::Disconnected {
            provider: "p".into(),
        }
    }

    #[tokio::test]
    async fn resolves_registered_request_once() {
        let pending = PendingRequests::default();
        let rx = pending.register(1);
        assert!(pending.resolve(1, Ok(json!({"ok": true}))));
        assert!(!pending.resolve(1, Ok(json!({"late": true}))));
        let reply = rx.await.expect("reply").expect("success");
        assert_eq!(reply, json!({"ok": true}));
    }

    #[test]
    fn unknown_id_is_ignored() {
        let pending = PendingRequests::default();
        let _rx = pending.register(5);
        assert!(!pending.resolve(99, Ok(Value::Null)));
        assert_eq!(pending.ids(), vec![5]);
    }

    #[tokio::test]
    async fn reject_all_empties_the_table() {
        let pending = PendingRequests::default();
        let first = pending.register(1);
        let second = pending.register(2);
        assert_eq!(pending.reject_all(disconnected), 2);
        assert_eq!(pending.len(), 0);
        assert!(matches!(
            first.await.expect("reply"),
            Err(ProviderError::Disconnected { .. })
        ));
        assert!(matches!(
            second.await.expect("reply"),
            Err(ProviderError::Disconnected { .. })
        ));
    }

    #[test]
    fn removed_entry_cannot_be_resolved() {
        let pending = PendingRequests::default();
        let _rx = pending.register(3);
        assert!(pending.remove(3));
        assert!(!pending.remove(3));
        assert!(!pending.resolve(3, Ok(Value::Null)));
    }
}
