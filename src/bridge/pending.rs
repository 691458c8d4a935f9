use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::debug;

use super::BridgeError;
use super::protocol::WorkerResponse;
use crate::core::AggregatedResult;

pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;
pub type Completion = oneshot::Sender<Result<AggregatedResult, BridgeError>>;

struct PendingEntry {
    completion: Completion,
    on_progress: Option<ProgressFn>,
}

/// What routing a response requires of the caller once the table lock is
/// released.
pub enum Delivery {
    Progress(ProgressFn, f64),
    Settle(Completion, Result<AggregatedResult, BridgeError>),
    Ignored,
}

impl Delivery {
    pub fn deliver(self) {
        match self {
            Delivery::Progress(on_progress, progress) => on_progress(progress),
            Delivery::Settle(completion, outcome) => {
                // The caller may have dropped its future; nothing to do then.
                let _ = completion.send(outcome);
            }
            Delivery::Ignored => {}
        }
    }
}

/// Correlation table of outstanding requests, keyed by request id.
#[derive(Default)]
pub struct PendingTable {
    entries: HashMap<String, PendingEntry>,
}

impl PendingTable {
    pub fn register(
        &mut self,
        request_id: String,
        completion: Completion,
        on_progress: Option<ProgressFn>,
    ) {
        self.entries.insert(
            request_id,
            PendingEntry {
                completion,
                on_progress,
            },
        );
    }

    pub fn remove(&mut self, request_id: &str) -> bool {
        self.entries.remove(request_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Progress keeps the entry; completion and error remove it.
    pub fn route(&mut self, response: WorkerResponse) -> Delivery {
        match response {
            WorkerResponse::Progress {
                request_id,
                progress,
            } => match self.entries.get(&request_id) {
                Some(entry) => match &entry.on_progress {
                    Some(on_progress) => Delivery::Progress(on_progress.clone(), progress),
                    None => Delivery::Ignored,
                },
                None => Self::stale(&request_id),
            },
            WorkerResponse::Complete { request_id, result } => {
                match self.entries.remove(&request_id) {
                    Some(entry) => Delivery::Settle(entry.completion, Ok(*result)),
                    None => Self::stale(&request_id),
                }
            }
            WorkerResponse::Error {
                request_id,
                message,
            } => match self.entries.remove(&request_id) {
                Some(entry) => {
                    Delivery::Settle(entry.completion, Err(BridgeError::Simulation(message)))
                }
                None => Self::stale(&request_id),
            },
        }
    }

    /// Empties the table, returning every outstanding completion paired with
    /// `error`.
    pub fn reject_all(&mut self, error: BridgeError) -> Vec<Delivery> {
        self.entries
            .drain()
            .map(|(_, entry)| Delivery::Settle(entry.completion, Err(error.clone())))
            .collect()
    }

    fn stale(request_id: &str) -> Delivery {
        debug!(request_id, "ignoring response for unknown request");
        Delivery::Ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Outcome = Result<AggregatedResult, BridgeError>;

    fn register(table: &mut PendingTable, id: &str) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        table.register(id.to_string(), tx, None);
        rx
    }

    #[test]
    fn progress_invokes_callback_without_settling() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let (tx, mut rx) = oneshot::channel();
        let mut table = PendingTable::default();
        table.register(
            "a".to_string(),
            tx,
            Some(Arc::new(move |p: f64| sink.lock().expect("lock").push(p))),
        );

        table
            .route(WorkerResponse::Progress {
                request_id: "a".to_string(),
                progress: 0.25,
            })
            .deliver();

        assert_eq!(*seen.lock().expect("lock"), vec![0.25]);
        assert_eq!(table.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn error_rejects_and_removes_entry() {
        let mut table = PendingTable::default();
        let mut rx = register(&mut table, "a");
        table
            .route(WorkerResponse::Error {
                request_id: "a".to_string(),
                message: "bad input".to_string(),
            })
            .deliver();

        assert!(table.is_empty());
        assert_eq!(
            rx.try_recv().expect("settled"),
            Err(BridgeError::Simulation("bad input".to_string()))
        );
    }

    #[test]
    fn unknown_request_ids_are_ignored() {
        let mut table = PendingTable::default();
        let _rx = register(&mut table, "a");
        let delivery = table.route(WorkerResponse::Error {
            request_id: "zzz".to_string(),
            message: "stale".to_string(),
        });
        assert!(matches!(delivery, Delivery::Ignored));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn reject_all_settles_every_entry_and_clears_table() {
        let mut table = PendingTable::default();
        let mut a = register(&mut table, "a");
        let mut b = register(&mut table, "b");
        for delivery in table.reject_all(BridgeError::Terminated) {
            delivery.deliver();
        }
        assert!(table.is_empty());
        assert_eq!(a.try_recv().expect("settled"), Err(BridgeError::Terminated));
        assert_eq!(b.try_recv().expect("settled"), Err(BridgeError::Terminated));
    }
}
