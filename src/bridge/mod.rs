//! Background execution for Monte Carlo runs.
//!
//! An [`ExecutionBridge`] owns exactly one worker thread. Every dispatched
//! request is queued onto that thread and served in arrival order, so
//! concurrent callers share it rather than running in parallel. Responses come
//! back over a channel and are routed to the caller by correlation id from a
//! task on the caller's tokio runtime.

mod pending;
mod protocol;
mod worker;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc as async_mpsc, oneshot};
use tokio::task::JoinHandle as TaskHandle;
use tracing::{debug, info, warn};

use crate::core::{AggregatedResult, ConfigError, SimulationConfig};

/// Responses buffered between the worker and the router before the worker
/// blocks.
const RESPONSE_CAPACITY: usize = 64;

pub use pending::{Delivery, PendingTable, ProgressFn};
pub use protocol::{WorkerRequest, WorkerResponse, next_request_id};

#[derive(Clone, Debug, PartialEq, Error)]
pub enum BridgeError {
    #[error("background execution is not supported: {0}")]
    Unsupported(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("simulation failed: {0}")]
    Simulation(String),
    #[error("execution context was terminated")]
    Terminated,
}

struct ExecutionContext {
    requests: Sender<WorkerRequest>,
    cancel: Arc<AtomicBool>,
    // Never joined: a run in flight only notices `cancel` between trials.
    _worker: JoinHandle<()>,
    router: TaskHandle<()>,
}

impl ExecutionContext {
    fn establish(pending: Arc<Mutex<PendingTable>>) -> Result<Self, String> {
        let runtime = Handle::try_current()
            .map_err(|e| format!("no tokio runtime to deliver responses on: {e}"))?;

        let (request_tx, request_rx) = mpsc::channel();
        let (response_tx, response_rx) = async_mpsc::channel(RESPONSE_CAPACITY);
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = worker::spawn_worker(request_rx, response_tx, cancel.clone())
            .map_err(|e| format!("failed to spawn simulation worker thread: {e}"))?;
        let router = runtime.spawn(route_responses(response_rx, pending));

        Ok(Self {
            requests: request_tx,
            cancel,
            _worker: worker,
            router,
        })
    }

    fn shutdown(self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.router.abort();
    }
}

enum ContextState {
    Ready(ExecutionContext),
    Unsupported(String),
    Terminated,
}

async fn route_responses(
    mut responses: async_mpsc::Receiver<WorkerResponse>,
    pending: Arc<Mutex<PendingTable>>,
) {
    while let Some(response) = responses.recv().await {
        let delivery = lock(&pending).route(response);
        delivery.deliver();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ExecutionBridge {
    pending: Arc<Mutex<PendingTable>>,
    context: Mutex<ContextState>,
}

impl ExecutionBridge {
    /// Attempts to start the background context. Failure is not an error here;
    /// it is reported through [`Self::is_background_execution_supported`] and
    /// by every later [`Self::run_simulation`] call.
    pub fn new() -> Self {
        let pending = Arc::new(Mutex::new(PendingTable::default()));
        let state = match ExecutionContext::establish(pending.clone()) {
            Ok(context) => ContextState::Ready(context),
            Err(reason) => {
                warn!(%reason, "background execution unavailable");
                ContextState::Unsupported(reason)
            }
        };
        Self {
            pending,
            context: Mutex::new(state),
        }
    }

    pub fn is_background_execution_supported(&self) -> bool {
        matches!(*lock(&self.context), ContextState::Ready(_))
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Dispatches `config` immediately and returns a future for its result.
    /// Configuration errors and an unavailable context are reported through
    /// the future without dispatching anything.
    pub fn run_simulation(
        &self,
        config: SimulationConfig,
        on_progress: Option<ProgressFn>,
    ) -> impl Future<Output = Result<AggregatedResult, BridgeError>> + Send + 'static {
        let dispatched = self.dispatch(config, on_progress);
        async move {
            let receiver = dispatched?;
            receiver.await.unwrap_or(Err(BridgeError::Terminated))
        }
    }

    fn dispatch(
        &self,
        config: SimulationConfig,
        on_progress: Option<ProgressFn>,
    ) -> Result<oneshot::Receiver<Result<AggregatedResult, BridgeError>>, BridgeError> {
        config.validate()?;

        let state = lock(&self.context);
        let context = match &*state {
            ContextState::Ready(context) => context,
            ContextState::Unsupported(reason) => {
                return Err(BridgeError::Unsupported(reason.clone()));
            }
            ContextState::Terminated => return Err(BridgeError::Terminated),
        };

        let request_id = next_request_id();
        let (completion, receiver) = oneshot::channel();
        lock(&self.pending).register(request_id.clone(), completion, on_progress);
        debug!(
            %request_id,
            simulations = config.num_simulations,
            "dispatching simulation"
        );

        let request = WorkerRequest::RunSimulation {
            request_id: request_id.clone(),
            config,
        };
        if context.requests.send(request).is_err() {
            warn!(%request_id, "simulation worker is gone");
            lock(&self.pending).remove(&request_id);
            return Err(BridgeError::Terminated);
        }
        Ok(receiver)
    }

    /// Tears down the background context and rejects every pending request.
    /// The bridge stays unusable until [`Self::reinitialize`].
    pub fn terminate(&self) {
        let previous = {
            let mut state = lock(&self.context);
            match *state {
                ContextState::Ready(_) => {
                    Some(std::mem::replace(&mut *state, ContextState::Terminated))
                }
                _ => None,
            }
        };
        if let Some(ContextState::Ready(context)) = previous {
            context.shutdown();
            info!("execution context terminated");
        }

        let rejected = lock(&self.pending).reject_all(BridgeError::Terminated);
        if !rejected.is_empty() {
            info!(rejected = rejected.len(), "rejecting pending simulations");
        }
        for delivery in rejected {
            delivery.deliver();
        }
    }

    /// Replaces the current context with a fresh one. Anything still pending
    /// on the old context is rejected first.
    pub fn reinitialize(&self) -> Result<(), BridgeError> {
        self.terminate();
        let context =
            ExecutionContext::establish(self.pending.clone()).map_err(BridgeError::Unsupported)?;
        *lock(&self.context) = ContextState::Ready(context);
        info!("execution context reinitialized");
        Ok(())
    }
}

impl Default for ExecutionBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExecutionBridge {
    fn drop(&mut self) {
        self.terminate();
    }
}
