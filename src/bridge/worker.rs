use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tokio::sync::mpsc::Sender;
use tracing::{debug, info, warn};

use super::protocol::{WorkerRequest, WorkerResponse};
use crate::core::{
    AggregatedResult, SimulationConfig, SimulationError, aggregate, entropy_seed, run_trials,
};

/// Starts the single background thread. Requests are served one at a time in
/// arrival order until the request channel closes or `cancel` is raised. The
/// thread blocks while `responses` is full and exits once its receiver is gone.
pub fn spawn_worker(
    requests: Receiver<WorkerRequest>,
    responses: Sender<WorkerResponse>,
    cancel: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("simulation-worker".to_string())
        .spawn(move || serve(requests, responses, &cancel))
}

fn serve(
    requests: Receiver<WorkerRequest>,
    responses: Sender<WorkerResponse>,
    cancel: &AtomicBool,
) {
    while let Ok(request) = requests.recv() {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let WorkerRequest::RunSimulation { request_id, config } = request;
        let response = execute(&request_id, &config, &responses, cancel);
        if cancel.load(Ordering::Relaxed) || responses.blocking_send(response).is_err() {
            break;
        }
    }
    debug!("simulation worker exiting");
}

fn execute(
    request_id: &str,
    config: &SimulationConfig,
    responses: &Sender<WorkerResponse>,
    cancel: &AtomicBool,
) -> WorkerResponse {
    let started = Instant::now();
    info!(
        request_id,
        simulations = config.num_simulations,
        horizon_months = config.time_horizon_months,
        "starting Monte Carlo run"
    );

    let outcome = panic::catch_unwind(AssertUnwindSafe(
        || -> Result<AggregatedResult, SimulationError> {
            let seed = config.seed.unwrap_or_else(entropy_seed);
            let trials = run_trials(config, seed, cancel, |done, total| {
                let _ = responses.blocking_send(WorkerResponse::Progress {
                    request_id: request_id.to_string(),
                    progress: done as f64 / total as f64,
                });
            })?;
            Ok(aggregate(config, seed, trials))
        },
    ))
    .unwrap_or_else(|payload| {
        Err(SimulationError::Panicked(panic_message(payload.as_ref())))
    });

    match outcome {
        Ok(result) => {
            info!(
                request_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                p50_months = result.percentiles.p50_months,
                "Monte Carlo run complete"
            );
            WorkerResponse::Complete {
                request_id: request_id.to_string(),
                result: Box::new(result),
            }
        }
        Err(err) => {
            warn!(request_id, error = %err, "Monte Carlo run failed");
            WorkerResponse::Error {
                request_id: request_id.to_string(),
                message: err.to_string(),
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use tokio::sync::mpsc::channel as response_channel;

    fn config(expenses: f64) -> SimulationConfig {
        SimulationConfig {
            liquid_balance: 100_000.0,
            monthly_expenses: expenses,
            num_simulations: 40,
            time_horizon_months: 120,
            seed: Some(8),
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn serves_requests_in_order_with_progress_before_completion() {
        let (req_tx, req_rx) = channel();
        let (resp_tx, mut resp_rx) = response_channel(128);
        let handle =
            spawn_worker(req_rx, resp_tx, Arc::new(AtomicBool::new(false))).expect("spawns");

        for (id, expenses) in [("first", 2_000.0), ("second", 4_000.0)] {
            req_tx
                .send(WorkerRequest::RunSimulation {
                    request_id: id.to_string(),
                    config: config(expenses),
                })
                .expect("sends");
        }
        drop(req_tx);
        handle.join().expect("worker exits");

        let mut responses = Vec::new();
        while let Ok(response) = resp_rx.try_recv() {
            responses.push(response);
        }

        let completions: Vec<&str> = responses
            .iter()
            .filter(|r| matches!(r, WorkerResponse::Complete { .. }))
            .map(|r| r.request_id())
            .collect();
        assert_eq!(completions, vec!["first", "second"]);

        let first_complete = responses
            .iter()
            .position(|r| matches!(r, WorkerResponse::Complete { .. }))
            .expect("completed");
        assert!(responses[..first_complete].iter().all(|r| {
            matches!(r, WorkerResponse::Progress { request_id, .. } if request_id == "first")
        }));
        assert!(matches!(
            &responses[first_complete - 1],
            WorkerResponse::Progress { progress, .. } if *progress == 1.0
        ));
    }

    #[test]
    fn invalid_config_becomes_error_response_and_worker_continues() {
        let (req_tx, req_rx) = channel();
        let (resp_tx, mut resp_rx) = response_channel(128);
        let handle =
            spawn_worker(req_rx, resp_tx, Arc::new(AtomicBool::new(false))).expect("spawns");

        let mut bad = config(1_000.0);
        bad.num_simulations = 0;
        req_tx
            .send(WorkerRequest::RunSimulation {
                request_id: "bad".to_string(),
                config: bad,
            })
            .expect("sends");
        req_tx
            .send(WorkerRequest::RunSimulation {
                request_id: "good".to_string(),
                config: config(1_000.0),
            })
            .expect("sends");
        drop(req_tx);
        handle.join().expect("worker exits");

        let first = resp_rx.try_recv().expect("response");
        assert!(matches!(
            first,
            WorkerResponse::Error { ref request_id, ref message }
                if request_id == "bad" && message.contains("numSimulations")
        ));
        let mut completed = false;
        while let Ok(response) = resp_rx.try_recv() {
            completed |= matches!(response, WorkerResponse::Complete { .. });
        }
        assert!(completed);
    }

    #[test]
    fn raised_cancel_flag_stops_serving() {
        let (req_tx, req_rx) = channel();
        let (resp_tx, mut resp_rx) = response_channel(128);
        let handle =
            spawn_worker(req_rx, resp_tx, Arc::new(AtomicBool::new(true))).expect("spawns");
        req_tx
            .send(WorkerRequest::RunSimulation {
                request_id: "ignored".to_string(),
                config: config(1_000.0),
            })
            .expect("sends");
        handle.join().expect("worker exits");
        assert!(resp_rx.try_recv().is_err());
    }

    #[test]
    fn dropped_response_receiver_stops_the_worker() {
        let (req_tx, req_rx) = channel();
        let (resp_tx, resp_rx) = response_channel(1);
        let handle =
            spawn_worker(req_rx, resp_tx, Arc::new(AtomicBool::new(false))).expect("spawns");
        drop(resp_rx);

        for id in ["first", "second"] {
            req_tx
                .send(WorkerRequest::RunSimulation {
                    request_id: id.to_string(),
                    config: config(1_000.0),
                })
                .expect("sends");
        }
        // The request channel stays open, so only the failed send ends the loop.
        handle.join().expect("worker exits");
        drop(req_tx);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload: Box<dyn Any + Send> = Box::new("exploded");
        assert_eq!(panic_message(payload.as_ref()), "exploded");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
