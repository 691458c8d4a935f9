//! Message envelopes exchanged with the background worker. Every response
//! carries the correlation id of the request that produced it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::core::{AggregatedResult, SimulationConfig};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerRequest {
    #[serde(rename_all = "camelCase")]
    RunSimulation {
        request_id: String,
        config: SimulationConfig,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerResponse {
    /// Fraction of trials finished, 0.0 to 1.0.
    #[serde(rename_all = "camelCase")]
    Progress { request_id: String, progress: f64 },
    #[serde(rename_all = "camelCase")]
    Complete {
        request_id: String,
        result: Box<AggregatedResult>,
    },
    #[serde(rename_all = "camelCase")]
    Error { request_id: String, message: String },
}

impl WorkerResponse {
    pub fn request_id(&self) -> &str {
        match self {
            WorkerResponse::Progress { request_id, .. }
            | WorkerResponse::Complete { request_id, .. }
            | WorkerResponse::Error { request_id, .. } => request_id,
        }
    }
}

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Timestamp, process-wide sequence number and a random suffix.
pub fn next_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let suffix: u32 = rand::random();
    format!("sim-{millis}-{sequence}-{suffix:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn request_serializes_with_kind_tag_and_camel_case_id() {
        let request = WorkerRequest::RunSimulation {
            request_id: "abc".to_string(),
            config: SimulationConfig::default(),
        };
        let json = serde_json::to_value(&request).expect("serializes");
        assert_eq!(json["kind"], "RUN_SIMULATION");
        assert_eq!(json["requestId"], "abc");
        assert_eq!(json["config"]["numSimulations"], 1_000);
        assert_eq!(json["config"]["timeHorizonMonths"], 360);
    }

    #[test]
    fn progress_and_error_responses_match_wire_shape() {
        let progress = WorkerResponse::Progress {
            request_id: "r1".to_string(),
            progress: 0.5,
        };
        assert_eq!(
            serde_json::to_value(&progress).expect("serializes"),
            serde_json::json!({ "kind": "PROGRESS", "requestId": "r1", "progress": 0.5 })
        );

        let parsed: WorkerResponse = serde_json::from_str(
            r#"{ "kind": "ERROR", "requestId": "r2", "message": "boom" }"#,
        )
        .expect("parses");
        assert_eq!(parsed.request_id(), "r2");
        assert!(matches!(parsed, WorkerResponse::Error { ref message, .. } if message == "boom"));
    }

    #[test]
    fn request_ids_are_unique() {
        let ids: HashSet<String> = (0..1_000).map(|_| next_request_id()).collect();
        assert_eq!(ids.len(), 1_000);
    }
}
