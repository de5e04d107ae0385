use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use sc64deck_core::models::{OperationEvent, OperationId, OperationState};

use super::messages::JsonRpcNotification;

// ── op.submit ───────────────────────────────────────────────────────
// Params are an `OperationRequest`.

#[derive(Debug, Clone, Serialize)]
pub struct OpSubmitResult {
    pub id: OperationId,
}

// ── op.cancel / op.state ────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct OpIdParams {
    pub id: OperationId,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpCancelResult {
    pub cancelled: bool,
}

/// `state` is `null` once a request has finished or was never submitted.
#[derive(Debug, Clone, Serialize)]
pub struct OpStateResult {
    pub state: Option<OperationState>,
}

// ── health.check ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_workers: usize,
    pub executable: String,
    pub executable_present: bool,
}

// ── notifications ───────────────────────────────────────────────────

pub const OP_STARTED: &str = "op.started";
pub const OP_PROGRESS: &str = "op.progress";
pub const OP_FINISHED: &str = "op.finished";

/// Map a scheduler event to the notification sent to the client.
pub fn event_notification(event: &OperationEvent) -> JsonRpcNotification {
    match event {
        OperationEvent::Started { id, kind } => {
            JsonRpcNotification::new(OP_STARTED, json!({ "id": id, "kind": kind }))
        }
        OperationEvent::Progress { id, progress } => JsonRpcNotification::new(
            OP_PROGRESS,
            json!({ "id": id, "bytes": progress.bytes, "total": progress.total }),
        ),
        OperationEvent::Finished { id, result } => JsonRpcNotification::new(
            OP_FINISHED,
            json!({ "id": id, "result": to_value_or_null(result) }),
        ),
    }
}

fn to_value_or_null<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc64deck_core::errors::{ErrorKind, OperationError};
    use sc64deck_core::models::{OperationKind, OperationResult, TransferProgress};

    #[test]
    fn started_notification() {
        let n = event_notification(&OperationEvent::Started {
            id: OperationId::from("op-1"),
            kind: OperationKind::Upload,
        });
        assert_eq!(n.method, "op.started");
        assert_eq!(n.params, json!({"id": "op-1", "kind": "upload"}));
    }

    #[test]
    fn progress_notification_is_flat() {
        let n = event_notification(&OperationEvent::Progress {
            id: OperationId::from("op-1"),
            progress: TransferProgress {
                bytes: 512,
                total: None,
            },
        });
        assert_eq!(n.method, "op.progress");
        assert_eq!(n.params, json!({"id": "op-1", "bytes": 512, "total": null}));
    }

    #[test]
    fn finished_notification_carries_error() {
        let n = event_notification(&OperationEvent::Finished {
            id: OperationId::from("op-2"),
            result: OperationResult::Failed {
                error: OperationError::new(ErrorKind::NotFound, "Error: No such file"),
            },
        });
        assert_eq!(n.method, "op.finished");
        assert_eq!(n.params["result"]["status"], "failed");
        assert_eq!(n.params["result"]["error"]["kind"], "notFound");
        assert_eq!(n.params["result"]["error"]["message"], "Error: No such file");
    }

    #[test]
    fn health_result_is_camel_case() {
        let v = serde_json::to_value(HealthCheckResult {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            uptime_secs: 5,
            active_workers: 2,
            executable: "/opt/sc64deployer".to_string(),
            executable_present: true,
        })
        .unwrap();
        assert_eq!(v["uptimeSecs"], 5);
        assert_eq!(v["activeWorkers"], 2);
        assert_eq!(v["executablePresent"], true);
    }

    #[test]
    fn id_params_accept_strings() {
        let p: OpIdParams = serde_json::from_value(json!({"id": "op-9"})).unwrap();
        assert_eq!(p.id.as_str(), "op-9");
    }
}
