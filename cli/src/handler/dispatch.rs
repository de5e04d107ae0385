use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use sc64deck_core::errors::SchedulerError;
use sc64deck_core::models::OperationRequest;
use sc64deck_core::runner::{CommandRunner, ProcessRunner};
use sc64deck_core::scheduler::OperationScheduler;

use crate::protocol::errors;
use crate::protocol::messages::{JsonRpcErrorResponse, JsonRpcRequest, JsonRpcResponse};
use crate::protocol::methods::{
    HealthCheckResult, OpCancelResult, OpIdParams, OpStateResult, OpSubmitResult,
};

/// Routes JSON-RPC requests to the operation scheduler.
pub struct Dispatcher<R: CommandRunner + 'static = ProcessRunner> {
    scheduler: OperationScheduler<R>,
    start_time: Instant,
}

/// The result of dispatching a request: either a success or error response.
pub enum DispatchResult {
    Success(JsonRpcResponse),
    Error(JsonRpcErrorResponse),
}

impl DispatchResult {
    /// Serialize the result to a JSON `Value`.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        match self {
            Self::Success(resp) => serde_json::to_value(resp),
            Self::Error(resp) => serde_json::to_value(resp),
        }
    }
}

fn success<T: Serialize>(id: Value, result: &T) -> DispatchResult {
    match serde_json::to_value(result) {
        Ok(value) => DispatchResult::Success(JsonRpcResponse::new(id, value)),
        Err(e) => DispatchResult::Error(JsonRpcErrorResponse::new(
            id,
            errors::INTERNAL_ERROR,
            format!("Failed to serialize result: {e}"),
        )),
    }
}

fn invalid_params(id: Value, method: &str, e: serde_json::Error) -> DispatchResult {
    DispatchResult::Error(JsonRpcErrorResponse::new(
        id,
        errors::INVALID_PARAMS,
        format!("Invalid {method} params: {e}"),
    ))
}

impl<R: CommandRunner + 'static> Dispatcher<R> {
    pub fn new(scheduler: OperationScheduler<R>) -> Self {
        Self {
            scheduler,
            start_time: Instant::now(),
        }
    }

    /// Dispatch a parsed JSON-RPC request to the appropriate handler.
    pub async fn dispatch(&mut self, request: JsonRpcRequest) -> DispatchResult {
        debug!("Dispatching method: {}", request.method);

        match request.method.as_str() {
            "op.submit" => self.handle_submit(request),
            "op.cancel" => self.handle_cancel(request),
            "op.state" => self.handle_state(request),
            "health.check" => self.handle_health_check(request).await,
            method => {
                warn!("Unknown method: {}", method);
                DispatchResult::Error(JsonRpcErrorResponse::new(
                    request.id.clone(),
                    errors::METHOD_NOT_FOUND,
                    format!("Method not found: {method}"),
                ))
            }
        }
    }

    fn handle_submit(&self, request: JsonRpcRequest) -> DispatchResult {
        let id = request.id;
        let params: OperationRequest = match serde_json::from_value(request.params) {
            Ok(p) => p,
            Err(e) => return invalid_params(id, "op.submit", e),
        };

        match self.scheduler.submit(params) {
            Ok(op_id) => success(id, &OpSubmitResult { id: op_id }),
            Err(SchedulerError::DuplicateId(op_id)) => DispatchResult::Error(
                JsonRpcErrorResponse::new(
                    id,
                    errors::DUPLICATE_OPERATION_ID,
                    "An operation with this id is still in flight",
                )
                .with_data(json!({ "id": op_id })),
            ),
            Err(SchedulerError::ShutDown) => DispatchResult::Error(JsonRpcErrorResponse::new(
                id,
                errors::SCHEDULER_SHUT_DOWN,
                "Scheduler is shutting down",
            )),
        }
    }

    fn handle_cancel(&self, request: JsonRpcRequest) -> DispatchResult {
        let id = request.id;
        let params: OpIdParams = match serde_json::from_value(request.params) {
            Ok(p) => p,
            Err(e) => return invalid_params(id, "op.cancel", e),
        };
        let cancelled = self.scheduler.cancel(&params.id);
        success(id, &OpCancelResult { cancelled })
    }

    fn handle_state(&self, request: JsonRpcRequest) -> DispatchResult {
        let id = request.id;
        let params: OpIdParams = match serde_json::from_value(request.params) {
            Ok(p) => p,
            Err(e) => return invalid_params(id, "op.state", e),
        };
        let state = self.scheduler.state(&params.id);
        success(id, &OpStateResult { state })
    }

    async fn handle_health_check(&self, request: JsonRpcRequest) -> DispatchResult {
        let executable = &self.scheduler.client().config().executable;
        let executable_present = tokio::fs::metadata(executable)
            .await
            .is_ok_and(|m| m.is_file());

        let result = HealthCheckResult {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            active_workers: self.scheduler.active_workers(),
            executable: executable.display().to_string(),
            executable_present,
        };
        success(request.id, &result)
    }
}
