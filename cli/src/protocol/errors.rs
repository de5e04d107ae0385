//! Standard and application JSON-RPC 2.0 error codes.

/// Invalid JSON was received by the server.
pub const PARSE_ERROR: i64 = -32700;

/// The JSON sent is not a valid Request object.
pub const INVALID_REQUEST: i64 = -32600;

/// The method does not exist / is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Invalid method parameter(s).
pub const INVALID_PARAMS: i64 = -32602;

/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;

// Application error codes.

/// A request with the same id is still queued or running.
pub const DUPLICATE_OPERATION_ID: i64 = -32001;

/// The scheduler no longer accepts requests.
pub const SCHEDULER_SHUT_DOWN: i64 = -32002;
