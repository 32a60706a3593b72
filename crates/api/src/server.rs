#![forbid(unsafe_code)]

use crate::jsonrpc::{
    JsonRpcRequest, json_rpc_error, json_rpc_error_with_kind, json_rpc_response,
};
use serde_json::{Value, json};
use tl_storage::{SqliteStore, StoreError};

pub(crate) const PROTOCOL_VERSION: &str = "2024-11-05";
pub(crate) const SERVER_NAME: &str = "traceledger-api";
pub(crate) const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct ApiServerConfig {
    pub default_workspace: Option<String>,
}

pub struct ApiServer {
    pub(crate) initialized: bool,
    pub(crate) store: SqliteStore,
    pub(crate) default_workspace: Option<String>,
}

impl ApiServer {
    pub fn new(store: SqliteStore, config: ApiServerConfig) -> Self {
        Self {
            initialized: false,
            store,
            default_workspace: config.default_workspace,
        }
    }

    pub fn handle(&mut self, request: JsonRpcRequest) -> Option<Value> {
        let method = request.method.as_str();
        let expects_response = !matches!(request.id.as_ref(), None | Some(Value::Null));

        if method == "initialize" {
            // Some clients are strict about the server echoing their declared
            // protocol version; reflect it back when present.
            let protocol_version = request
                .params
                .as_ref()
                .and_then(|v| v.get("protocolVersion"))
                .and_then(|v| v.as_str())
                .unwrap_or(PROTOCOL_VERSION);
            self.initialized = true;
            return Some(json_rpc_response(
                request.id,
                json!({
                    "protocolVersion": protocol_version,
                    "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION },
                    "capabilities": { "tools": {} }
                }),
            ));
        }

        if method == "notifications/initialized" || method == "initialized" {
            self.initialized = true;
            return None;
        }

        if !self.initialized {
            // Tolerate client startup races: the first real request
            // auto-initializes instead of failing with a state error.
            if expects_response {
                self.initialized = true;
            } else {
                return None;
            }
        }

        if method == "ping" {
            return Some(json_rpc_response(request.id, json!({})));
        }

        let params = request.params.unwrap_or(Value::Null);
        match self.dispatch(method, &params) {
            Some(Ok(result)) => Some(json_rpc_response(request.id, result)),
            Some(Err(err)) => Some(err.into_response(request.id)),
            None => {
                if expects_response {
                    Some(json_rpc_error(
                        request.id,
                        -32601,
                        &format!("Method not found: {method}"),
                    ))
                } else {
                    None
                }
            }
        }
    }
}

pub(crate) enum ApiError {
    Invalid(String),
    NotFound(String),
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl ApiError {
    pub(crate) fn into_response(self, id: Option<Value>) -> Value {
        match self {
            ApiError::Invalid(message) => {
                json_rpc_error_with_kind(id, -32602, "INVALID_INPUT", &message)
            }
            ApiError::NotFound(message) => {
                json_rpc_error_with_kind(id, -32004, "NOT_FOUND", &message)
            }
            ApiError::Store(err) => {
                let (code, kind) = match &err {
                    StoreError::InvalidInput(_) => (-32602, "INVALID_INPUT"),
                    StoreError::UnknownRun
                    | StoreError::UnknownMove
                    | StoreError::UnknownToolRun
                    | StoreError::UnknownNode => (-32004, "NOT_FOUND"),
                    StoreError::CurrentVersionConflict { .. }
                    | StoreError::ToolRunClosed { .. } => (-32009, "CONFLICT"),
                    StoreError::ProvenanceMissing => (-32010, "PROVENANCE_MISSING"),
                    StoreError::DanglingReference { .. } => (-32011, "DANGLING_REFERENCE"),
                    StoreError::Io(_) | StoreError::Sql(_) => (-32603, "INTERNAL"),
                };
                json_rpc_error_with_kind(id, code, kind, &err.to_string())
            }
        }
    }
}
