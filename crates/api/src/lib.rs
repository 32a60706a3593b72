#![forbid(unsafe_code)]

//! JSON-RPC 2.0 surface over the trace ledger, stdio-first.

mod handlers;
mod jsonrpc;
mod server;
mod stdio;
mod support;

pub use jsonrpc::{JsonRpcRequest, json_rpc_error, json_rpc_response};
pub use server::{ApiServer, ApiServerConfig};
pub use stdio::run_stdio;
