//! JSON-RPC API Layer
//!
//! Implements the JSON-RPC 2.0 server for the Ferry recovery orchestrator:
//! run triggers and cancellation, status and log queries, job and host
//! configuration.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig, RunningServer};
