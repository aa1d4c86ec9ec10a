//! JSON-RPC Server
//!
//! Serves the versioned `run.*`, `job.*` and `host.*` methods over HTTP.

use crate::handler::RpcHandler;
use crate::types::{
    CancelRunParams, JobIdParams, RunListParams, RunLogParams, RunReportParams,
    RunRequestParams, UpdateJobParams, UpsertHostParams,
};
use ferry_core::application::CreateJobRequest;
use ferry_core::error::AppError;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
pub const DEFAULT_RPC_PORT: u16 = 9640;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// A started server and the address it is bound to
pub struct RunningServer {
    pub addr: SocketAddr,
    pub handle: ServerHandle,
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

// Registers a method whose params deserialize into `$params`.
macro_rules! register {
    ($module:expr, $handler:expr, $name:literal, $params:ty, $method:ident) => {{
        let handler = $handler.clone();
        $module
            .register_async_method($name, move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: $params = params.parse()?;
                    handler.$method(req).await
                }
            })
            .map_err(|e| AppError::Internal(e.to_string()))?;
    }};
    ($module:expr, $handler:expr, $name:literal, $method:ident) => {{
        let handler = $handler.clone();
        $module
            .register_async_method($name, move |_, _, _| {
                let handler = handler.clone();
                async move { handler.$method().await }
            })
            .map_err(|e| AppError::Internal(e.to_string()))?;
    }};
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, handler: RpcHandler) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
        }
    }

    fn module(&self) -> Result<RpcModule<()>, AppError> {
        let mut module = RpcModule::new(());
        let handler = &self.handler;

        register!(module, handler, "run.request.v1", RunRequestParams, request_run);
        register!(module, handler, "run.cancel.v1", CancelRunParams, cancel_run);
        register!(module, handler, "run.log.v1", RunLogParams, run_log);
        register!(module, handler, "run.list.v1", RunListParams, list_runs);
        register!(module, handler, "run.report.v1", RunReportParams, run_report);

        register!(module, handler, "job.status.v1", JobIdParams, job_status);
        register!(module, handler, "job.create.v1", CreateJobRequest, create_job);
        register!(module, handler, "job.update.v1", UpdateJobParams, update_job);
        register!(module, handler, "job.get.v1", JobIdParams, get_job);
        register!(module, handler, "job.list.v1", list_jobs);
        register!(module, handler, "job.delete.v1", JobIdParams, delete_job);

        register!(module, handler, "host.upsert.v1", UpsertHostParams, upsert_host);
        register!(module, handler, "host.list.v1", list_hosts);

        Ok(module)
    }

    /// Start the JSON-RPC server
    ///
    /// Port 0 binds an ephemeral port; the bound address is returned.
    pub async fn start(self) -> Result<RunningServer, AppError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let module = self.module()?;

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| AppError::Config(format!("Failed to bind RPC server on {}: {}", addr, e)))?;
        let local_addr = server.local_addr().map_err(AppError::Io)?;

        let handle = server.start(module);
        info!(addr = %local_addr, "JSON-RPC server started");

        Ok(RunningServer {
            addr: local_addr,
            handle,
        })
    }
}
