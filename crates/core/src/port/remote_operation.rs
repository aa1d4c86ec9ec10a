// Remote Operation Client Port
// Executes backup and restore commands against remote hosts. No retry logic
// of its own; enforces the caller-supplied timeout per call.

use crate::domain::{ArtifactRef, HostEndpoint, TransferOptions, WorkloadId, WorkloadKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Machine-readable failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpErrorKind {
    /// Host unreachable or ssh failed before the command ran
    Connection,
    /// Remote command exited non-zero
    RemoteExit,
    Timeout,
    /// Backup succeeded but no artifact reference could be found
    ArtifactNotFound,
}

impl std::fmt::Display for OpErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpErrorKind::Connection => write!(f, "CONNECTION"),
            OpErrorKind::RemoteExit => write!(f, "REMOTE_EXIT"),
            OpErrorKind::Timeout => write!(f, "TIMEOUT"),
            OpErrorKind::ArtifactNotFound => write!(f, "ARTIFACT_NOT_FOUND"),
        }
    }
}

/// Remote operation failure with raw captured output
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct OpError {
    pub kind: OpErrorKind,
    pub message: String,
    pub exit_code: Option<i32>,
    pub output: String,
}

impl OpError {
    pub fn new(kind: OpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            exit_code: None,
            output: String::new(),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            OpErrorKind::Timeout,
            format!("operation timed out after {}s", after.as_secs()),
        )
    }
}

#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub source: HostEndpoint,
    pub intermediary: HostEndpoint,
    pub workload_id: WorkloadId,
    pub workload_kind: WorkloadKind,
    pub options: TransferOptions,
}

#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub artifact: ArtifactRef,
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub intermediary: HostEndpoint,
    pub destination: HostEndpoint,
    pub artifact: ArtifactRef,
    pub workload_id: WorkloadId,
    pub workload_kind: WorkloadKind,
    pub options: TransferOptions,
}

#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub restored_workload_id: WorkloadId,
    pub output: String,
}

#[async_trait]
pub trait RemoteOperationClient: Send + Sync {
    /// Back up a workload from its source host into the intermediary store
    ///
    /// # Errors
    /// - `OpErrorKind::Timeout` if the call exceeds `timeout`
    /// - `OpErrorKind::ArtifactNotFound` if no artifact reference was produced
    async fn backup(
        &self,
        request: &BackupRequest,
        timeout: Duration,
    ) -> Result<BackupOutcome, OpError>;

    /// Restore an artifact from the intermediary store onto the destination
    async fn restore(
        &self,
        request: &RestoreRequest,
        timeout: Duration,
    ) -> Result<RestoreOutcome, OpError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted result of one remote call
    #[derive(Debug, Clone)]
    pub enum Scripted {
        /// Succeed (backup returns this artifact; ignored for restore)
        Succeed(String),
        Fail(OpErrorKind, String),
        /// Never return; only the timeout or the caller can end the call
        Hang,
        /// Panic inside the call
        Panic(String),
    }

    /// Remote client replaying scripted outcomes and recording every call
    pub struct ScriptedRemoteClient {
        backups: Mutex<VecDeque<Scripted>>,
        restores: Mutex<VecDeque<Scripted>>,
        default_backup: Scripted,
        default_restore: Scripted,
        latency: Duration,
        backup_calls: Mutex<Vec<BackupRequest>>,
        restore_calls: Mutex<Vec<RestoreRequest>>,
    }

    impl ScriptedRemoteClient {
        /// Every call succeeds; backups return `artifact`
        pub fn succeeding(artifact: impl Into<String>) -> Self {
            Self {
                backups: Mutex::new(VecDeque::new()),
                restores: Mutex::new(VecDeque::new()),
                default_backup: Scripted::Succeed(artifact.into()),
                default_restore: Scripted::Succeed(String::new()),
                latency: Duration::ZERO,
                backup_calls: Mutex::new(Vec::new()),
                restore_calls: Mutex::new(Vec::new()),
            }
        }

        /// Outcome once the backup queue is exhausted
        pub fn with_default_backup(mut self, outcome: Scripted) -> Self {
            self.default_backup = outcome;
            self
        }

        pub fn with_default_restore(mut self, outcome: Scripted) -> Self {
            self.default_restore = outcome;
            self
        }

        /// Queue outcomes for the next backup calls, in order
        pub fn then_backup(self, outcome: Scripted) -> Self {
            self.backups.lock().unwrap().push_back(outcome);
            self
        }

        pub fn then_restore(self, outcome: Scripted) -> Self {
            self.restores.lock().unwrap().push_back(outcome);
            self
        }

        /// Delay every call by `latency` (still bounded by the timeout)
        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        pub fn backup_calls(&self) -> Vec<BackupRequest> {
            self.backup_calls.lock().unwrap().clone()
        }

        pub fn restore_calls(&self) -> Vec<RestoreRequest> {
            self.restore_calls.lock().unwrap().clone()
        }

        async fn play(&self, outcome: Scripted, timeout: Duration) -> Result<String, OpError> {
            let latency = self.latency;
            let work = async move {
                tokio::time::sleep(latency).await;
                match outcome {
                    Scripted::Succeed(value) => Ok(value),
                    Scripted::Fail(kind, message) => Err(OpError::new(kind, message.clone())
                        .with_exit_code(1)
                        .with_output(format!("ERROR: {}", message))),
                    Scripted::Hang => std::future::pending().await,
                    Scripted::Panic(message) => panic!("{}", message),
                }
            };
            match tokio::time::timeout(timeout, work).await {
                Ok(result) => result,
                Err(_) => Err(OpError::timeout(timeout)),
            }
        }
    }

    #[async_trait]
    impl RemoteOperationClient for ScriptedRemoteClient {
        async fn backup(
            &self,
            request: &BackupRequest,
            timeout: Duration,
        ) -> Result<BackupOutcome, OpError> {
            self.backup_calls.lock().unwrap().push(request.clone());
            let outcome = self
                .backups
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.default_backup.clone());

            let artifact = self.play(outcome, timeout).await?;
            Ok(BackupOutcome {
                output: format!("INFO: backup '{}' successful", artifact),
                artifact: ArtifactRef::new(artifact),
            })
        }

        async fn restore(
            &self,
            request: &RestoreRequest,
            timeout: Duration,
        ) -> Result<RestoreOutcome, OpError> {
            self.restore_calls.lock().unwrap().push(request.clone());
            let outcome = self
                .restores
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.default_restore.clone());

            self.play(outcome, timeout).await?;
            Ok(RestoreOutcome {
                restored_workload_id: request.options.target_workload_id(request.workload_id),
                output: format!("restore of {} finished", request.artifact),
            })
        }
    }
}
