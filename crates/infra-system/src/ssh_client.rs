// SSH remote operation client
// Runs the hypervisor's backup/restore tools on remote hosts through the
// system `ssh` binary. Each call is bounded by the caller's timeout; the
// child process is killed when the call is dropped (timeout or cancel).

use async_trait::async_trait;
use regex::Regex;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use ferry_core::domain::{ArtifactRef, HostEndpoint, WorkloadKind};
use ferry_core::port::{
    BackupOutcome, BackupRequest, OpError, OpErrorKind, RemoteOperationClient, RestoreOutcome,
    RestoreRequest,
};

/// ssh reserves exit status 255 for its own failures
const SSH_FAILURE_EXIT: i32 = 255;

/// Budget for the stop/destroy of an existing restore target
const DESTROY_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct SshConfig {
    /// ssh binary
    pub program: String,
    /// Arguments placed before the ssh options (e.g. a wrapper command)
    pub program_args: Vec<String>,
    /// Key used when a host record carries none
    pub default_key_path: Option<String>,
    pub connect_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            program_args: Vec::new(),
            default_key_path: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Exit status and captured streams of one remote command
#[derive(Debug, Clone)]
struct CommandOutput {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr
    fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    fn into_error(self, message: impl Into<String>) -> OpError {
        let output = self.combined();
        let error = OpError::new(OpErrorKind::RemoteExit, message).with_output(output);
        match self.exit_code {
            Some(code) => error.with_exit_code(code),
            None => error,
        }
    }
}

pub struct SshRemoteClient {
    config: SshConfig,
}

impl SshRemoteClient {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Full argument vector for running `command` on `host`
    fn ssh_args(&self, host: &HostEndpoint, command: &str) -> Vec<String> {
        let mut args = self.config.program_args.clone();
        args.extend([
            "-p".to_string(),
            host.ssh_port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ]);
        if let Some(key) = host
            .ssh_key_path
            .as_ref()
            .or(self.config.default_key_path.as_ref())
        {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        args.push(host.ssh_target());
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }

    /// Run one command on `host` and capture its output
    async fn run(&self, host: &HostEndpoint, command: &str) -> Result<CommandOutput, OpError> {
        debug!(host = %host.host_ref, command = %command, "Running remote command");

        let child = Command::new(&self.config.program)
            .args(self.ssh_args(host, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                OpError::new(
                    OpErrorKind::Connection,
                    format!("failed to spawn {}: {}", self.config.program, e),
                )
            })?;

        let output = child.wait_with_output().await.map_err(|e| {
            OpError::new(
                OpErrorKind::Connection,
                format!("failed to wait for {}: {}", self.config.program, e),
            )
        })?;

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if result.exit_code == Some(SSH_FAILURE_EXIT) {
            return Err(OpError::new(
                OpErrorKind::Connection,
                format!("ssh to {} failed", host.ssh_target()),
            )
            .with_exit_code(SSH_FAILURE_EXIT)
            .with_output(result.combined()));
        }
        Ok(result)
    }

    /// The backup storage must already be configured on `host`
    async fn ensure_storage(&self, host: &HostEndpoint, storage_id: &str) -> Result<(), OpError> {
        let check = format!(
            "pvesm status 2>/dev/null | grep -q {}",
            shell_quote(&format!("^{} ", storage_id))
        );
        let output = self.run(host, &check).await?;
        if !output.success() {
            return Err(output.into_error(format!(
                "storage '{}' is not configured on {}",
                storage_id, host.host_ref
            )));
        }
        Ok(())
    }

    async fn backup_steps(&self, request: &BackupRequest) -> Result<BackupOutcome, OpError> {
        let options = &request.options;
        let storage_id = options.effective_storage_id(request.intermediary.datastore.as_deref());
        self.ensure_storage(&request.source, &storage_id).await?;

        let command = format!(
            "vzdump {} --mode {} --compress {} --storage {} --remove 0",
            request.workload_id,
            options.backup_mode,
            options.compression,
            shell_quote(&storage_id)
        );
        info!(
            host = %request.source.host_ref,
            workload_id = request.workload_id,
            storage = %storage_id,
            "Starting backup"
        );

        let output = self.run(&request.source, &command).await?;
        if !output.success() {
            let code = output.exit_code;
            return Err(output.into_error(format!(
                "vzdump of {} exited with {:?}",
                request.workload_id, code
            )));
        }

        let combined = output.combined();
        match parse_artifact(&combined) {
            Some(artifact) => Ok(BackupOutcome {
                artifact,
                output: combined,
            }),
            None => Err(OpError::new(
                OpErrorKind::ArtifactNotFound,
                format!(
                    "backup of {} finished but reported no artifact",
                    request.workload_id
                ),
            )
            .with_output(combined)),
        }
    }

    /// Stop and destroy an existing restore target; failures here are not fatal
    async fn clear_target(&self, host: &HostEndpoint, tool: &str, target: u32) {
        let status = match self
            .run(host, &format!("{} status {} 2>/dev/null", tool, target))
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(host = %host.host_ref, workload_id = target, error = %e, "Target status check failed");
                return;
            }
        };
        let exists = status.success()
            && (status.stdout.contains("running") || status.stdout.contains("stopped"));
        if !exists {
            return;
        }

        info!(host = %host.host_ref, workload_id = target, "Removing existing restore target");
        let destroy = format!(
            "{tool} stop {target} 2>/dev/null || true; sleep 2; {tool} destroy {target} --purge 2>/dev/null || true",
            tool = tool,
            target = target
        );
        match tokio::time::timeout(DESTROY_TIMEOUT, self.run(host, &destroy)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(host = %host.host_ref, workload_id = target, error = %e, "Destroy failed"),
            Err(_) => warn!(host = %host.host_ref, workload_id = target, "Destroy timed out"),
        }
    }

    async fn restore_steps(&self, request: &RestoreRequest) -> Result<RestoreOutcome, OpError> {
        let options = &request.options;
        let storage_id = options.effective_storage_id(request.intermediary.datastore.as_deref());
        self.ensure_storage(&request.destination, &storage_id).await?;

        let target = options.target_workload_id(request.workload_id);
        if options.overwrite_existing {
            self.clear_target(&request.destination, tool_for(request.workload_kind), target)
                .await;
        }

        let command = restore_command(request, &storage_id, target);
        info!(
            host = %request.destination.host_ref,
            artifact = %request.artifact,
            workload_id = target,
            "Starting restore"
        );

        let output = self.run(&request.destination, &command).await?;
        if !output.success() {
            let code = output.exit_code;
            return Err(output.into_error(format!(
                "restore of {} to {} exited with {:?}",
                request.artifact, target, code
            )));
        }

        Ok(RestoreOutcome {
            restored_workload_id: target,
            output: output.combined(),
        })
    }
}

#[async_trait]
impl RemoteOperationClient for SshRemoteClient {
    async fn backup(
        &self,
        request: &BackupRequest,
        timeout: Duration,
    ) -> Result<BackupOutcome, OpError> {
        match tokio::time::timeout(timeout, self.backup_steps(request)).await {
            Ok(result) => result,
            Err(_) => Err(OpError::timeout(timeout)),
        }
    }

    async fn restore(
        &self,
        request: &RestoreRequest,
        timeout: Duration,
    ) -> Result<RestoreOutcome, OpError> {
        match tokio::time::timeout(timeout, self.restore_steps(request)).await {
            Ok(result) => result,
            Err(_) => Err(OpError::timeout(timeout)),
        }
    }
}

fn tool_for(kind: WorkloadKind) -> &'static str {
    match kind {
        WorkloadKind::FullVirtualization => "qm",
        WorkloadKind::Container => "pct",
    }
}

/// Artifact references without a storage prefix live under `<storage>:backup/`
fn restore_volume(storage_id: &str, artifact: &ArtifactRef) -> String {
    if artifact.as_str().contains(':') {
        artifact.to_string()
    } else {
        format!("{}:backup/{}", storage_id, artifact)
    }
}

fn restore_command(request: &RestoreRequest, storage_id: &str, target: u32) -> String {
    let options = &request.options;
    let volume = shell_quote(&restore_volume(storage_id, &request.artifact));
    let mut command = match request.workload_kind {
        WorkloadKind::FullVirtualization => format!("qmrestore {} {}", volume, target),
        WorkloadKind::Container => format!("pct restore {} {}", target, volume),
    };
    if let Some(storage) = &options.destination_storage {
        command.push_str(&format!(" --storage {}", shell_quote(storage)));
    }
    if options.unique_identity {
        command.push_str(" --unique");
    }
    if options.start_after_restore {
        command.push_str(" --start");
    }
    command
}

fn artifact_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"backup '(.+?)' successful",
            r"creating (?:vzdump|Proxmox Backup Server) archive '(.+?)'",
            r"backup-id: '?([^'\n]+)'?",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Extract the artifact reference from backup tool output
pub fn parse_artifact(output: &str) -> Option<ArtifactRef> {
    artifact_patterns().iter().find_map(|re| {
        re.captures(output)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .map(ArtifactRef::new)
    })
}

/// Single-quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
