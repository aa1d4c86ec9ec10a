// Notification Gateway Port (external collaborator)

use crate::domain::phase_log::truncate_chars;
use crate::domain::{ArtifactRef, Job, Run, RunMode, TerminalStatus};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Captured output excerpt carried by a notification
pub const MAX_NOTIFICATION_EXCERPT_CHARS: usize = 500;

/// Payload pushed on a run's terminal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunNotification {
    pub job_id: String,
    pub job_name: String,
    pub run_id: String,
    pub mode: RunMode,
    pub status: TerminalStatus,
    pub source: String,
    pub destination: String,
    pub attempts: u32,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub output_excerpt: Option<String>,
    pub artifact_ref: Option<ArtifactRef>,
    pub scheduled: bool,
}

impl RunNotification {
    pub fn new(
        job: &Job,
        run: &Run,
        status: TerminalStatus,
        last_output: Option<&str>,
        now_millis: i64,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            run_id: run.id.clone(),
            mode: run.requested_mode,
            status,
            source: job.source_descriptor(),
            destination: job.destination_descriptor(),
            attempts: run.attempt,
            duration_ms: run.total_duration_ms(now_millis),
            error: run.error_message.clone(),
            output_excerpt: last_output
                .filter(|o| !o.is_empty())
                .map(|o| truncate_chars(o, MAX_NOTIFICATION_EXCERPT_CHARS)),
            artifact_ref: run
                .artifact_ref_used
                .clone()
                .or_else(|| run.artifact_ref_produced.clone()),
            scheduled: run.trigger == crate::domain::TriggerSource::Scheduled,
        }
    }

    /// One-line human summary
    pub fn subject(&self) -> String {
        match self.status {
            TerminalStatus::Completed => format!(
                "Recovery job '{}' completed: {} -> {}",
                self.job_name, self.source, self.destination
            ),
            TerminalStatus::Failed(reason) => format!(
                "Recovery job '{}' failed ({}): {} -> {}",
                self.job_name, reason, self.source, self.destination
            ),
        }
    }
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn notify(&self, notification: &RunNotification) -> Result<()>;
}

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::Mutex;

    /// Records every notification; optionally fails delivery
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<RunNotification>>,
        fail: bool,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn sent(&self) -> Vec<RunNotification> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationGateway for RecordingNotifier {
        async fn notify(&self, notification: &RunNotification) -> Result<()> {
            self.sent.lock().unwrap().push(notification.clone());
            if self.fail {
                return Err(AppError::Notification("gateway unavailable".to_string()));
            }
            Ok(())
        }
    }
}
