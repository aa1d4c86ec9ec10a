// Notification gateways: webhook delivery and log-only fallback

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use ferry_core::domain::TerminalStatus;
use ferry_core::error::{AppError, Result};
use ferry_core::port::{NotificationGateway, RunNotification};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON body posted to the webhook
#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    subject: String,
    success: bool,
    #[serde(flatten)]
    notification: &'a RunNotification,
}

impl<'a> WebhookBody<'a> {
    fn new(notification: &'a RunNotification) -> Self {
        Self {
            subject: notification.subject(),
            success: notification.status == TerminalStatus::Completed,
            notification,
        }
    }
}

/// POSTs each notification as JSON to a configured URL
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationGateway for WebhookNotifier {
    async fn notify(&self, notification: &RunNotification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookBody::new(notification))
            .send()
            .await
            .map_err(|e| AppError::Notification(format!("webhook delivery failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            warn!(run_id = %notification.run_id, status = %status, "Webhook rejected notification");
            return Err(AppError::Notification(format!(
                "webhook returned HTTP {}",
                status
            )));
        }

        info!(run_id = %notification.run_id, "Notification delivered");
        Ok(())
    }
}

/// Writes notifications to the log only (no webhook configured)
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationGateway for LogNotifier {
    async fn notify(&self, notification: &RunNotification) -> Result<()> {
        match notification.status {
            TerminalStatus::Completed => info!(
                job_id = %notification.job_id,
                run_id = %notification.run_id,
                duration_ms = notification.duration_ms,
                "{}",
                notification.subject()
            ),
            TerminalStatus::Failed(_) => warn!(
                job_id = %notification.job_id,
                run_id = %notification.run_id,
                error = ?notification.error,
                "{}",
                notification.subject()
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::domain::{FailureReason, RunMode};

    fn notification(status: TerminalStatus) -> RunNotification {
        RunNotification {
            job_id: "job-1".to_string(),
            job_name: "web-01".to_string(),
            run_id: "run-1".to_string(),
            mode: RunMode::Full,
            status,
            source: "pve-a:101".to_string(),
            destination: "pve-b:101".to_string(),
            attempts: 1,
            duration_ms: 1_500,
            error: Some("backup failed: exit 2".to_string()),
            output_excerpt: None,
            artifact_ref: None,
            scheduled: false,
        }
    }

    #[test]
    fn test_webhook_body_shape() {
        let n = notification(TerminalStatus::Failed(FailureReason::BackupFailed));
        let body = serde_json::to_value(WebhookBody::new(&n)).unwrap();

        assert_eq!(body["success"], false);
        assert_eq!(body["job_name"], "web-01");
        assert_eq!(body["status"]["status"], "FAILED");
        assert_eq!(body["status"]["reason"], "BACKUP_FAILED");
        assert!(body["subject"].as_str().unwrap().contains("BACKUP_FAILED"));
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let notifier = LogNotifier;
        assert!(notifier
            .notify(&notification(TerminalStatus::Completed))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_notification_error() {
        // Port 9 (discard) is not listening on loopback in test environments
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook").unwrap();
        let result = notifier
            .notify(&notification(TerminalStatus::Completed))
            .await;
        assert!(matches!(result, Err(AppError::Notification(_))));
    }
}
