// Ferry Infrastructure - System Adapters
// Implements: RemoteOperationClient (ssh), NotificationGateway (webhook, log)

pub mod notifier;
pub mod ssh_client;

pub use notifier::{LogNotifier, WebhookNotifier};
pub use ssh_client::{SshConfig, SshRemoteClient};
