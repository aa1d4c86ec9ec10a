// Host Topology Model

use serde::{Deserialize, Serialize};

/// Opaque reference to a host in the topology directory
pub type HostRef = String;

/// Default SSH port for remote operations
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default SSH login
pub const DEFAULT_SSH_USER: &str = "root";

/// Role a host plays in one recovery run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostRole {
    Source,
    Intermediary,
    Destination,
}

impl std::fmt::Display for HostRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostRole::Source => write!(f, "SOURCE"),
            HostRole::Intermediary => write!(f, "INTERMEDIARY"),
            HostRole::Destination => write!(f, "DESTINATION"),
        }
    }
}

/// Roles a host is allowed to play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub source: bool,
    pub intermediary: bool,
    pub destination: bool,
}

impl Default for Capabilities {
    /// Hypervisor nodes act as source and destination; intermediaries are opt-in
    fn default() -> Self {
        Self {
            source: true,
            intermediary: false,
            destination: true,
        }
    }
}

/// Connection details for one host, as returned by the topology directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEndpoint {
    pub host_ref: HostRef,
    pub hostname: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub ssh_key_path: Option<String>,
    /// Datastore exposed by an intermediary store host
    pub datastore: Option<String>,
    pub capabilities: Capabilities,
    pub is_online: bool,
    pub updated_at: i64, // epoch ms
}

impl HostEndpoint {
    pub fn new(host_ref: impl Into<String>, hostname: impl Into<String>, updated_at: i64) -> Self {
        Self {
            host_ref: host_ref.into(),
            hostname: hostname.into(),
            ssh_port: DEFAULT_SSH_PORT,
            ssh_user: DEFAULT_SSH_USER.to_string(),
            ssh_key_path: None,
            datastore: None,
            capabilities: Capabilities::default(),
            is_online: true,
            updated_at,
        }
    }

    /// Whether this host may be used in the given role
    pub fn supports(&self, role: HostRole) -> bool {
        match role {
            HostRole::Source => self.capabilities.source,
            HostRole::Intermediary => self.capabilities.intermediary,
            HostRole::Destination => self.capabilities.destination,
        }
    }

    /// `user@hostname` login target
    pub fn ssh_target(&self) -> String {
        format!("{}@{}", self.ssh_user, self.hostname)
    }

    pub fn validate(&self) -> crate::domain::error::Result<()> {
        use crate::domain::error::DomainError;

        if self.host_ref.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "host_ref must not be empty".to_string(),
            ));
        }
        if self.hostname.trim().is_empty() {
            return Err(DomainError::ValidationError(format!(
                "hostname for host '{}' must not be empty",
                self.host_ref
            )));
        }
        if self.ssh_port == 0 {
            return Err(DomainError::ValidationError(format!(
                "ssh_port for host '{}' must be non-zero",
                self.host_ref
            )));
        }
        if self.capabilities.intermediary && self.datastore.is_none() {
            return Err(DomainError::ValidationError(format!(
                "intermediary host '{}' must declare a datastore",
                self.host_ref
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_roles() {
        let mut host = HostEndpoint::new("pve-1", "10.0.0.1", 0);
        assert!(host.supports(HostRole::Source));
        assert!(host.supports(HostRole::Destination));
        assert!(!host.supports(HostRole::Intermediary));

        host.capabilities = Capabilities {
            source: false,
            intermediary: true,
            destination: false,
        };
        assert!(host.supports(HostRole::Intermediary));
        assert!(!host.supports(HostRole::Source));
    }

    #[test]
    fn test_intermediary_requires_datastore() {
        let mut host = HostEndpoint::new("pbs", "10.0.0.9", 0);
        host.capabilities.intermediary = true;
        assert!(host.validate().is_err());

        host.datastore = Some("backups".to_string());
        assert!(host.validate().is_ok());
    }

    #[test]
    fn test_ssh_target() {
        let host = HostEndpoint::new("pve-1", "pve1.lan", 0);
        assert_eq!(host.ssh_target(), "root@pve1.lan");
    }
}
