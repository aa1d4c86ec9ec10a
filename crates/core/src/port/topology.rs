// Topology Provider Port - host directory lookups

use crate::domain::HostEndpoint;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait TopologyProvider: Send + Sync {
    /// Connection parameters and capabilities for a host reference
    async fn resolve(&self, host_ref: &str) -> Result<Option<HostEndpoint>>;

    /// Register or replace a host record
    async fn upsert(&self, host: &HostEndpoint) -> Result<()>;

    async fn list(&self) -> Result<Vec<HostEndpoint>>;
}

pub mod mocks {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct StaticTopology {
        hosts: Mutex<BTreeMap<String, HostEndpoint>>,
    }

    impl StaticTopology {
        pub fn new(hosts: impl IntoIterator<Item = HostEndpoint>) -> Self {
            Self {
                hosts: Mutex::new(
                    hosts
                        .into_iter()
                        .map(|h| (h.host_ref.clone(), h))
                        .collect(),
                ),
            }
        }
    }

    #[async_trait]
    impl TopologyProvider for StaticTopology {
        async fn resolve(&self, host_ref: &str) -> Result<Option<HostEndpoint>> {
            Ok(self.hosts.lock().unwrap().get(host_ref).cloned())
        }

        async fn upsert(&self, host: &HostEndpoint) -> Result<()> {
            self.hosts
                .lock()
                .unwrap()
                .insert(host.host_ref.clone(), host.clone());
            Ok(())
        }

        async fn list(&self) -> Result<Vec<HostEndpoint>> {
            Ok(self.hosts.lock().unwrap().values().cloned().collect())
        }
    }
}
