use async_trait::async_trait;
use bollard::models::ContainerInspectResponse;
use futures_util::stream::BoxStream;

use crate::error::DiscoveryError;
use crate::types::{RuntimeEvent, ServiceDescriptor, IDENTITY_LABEL, SWARM_SERVICE_ID_LABEL};

pub mod docker;
pub use docker::DockerRuntime;

#[cfg(test)]
pub mod mock;

/// Read-only view of a container runtime.
///
/// Implementations must tolerate concurrent calls; the reconciler inspects
/// from one task per event.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Ids of all running containers.
    async fn list_containers(&self) -> Result<Vec<String>, DiscoveryError>;

    /// Ids of running containers whose `label` equals `value`.
    async fn containers_labeled(
        &self,
        label: &str,
        value: &str,
    ) -> Result<Vec<String>, DiscoveryError>;

    async fn inspect_container(&self, id: &str)
        -> Result<ContainerInspectResponse, DiscoveryError>;

    /// Whether swarm mode is on. Errors asking the daemon count as "off".
    async fn swarm_active(&self) -> bool;

    async fn list_services(&self) -> Result<Vec<String>, DiscoveryError>;

    async fn inspect_service(&self, id: &str) -> Result<ServiceDescriptor, DiscoveryError>;

    /// Subscribe to lifecycle events. Dropping the stream closes the
    /// subscription.
    fn events(&self) -> BoxStream<'static, Result<RuntimeEvent, DiscoveryError>>;

    /// Networks of every container carrying `IDENTITY_LABEL=identity`.
    async fn identity_networks(&self, identity: &str) -> Result<Vec<String>, DiscoveryError> {
        let mut networks = Vec::new();
        for id in self.containers_labeled(IDENTITY_LABEL, identity).await? {
            let detail = self.inspect_container(&id).await?;
            for name in network_names(&detail) {
                if !networks.contains(&name) {
                    networks.push(name);
                }
            }
        }
        networks.sort();
        Ok(networks)
    }

    /// Network attachments of the running tasks of a service, read from the
    /// task containers scheduled on this node.
    async fn task_addresses(
        &self,
        service_id: &str,
    ) -> Result<Vec<(String, String)>, DiscoveryError> {
        let mut attachments = Vec::new();
        for id in self.containers_labeled(SWARM_SERVICE_ID_LABEL, service_id).await? {
            let detail = match self.inspect_container(&id).await {
                Ok(detail) => detail,
                // The task stopped between listing and inspecting
                Err(DiscoveryError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let Some(networks) = detail.network_settings.and_then(|s| s.networks) else {
                continue;
            };
            let mut names: Vec<&String> = networks.keys().collect();
            names.sort();
            for name in names {
                let endpoint = &networks[name];
                for addr in [&endpoint.ip_address, &endpoint.global_ipv6_address]
                    .into_iter()
                    .flatten()
                    .filter(|a| !a.is_empty())
                {
                    attachments.push((name.clone(), addr.clone()));
                }
            }
        }
        Ok(attachments)
    }
}

/// Names of the networks a container is attached to, sorted.
pub fn network_names(detail: &ContainerInspectResponse) -> Vec<String> {
    let mut names: Vec<String> = detail
        .network_settings
        .as_ref()
        .and_then(|s| s.networks.as_ref())
        .map(|networks| networks.keys().cloned().collect())
        .unwrap_or_default();
    names.sort();
    names
}
