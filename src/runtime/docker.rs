use super::ContainerRuntime;
use crate::error::DiscoveryError;
use crate::types::{RuntimeEvent, ServiceDescriptor};
use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::{ContainerInspectResponse, EventMessage, LocalNodeState, SystemInfo};
use bollard::network::InspectNetworkOptions;
use bollard::service::{InspectServiceOptions, ListServicesOptions};
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::{BoxStream, StreamExt};
use log::{debug, info};
use std::collections::HashMap;

/// Seconds before a Docker API request times out.
const REQUEST_TIMEOUT: u64 = 120;

/// Services can only be listed from an active manager node.
fn swarm_manager(info: &SystemInfo) -> bool {
    info.swarm.as_ref().is_some_and(|swarm| {
        swarm.local_node_state == Some(LocalNodeState::ACTIVE)
            && swarm.control_available == Some(true)
    })
}

/// [`ContainerRuntime`] backed by the Docker Engine API.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    swarm: bool,
}

impl DockerRuntime {
    /// Connect to `endpoint` (`unix://…`, `tcp://…` or `http://…`), or to the
    /// local daemon's defaults when none is given. The daemon is pinged so an
    /// unreachable runtime fails here rather than on the first scan.
    pub async fn connect(endpoint: Option<&str>) -> Result<Self, DiscoveryError> {
        let docker = match endpoint {
            None => Docker::connect_with_local_defaults()?,
            Some(ep) if ep.starts_with("unix://") => {
                Docker::connect_with_unix(ep, REQUEST_TIMEOUT, API_DEFAULT_VERSION)?
            }
            Some(ep) => Docker::connect_with_http(ep, REQUEST_TIMEOUT, API_DEFAULT_VERSION)?,
        };
        docker.ping().await?;
        info!(
            "Connected to Docker at {}",
            endpoint.unwrap_or("local defaults")
        );
        Ok(Self {
            docker,
            swarm: true,
        })
    }

    /// Skip swarm detection entirely when `enabled` is false.
    pub fn with_swarm(mut self, enabled: bool) -> Self {
        self.swarm = enabled;
        self
    }

    async fn network_name(&self, network_id: &str) -> Option<String> {
        match self
            .docker
            .inspect_network(network_id, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(network) => network.name,
            Err(e) => {
                debug!("Failed to inspect network {}: {}", network_id, e);
                None
            }
        }
    }

    async fn list_running(
        &self,
        filters: HashMap<String, Vec<String>>,
    ) -> Result<Vec<String>, DiscoveryError> {
        let opts = ListContainersOptions::<String> {
            all: false,
            filters,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(opts)).await?;
        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<String>, DiscoveryError> {
        self.list_running(HashMap::new()).await
    }

    async fn containers_labeled(
        &self,
        label: &str,
        value: &str,
    ) -> Result<Vec<String>, DiscoveryError> {
        let filters = HashMap::from([("label".to_string(), vec![format!("{label}={value}")])]);
        self.list_running(filters).await
    }

    async fn inspect_container(
        &self,
        id: &str,
    ) -> Result<ContainerInspectResponse, DiscoveryError> {
        self.docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| DiscoveryError::from_runtime(id, e))
    }

    async fn swarm_active(&self) -> bool {
        if !self.swarm {
            return false;
        }
        match self.docker.info().await {
            Ok(info) => swarm_manager(&info),
            Err(e) => {
                debug!("Swarm mode is off: {}", e);
                false
            }
        }
    }

    async fn list_services(&self) -> Result<Vec<String>, DiscoveryError> {
        let services = self
            .docker
            .list_services(None::<ListServicesOptions<String>>)
            .await?;
        Ok(services.into_iter().filter_map(|s| s.id).collect())
    }

    async fn inspect_service(&self, id: &str) -> Result<ServiceDescriptor, DiscoveryError> {
        let service = self
            .docker
            .inspect_service(id, None::<InspectServiceOptions>)
            .await
            .map_err(|e| DiscoveryError::from_runtime(id, e))?;

        let spec = service.spec.unwrap_or_default();
        let mut labels = spec.labels.unwrap_or_default();
        if let Some(container_labels) = spec
            .task_template
            .and_then(|t| t.container_spec)
            .and_then(|c| c.labels)
        {
            labels.extend(container_labels);
        }

        let mut virtual_ips = Vec::new();
        for vip in service
            .endpoint
            .and_then(|e| e.virtual_ips)
            .unwrap_or_default()
        {
            let (Some(network_id), Some(addr)) = (vip.network_id, vip.addr) else {
                continue;
            };
            if let Some(network) = self.network_name(&network_id).await {
                virtual_ips.push((network, addr));
            }
        }

        let id = service.id.unwrap_or_else(|| id.to_string());
        let task_addresses = self.task_addresses(&id).await?;
        Ok(ServiceDescriptor {
            id,
            name: spec.name.unwrap_or_default(),
            labels,
            virtual_ips,
            task_addresses,
        })
    }

    fn events(&self) -> BoxStream<'static, Result<RuntimeEvent, DiscoveryError>> {
        let opts = EventsOptions::<String> {
            filters: [
                ("type", ["container", "network", "service"].as_slice()),
                (
                    "event",
                    [
                        "start",
                        "die",
                        "connect",
                        "disconnect",
                        "create",
                        "update",
                        "remove",
                    ]
                    .as_slice(),
                ),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect(),
            ..Default::default()
        };

        self.docker
            .events(Some(opts))
            .map(|msg| msg.map(to_runtime_event).map_err(DiscoveryError::from))
            .boxed()
    }
}

fn to_runtime_event(event: EventMessage) -> RuntimeEvent {
    let actor = event.actor.unwrap_or_default();
    RuntimeEvent {
        kind: event.typ.map(|t| t.to_string()).unwrap_or_default(),
        action: event.action.unwrap_or_default(),
        actor_id: actor.id.unwrap_or_default(),
        attributes: actor.attributes.unwrap_or_default(),
    }
}
