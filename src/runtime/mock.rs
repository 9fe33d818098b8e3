//! In-memory runtime for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bollard::models::{
    ContainerConfig, ContainerInspectResponse, EndpointSettings, HostConfig, NetworkSettings,
};
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;

use super::ContainerRuntime;
use crate::error::DiscoveryError;
use crate::types::{RuntimeEvent, ServiceDescriptor};

type EventResult = Result<RuntimeEvent, DiscoveryError>;

/// Containers and services kept in maps; events are fed through a channel
/// returned by [`MockRuntime::new`].
pub struct MockRuntime {
    containers: Mutex<HashMap<String, ContainerInspectResponse>>,
    services: Mutex<HashMap<String, ServiceDescriptor>>,
    swarm: bool,
    events: Mutex<Option<mpsc::UnboundedReceiver<EventResult>>>,
}

impl MockRuntime {
    pub fn new() -> (Self, mpsc::UnboundedSender<EventResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runtime = Self {
            containers: Mutex::new(HashMap::new()),
            services: Mutex::new(HashMap::new()),
            swarm: false,
            events: Mutex::new(Some(rx)),
        };
        (runtime, tx)
    }

    pub fn with_swarm(mut self) -> Self {
        self.swarm = true;
        self
    }

    pub fn insert(&self, detail: ContainerInspectResponse) {
        let id = detail.id.clone().unwrap_or_default();
        self.containers.lock().unwrap().insert(id, detail);
    }

    pub fn remove(&self, id: &str) {
        self.containers.lock().unwrap().remove(id);
    }

    pub fn insert_service(&self, service: ServiceDescriptor) {
        self.services
            .lock()
            .unwrap()
            .insert(service.id.clone(), service);
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(&self) -> Result<Vec<String>, DiscoveryError> {
        let mut ids: Vec<String> = self.containers.lock().unwrap().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn containers_labeled(
        &self,
        label: &str,
        value: &str,
    ) -> Result<Vec<String>, DiscoveryError> {
        let containers = self.containers.lock().unwrap();
        let mut ids: Vec<String> = containers
            .iter()
            .filter(|(_, detail)| {
                detail
                    .config
                    .as_ref()
                    .and_then(|c| c.labels.as_ref())
                    .and_then(|labels| labels.get(label))
                    .is_some_and(|v| v == value)
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn inspect_container(
        &self,
        id: &str,
    ) -> Result<ContainerInspectResponse, DiscoveryError> {
        self.containers
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| DiscoveryError::NotFound(id.to_string()))
    }

    async fn swarm_active(&self) -> bool {
        self.swarm
    }

    async fn list_services(&self) -> Result<Vec<String>, DiscoveryError> {
        let mut ids: Vec<String> = self.services.lock().unwrap().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn inspect_service(&self, id: &str) -> Result<ServiceDescriptor, DiscoveryError> {
        self.services
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| DiscoveryError::NotFound(id.to_string()))
    }

    fn events(&self) -> BoxStream<'static, Result<RuntimeEvent, DiscoveryError>> {
        match self.events.lock().unwrap().take() {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            })
            .boxed(),
            None => stream::pending().boxed(),
        }
    }
}

/// Builder for inspect responses shaped like the Docker API returns them.
pub struct ContainerBuilder {
    detail: ContainerInspectResponse,
}

impl ContainerBuilder {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            detail: ContainerInspectResponse {
                id: Some(id.to_string()),
                name: Some(format!("/{name}")),
                config: Some(ContainerConfig {
                    hostname: Some(name.to_string()),
                    labels: Some(HashMap::new()),
                    ..Default::default()
                }),
                host_config: Some(HostConfig {
                    network_mode: Some("default".to_string()),
                    ..Default::default()
                }),
                network_settings: Some(NetworkSettings {
                    networks: Some(HashMap::new()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }

    pub fn hostname(mut self, hostname: &str) -> Self {
        if let Some(config) = self.detail.config.as_mut() {
            config.hostname = Some(hostname.to_string());
        }
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        if let Some(labels) = self.detail.config.as_mut().and_then(|c| c.labels.as_mut()) {
            labels.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn network(mut self, name: &str, ipv4: &str, ipv6: &str) -> Self {
        if let Some(networks) = self
            .detail
            .network_settings
            .as_mut()
            .and_then(|s| s.networks.as_mut())
        {
            networks.insert(
                name.to_string(),
                EndpointSettings {
                    ip_address: Some(ipv4.to_string()),
                    global_ipv6_address: Some(ipv6.to_string()),
                    ..Default::default()
                },
            );
        }
        self
    }

    pub fn network_mode(mut self, mode: &str) -> Self {
        if let Some(host_config) = self.detail.host_config.as_mut() {
            host_config.network_mode = Some(mode.to_string());
        }
        self
    }

    pub fn build(self) -> ContainerInspectResponse {
        self.detail
    }
}

pub fn event(kind: &str, action: &str, actor_id: &str) -> RuntimeEvent {
    RuntimeEvent {
        kind: kind.to_string(),
        action: action.to_string(),
        actor_id: actor_id.to_string(),
        attributes: HashMap::new(),
    }
}

/// A `network:<action>` event for `container` on `network`.
pub fn network_event(action: &str, network: &str, container: &str) -> RuntimeEvent {
    RuntimeEvent {
        kind: "network".to_string(),
        action: action.to_string(),
        actor_id: format!("{network}-id"),
        attributes: HashMap::from([
            ("container".to_string(), container.to_string()),
            ("name".to_string(), network.to_string()),
        ]),
    }
}
