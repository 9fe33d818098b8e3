//! Keeps the registry in step with the container runtime.
//!
//! Startup scans every running container (and swarm service, when swarm mode
//! is on). Afterwards each lifecycle event is handled in its own task, so a
//! slow inspect never holds up unrelated events. Two events for the same id
//! may therefore race; whichever registry call finishes last wins, and the
//! next inspect-based event corrects any stale outcome.

use std::sync::Arc;
use std::time::Duration;

use bollard::models::ContainerInspectResponse;
use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::DiscoveryError;
use crate::parser::ContainerParser;
use crate::registry::Registry;
use crate::runtime::ContainerRuntime;
use crate::types::{short_id, ContainerData, RuntimeEvent};

/// Wait before resubscribing after the event stream ends.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

pub struct Reconciler {
    runtime: Arc<dyn ContainerRuntime>,
    parser: ContainerParser,
    registry: Arc<Registry>,
}

impl Reconciler {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        parser: ContainerParser,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            runtime,
            parser,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Add every running container. Only a failed listing is an error;
    /// containers that fail to inspect or parse are logged and skipped.
    pub async fn scan(&self) -> Result<(), DiscoveryError> {
        let ids = self.runtime.list_containers().await.map_err(|e| {
            error!("Failed to list containers: {}", e);
            e
        })?;
        info!("Initial scan found {} containers", ids.len());

        for id in ids {
            match self.runtime.inspect_container(&id).await {
                Ok(detail) => {
                    if let Err(e) = self.update_container(&detail).await {
                        error!("Adding records for container {}: {}", short_id(&id), e);
                    }
                }
                Err(e) => error!("Inspect container {}: {}", short_id(&id), e),
            }
        }
        Ok(())
    }

    /// Add every swarm service, if swarm mode is on.
    pub async fn scan_services(&self) {
        if !self.runtime.swarm_active().await {
            return;
        }
        info!("Scan services");
        let ids = match self.runtime.list_services().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to list services: {}", e);
                return;
            }
        };
        for id in ids {
            self.refresh_service(&id).await;
        }
    }

    /// Parse `detail` and publish it if it is eligible. On a parse failure
    /// any stale entry under the container's id is removed.
    pub async fn update_container(
        &self,
        detail: &ContainerInspectResponse,
    ) -> Result<(), DiscoveryError> {
        let id = detail.id.as_deref().unwrap_or_default();
        let c = match self.parser.parse_container(detail).await {
            Ok(c) => c,
            Err(e) => {
                debug!("Parsing container {}: {}", short_id(id), e);
                self.remove_stale(id);
                return Err(e);
            }
        };
        self.publish(c, "container");
        Ok(())
    }

    fn publish(&self, c: ContainerData, kind: &str) {
        if !self.parser.is_eligible(&c) {
            info!("Skip {} {}: disabled discovery", kind, short_id(&c.id));
            self.remove_stale(&c.id);
            return;
        }
        if c.hosts.is_empty() || c.has_no_addresses() {
            debug!("Nothing to publish for {} {}", kind, short_id(&c.id));
            self.remove_stale(&c.id);
            return;
        }
        info!(
            "Add entry of {} {} ({}). IPv4: {:?}. IPv6: {:?}. Hosts: {:?}",
            kind,
            c.name,
            short_id(&c.id),
            c.ipv4,
            c.ipv6,
            c.hosts
        );
        self.registry.put(c);
    }

    fn remove_stale(&self, id: &str) {
        if let Some(old) = self.registry.remove(id) {
            info!("Remove entry {} ({})", old.name, short_id(id));
        }
    }

    /// Re-extract addresses after a network change, keeping the hosts.
    /// A container we do not know yet gets a full update instead.
    pub async fn update_container_networks(
        &self,
        detail: &ContainerInspectResponse,
    ) -> Result<(), DiscoveryError> {
        let id = detail.id.as_deref().unwrap_or_default();
        let Some(current) = self.registry.get(id) else {
            debug!("No entry associated with the container {}", short_id(id));
            return self.update_container(detail).await;
        };

        let addrs = match self.parser.addresses(detail).await {
            Ok(addrs) => addrs,
            Err(e) => {
                self.remove_stale(id);
                return Err(e);
            }
        };
        if addrs.is_empty() {
            info!("Container {} has no addresses left", short_id(id));
            self.remove_stale(id);
            return Ok(());
        }

        let mut next = ContainerData::clone(&current);
        next.ipv4 = addrs.ipv4;
        next.ipv6 = addrs.ipv6;
        info!(
            "Update addresses of container {} ({}). IPv4: {:?}. IPv6: {:?}",
            next.name,
            short_id(id),
            next.ipv4,
            next.ipv6
        );
        self.registry.put(next);
        Ok(())
    }

    /// Remove a container or service. Unknown ids are not an error.
    pub fn remove(&self, id: &str) {
        match self.registry.remove(id) {
            Some(info) => info!("Delete entry {} ({})", info.name, short_id(id)),
            None => debug!("No entry associated with {}", short_id(id)),
        }
    }

    async fn refresh_container(&self, id: &str, networks_only: bool) {
        let detail = match self.runtime.inspect_container(id).await {
            Ok(detail) => detail,
            Err(DiscoveryError::NotFound(_)) => {
                warn!("Container {} is gone", short_id(id));
                self.remove(id);
                return;
            }
            Err(e) => {
                error!("Inspect container {}: {}", short_id(id), e);
                return;
            }
        };
        let result = if networks_only {
            self.update_container_networks(&detail).await
        } else {
            self.update_container(&detail).await
        };
        if let Err(e) = result {
            error!("Update container {}: {}", short_id(id), e);
        }
    }

    async fn refresh_service(&self, id: &str) {
        let service = match self.runtime.inspect_service(id).await {
            Ok(service) => service,
            Err(e) => {
                error!("Inspect service {}: {}", short_id(id), e);
                return;
            }
        };
        match self.parser.parse_service(&service) {
            Ok(c) => self.publish(c, "service"),
            Err(e) => {
                info!("Parse service error {}: {}", service.name, e);
                self.remove_stale(id);
            }
        }
    }

    /// Apply one lifecycle event.
    pub async fn handle_event(&self, event: RuntimeEvent) {
        let id = event.actor_id.as_str();
        match (event.kind.as_str(), event.action.as_str()) {
            ("container", "start") => {
                info!("New container {} spawned", short_id(id));
                self.refresh_container(id, false).await;
            }
            ("container", "die") => {
                info!("Container {} stopped", short_id(id));
                self.remove(id);
            }
            ("network", action @ ("connect" | "disconnect")) => {
                let Some(container) = event.attributes.get("container") else {
                    warn!("Network {} event without container", action);
                    return;
                };
                info!(
                    "Container {} {}ed network {}",
                    short_id(container),
                    action,
                    event.attributes.get("name").map(String::as_str).unwrap_or(id)
                );
                self.refresh_container(container, true).await;
            }
            ("service", "create" | "update") => {
                info!("Service {} changed", short_id(id));
                self.refresh_service(id).await;
            }
            ("service", "remove") => {
                info!("Service {} removed", short_id(id));
                self.remove(id);
            }
            (kind, action) => debug!("Ignoring event {}:{}", kind, action),
        }
    }

    /// Consume lifecycle events until `cancel` fires.
    ///
    /// Each event runs in its own task. When the stream fails or ends we
    /// resubscribe after a short delay and rescan, since events may have
    /// been missed in between. Cancelling stops dispatch and drops the
    /// stream; tasks already running are left to finish on their own.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("Start event listening");
        loop {
            let mut events = self.runtime.events();
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("Stop event listening");
                        return;
                    }
                    msg = events.next() => match msg {
                        Some(Ok(event)) => {
                            debug!("Event {}:{} for {}", event.kind, event.action, short_id(&event.actor_id));
                            let this = Arc::clone(&self);
                            tokio::spawn(async move {
                                this.handle_event(event).await;
                            });
                        }
                        Some(Err(e)) => {
                            error!("Error in container event stream: {}", e);
                            break;
                        }
                        None => break,
                    },
                }
            }
            drop(events);

            warn!("Container event stream ended. Reconnecting in 2s...");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Stop event listening");
                    return;
                }
                _ = sleep(RECONNECT_DELAY) => {}
            }
            if let Err(e) = self.scan().await {
                error!("Rescan after reconnect failed: {}", e);
            }
            self.scan_services().await;
        }
    }
}
