//! In-memory `DockerBridge` for unit tests.
//!
//! Behaves like a small engine: images, containers and networks live in a map, containers
//! attach to networks through their endpoint config, and missing resources answer 404. Every
//! call is appended to an ordered log so tests can assert on what the pool asked for.

use crate::docker::{DockerBridge, ImageStream};
use async_trait::async_trait;
use bollard::container::{Config, CreateContainerOptions, RemoveContainerOptions};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerConfig, ContainerCreateResponse, ContainerInspectResponse, ContainerState,
    ContainerStateStatusEnum, CreateImageInfo, EndpointSettings, ImageInspect, MountPoint,
    Network, NetworkContainer, NetworkSettings, PortBinding, PortMap,
};
use bollard::network::{CreateNetworkOptions, DisconnectNetworkOptions};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

const FIRST_HOST_PORT: u16 = 49153;

struct FakeContainer {
    name: Option<String>,
    config: Config<String>,
    started: bool,
    networks: BTreeSet<String>,
    ports: PortMap,
}

struct FakeNetwork {
    name: String,
    containers: BTreeSet<String>,
}

#[derive(Default)]
struct State {
    calls: Vec<String>,
    next_id: u64,
    next_host_port: u16,
    images: HashSet<String>,
    pull_errors: HashMap<String, String>,
    containers: HashMap<String, FakeContainer>,
    networks: HashMap<String, FakeNetwork>,
    failures: HashMap<&'static str, u16>,
}

impl State {
    fn record(&mut self, op: &'static str, target: &str) -> Result<(), DockerError> {
        self.calls.push(format!("{op} {target}"));
        match self.failures.get(op) {
            Some(&status) => Err(server_error(status, format!("injected {op} failure"))),
            None => Ok(()),
        }
    }

    fn next_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{kind}-{}", self.next_id)
    }

    fn find_network(&self, key: &str) -> Option<String> {
        if self.networks.contains_key(key) {
            return Some(key.to_string());
        }
        self.networks
            .iter()
            .find(|(_, network)| network.name == key)
            .map(|(id, _)| id.clone())
    }
}

fn server_error(status_code: u16, message: impl Into<String>) -> DockerError {
    DockerError::DockerResponseServerError {
        status_code,
        message: message.into(),
    }
}

#[derive(Default)]
pub(crate) struct RecordingBridge {
    state: Mutex<State>,
    delays: Mutex<HashMap<&'static str, Duration>>,
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `image` available locally so no pull is needed.
    pub fn with_image(self, image: &str) -> Self {
        self.state.lock().images.insert(image.to_string());
        self
    }

    /// Every call to `op` fails with `status` until cleared.
    pub fn fail(&self, op: &'static str, status: u16) {
        self.state.lock().failures.insert(op, status);
    }

    pub fn clear_failure(&self, op: &'static str) {
        self.state.lock().failures.remove(op);
    }

    /// Pulling `image` reports `message` in the progress stream.
    pub fn fail_pull(&self, image: &str, message: &str) {
        self.state
            .lock()
            .pull_errors
            .insert(image.to_string(), message.to_string());
    }

    /// Every call to `op` sleeps for `delay` before it touches the engine state.
    pub fn set_delay(&self, op: &'static str, delay: Duration) {
        self.delays.lock().insert(op, delay);
    }

    async fn pause(&self, op: &'static str) {
        let delay = self.delays.lock().get(op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Attach a container the pool knows nothing about.
    pub fn attach(&self, network: &str, container: &str) {
        let mut state = self.state.lock();
        if let Some(id) = state.find_network(network) {
            if let Some(network) = state.networks.get_mut(&id) {
                network.containers.insert(container.to_string());
            }
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Logged calls for one operation, in order.
    pub fn calls_to(&self, op: &str) -> Vec<String> {
        let prefix = format!("{op} ");
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(&prefix))
            .collect()
    }

    pub fn container_ids(&self) -> BTreeSet<String> {
        self.state.lock().containers.keys().cloned().collect()
    }

    pub fn network_ids(&self) -> BTreeSet<String> {
        self.state.lock().networks.keys().cloned().collect()
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state.lock().images.contains(image)
    }

    pub fn container_config(&self, id: &str) -> Option<Config<String>> {
        self.state
            .lock()
            .containers
            .get(id)
            .map(|container| container.config.clone())
    }

    pub fn attached(&self, network: &str) -> BTreeSet<String> {
        let state = self.state.lock();
        state
            .find_network(network)
            .and_then(|id| state.networks.get(&id))
            .map(|network| network.containers.clone())
            .unwrap_or_default()
    }
}

/// Network settings are keyed by network name, as the engine reports them.
fn inspect_response(
    id: &str,
    container: &FakeContainer,
    networks: &HashMap<String, FakeNetwork>,
) -> ContainerInspectResponse {
    let mounts = container
        .config
        .host_config
        .as_ref()
        .and_then(|host| host.mounts.as_ref())
        .map(|mounts| {
            mounts
                .iter()
                .map(|mount| MountPoint {
                    source: mount.source.clone(),
                    destination: mount.target.clone(),
                    ..Default::default()
                })
                .collect()
        });
    let status = if container.started {
        ContainerStateStatusEnum::RUNNING
    } else {
        ContainerStateStatusEnum::CREATED
    };

    ContainerInspectResponse {
        id: Some(id.to_string()),
        name: container.name.as_ref().map(|name| format!("/{name}")),
        created: Some("2026-01-01T00:00:00.000000000Z".to_string()),
        config: Some(ContainerConfig {
            image: container.config.image.clone(),
            env: container.config.env.clone(),
            cmd: container.config.cmd.clone(),
            exposed_ports: container.config.exposed_ports.clone(),
            ..Default::default()
        }),
        state: Some(ContainerState {
            status: Some(status),
            running: Some(container.started),
            ..Default::default()
        }),
        network_settings: Some(NetworkSettings {
            ports: Some(container.ports.clone()),
            networks: Some(
                container
                    .networks
                    .iter()
                    .filter_map(|network| networks.get(network))
                    .map(|network| (network.name.clone(), EndpointSettings::default()))
                    .collect(),
            ),
            ..Default::default()
        }),
        mounts,
        ..Default::default()
    }
}

#[async_trait]
impl DockerBridge for RecordingBridge {
    async fn inspect_image(&self, image: &str) -> Result<ImageInspect, DockerError> {
        let mut state = self.state.lock();
        state.record("inspect_image", image)?;
        if state.images.contains(image) {
            Ok(ImageInspect {
                id: Some(format!("sha256:{image}")),
                ..Default::default()
            })
        } else {
            Err(server_error(404, format!("No such image: {image}")))
        }
    }

    fn create_image_stream(&self, options: Option<CreateImageOptions<String>>) -> ImageStream {
        let image = options.map(|o| o.from_image).unwrap_or_default();
        let mut state = self.state.lock();
        let items = match state.record("pull", &image) {
            Err(e) => vec![Err(e)],
            Ok(()) => match state.pull_errors.get(&image) {
                Some(message) => vec![Ok(CreateImageInfo {
                    error: Some(message.clone()),
                    ..Default::default()
                })],
                None => {
                    state.images.insert(image.clone());
                    vec![
                        Ok(CreateImageInfo {
                            status: Some(format!("Pulling from {image}")),
                            ..Default::default()
                        }),
                        Ok(CreateImageInfo {
                            status: Some("Pull complete".to_string()),
                            ..Default::default()
                        }),
                    ]
                }
            },
        };
        Box::pin(futures::stream::iter(items))
    }

    async fn create_container(
        &self,
        options: Option<CreateContainerOptions<String>>,
        config: Config<String>,
    ) -> Result<ContainerCreateResponse, DockerError> {
        self.pause("create_container").await;

        let name = options.map(|o| o.name).filter(|name| !name.is_empty());
        let mut state = self.state.lock();
        state.record("create_container", name.as_deref().unwrap_or("-"))?;

        if let Some(name) = &name {
            if state
                .containers
                .values()
                .any(|c| c.name.as_deref() == Some(name.as_str()))
            {
                return Err(server_error(409, format!("Conflict. {name} is in use")));
            }
        }

        let mut networks = BTreeSet::new();
        if let Some(networking) = &config.networking_config {
            for key in networking.endpoints_config.keys() {
                let id = state
                    .find_network(key)
                    .ok_or_else(|| server_error(404, format!("network {key} not found")))?;
                networks.insert(id);
            }
        }

        let id = state.next_id("container");
        for network in &networks {
            if let Some(network) = state.networks.get_mut(network) {
                network.containers.insert(id.clone());
            }
        }
        state.containers.insert(
            id.clone(),
            FakeContainer {
                name,
                config,
                started: false,
                networks,
                ports: PortMap::new(),
            },
        );

        Ok(ContainerCreateResponse {
            id,
            warnings: Vec::new(),
        })
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        self.pause("start_container").await;
        let mut state = self.state.lock();
        state.record("start_container", id)?;

        let keys: Vec<String> = match state.containers.get(id) {
            Some(container) => container
                .config
                .exposed_ports
                .as_ref()
                .map(|ports| ports.keys().cloned().collect())
                .unwrap_or_default(),
            None => return Err(server_error(404, format!("No such container: {id}"))),
        };

        let mut ports = PortMap::new();
        for key in keys {
            if state.next_host_port == 0 {
                state.next_host_port = FIRST_HOST_PORT;
            }
            let host_port = state.next_host_port;
            state.next_host_port += 1;
            ports.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host_port.to_string()),
                }]),
            );
        }

        if let Some(container) = state.containers.get_mut(id) {
            container.started = true;
            container.ports = ports;
        }
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspectResponse, DockerError> {
        let mut state = self.state.lock();
        state.record("inspect_container", id)?;
        state
            .containers
            .get(id)
            .map(|container| inspect_response(id, container, &state.networks))
            .ok_or_else(|| server_error(404, format!("No such container: {id}")))
    }

    async fn remove_container(
        &self,
        id: &str,
        options: Option<RemoveContainerOptions>,
    ) -> Result<(), DockerError> {
        let mut state = self.state.lock();
        state.record("remove_container", id)?;

        let force = options.map(|o| o.force).unwrap_or(false);
        match state.containers.get(id) {
            None => return Err(server_error(404, format!("No such container: {id}"))),
            Some(container) if container.started && !force => {
                return Err(server_error(409, "cannot remove a running container"));
            }
            Some(_) => {}
        }

        if let Some(container) = state.containers.remove(id) {
            for network in container.networks {
                if let Some(network) = state.networks.get_mut(&network) {
                    network.containers.remove(id);
                }
            }
        }
        Ok(())
    }

    async fn create_network(
        &self,
        options: CreateNetworkOptions<String>,
    ) -> Result<String, DockerError> {
        self.pause("create_network").await;
        let mut state = self.state.lock();
        state.record("create_network", &options.name)?;

        if options.check_duplicate && state.find_network(&options.name).is_some() {
            return Err(server_error(
                409,
                format!("network with name {} already exists", options.name),
            ));
        }

        let id = state.next_id("network");
        state.networks.insert(
            id.clone(),
            FakeNetwork {
                name: options.name,
                containers: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    async fn inspect_network(&self, network: &str) -> Result<Network, DockerError> {
        let mut state = self.state.lock();
        state.record("inspect_network", network)?;

        let id = state
            .find_network(network)
            .ok_or_else(|| server_error(404, format!("network {network} not found")))?;
        let found = &state.networks[&id];
        Ok(Network {
            id: Some(id.clone()),
            name: Some(found.name.clone()),
            containers: Some(
                found
                    .containers
                    .iter()
                    .map(|c| (c.clone(), NetworkContainer::default()))
                    .collect(),
            ),
            ..Default::default()
        })
    }

    async fn disconnect_network(
        &self,
        network: &str,
        options: DisconnectNetworkOptions<String>,
    ) -> Result<(), DockerError> {
        let mut state = self.state.lock();
        state.record(
            "disconnect_network",
            &format!("{network} {}", options.container),
        )?;

        let id = state
            .find_network(network)
            .ok_or_else(|| server_error(404, format!("network {network} not found")))?;
        if let Some(found) = state.networks.get_mut(&id) {
            found.containers.remove(&options.container);
        }
        if let Some(container) = state.containers.get_mut(&options.container) {
            container.networks.remove(&id);
        }
        Ok(())
    }

    async fn remove_network(&self, network: &str) -> Result<(), DockerError> {
        let mut state = self.state.lock();
        state.record("remove_network", network)?;

        let id = state
            .find_network(network)
            .ok_or_else(|| server_error(404, format!("network {network} not found")))?;
        if !state.networks[&id].containers.is_empty() {
            return Err(server_error(
                403,
                format!("error while removing network: network {network} has active endpoints"),
            ));
        }
        state.networks.remove(&id);
        Ok(())
    }
}
