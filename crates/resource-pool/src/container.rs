//! Container provisioning and lookup
//!
//! `create_container` runs the whole path from image reference to registered descriptor:
//! mount directories, image pull when missing, create, start, inspect. A container is only
//! registered once it has been started and inspected; if start or inspect fails after the
//! engine created it, the id is kept aside and removed on close. The engine create call itself
//! always runs to completion so that id is never lost, even when the pool closes meanwhile.

use crate::error::{PoolError, Result};
use crate::options::ContainerOptions;
use crate::pool::{Orphan, Pool};
use bollard::container::{Config, CreateContainerOptions, NetworkingConfig};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, EndpointSettings, HostConfig, Mount, MountTypeEnum, RestartPolicy,
    RestartPolicyNameEnum,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Host directory bound to a container path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPair {
    pub source: String,
    pub destination: String,
}

/// A started container, as last inspected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    pub id: String,
    pub name: Option<String>,
    pub image: String,
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    /// Exposed port keys, e.g. `3306/tcp`.
    pub exposed_ports: Vec<String>,
    pub status: Option<String>,
    /// Published host ports per container port key.
    pub ports: BTreeMap<String, Vec<String>>,
    pub mounts: Vec<MountPair>,
    /// Names of the networks the container is attached to.
    pub networks: Vec<String>,
    pub created: Option<String>,
    pub inspected_at: DateTime<Utc>,
}

impl ContainerDescriptor {
    pub fn from_inspect(info: ContainerInspectResponse) -> Result<Self> {
        let id = info
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PoolError::Descriptor {
                op: "ContainerInspect",
                reason: "engine returned a container without an id".to_string(),
            })?;

        let config = info.config.unwrap_or_default();
        let mut exposed_ports: Vec<String> = config
            .exposed_ports
            .map(|ports| ports.into_keys().collect())
            .unwrap_or_default();
        exposed_ports.sort();

        let settings = info.network_settings.unwrap_or_default();
        let ports = settings
            .ports
            .unwrap_or_default()
            .into_iter()
            .map(|(key, bindings)| {
                let hosts = bindings
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|binding| binding.host_port.filter(|port| !port.is_empty()))
                    .collect();
                (key, hosts)
            })
            .collect();
        let mut networks: Vec<String> = settings
            .networks
            .map(|networks| networks.into_keys().collect())
            .unwrap_or_default();
        networks.sort();

        let mounts = info
            .mounts
            .unwrap_or_default()
            .into_iter()
            .map(|mount| MountPair {
                source: mount.source.unwrap_or_default(),
                destination: mount.destination.unwrap_or_default(),
            })
            .collect();

        Ok(Self {
            id,
            name: info
                .name
                .map(|name| name.trim_start_matches('/').to_string())
                .filter(|name| !name.is_empty()),
            image: config.image.unwrap_or_default(),
            env: config.env.unwrap_or_default(),
            cmd: config.cmd.unwrap_or_default(),
            exposed_ports,
            status: info
                .state
                .and_then(|state| state.status)
                .map(|status| status.to_string()),
            ports,
            mounts,
            networks,
            created: info.created,
            inspected_at: Utc::now(),
        })
    }

    /// Host port published for container port `port`.
    ///
    /// `"3306"` matches `3306/tcp` and `3306/udp` (tcp preferred) but never `33060/tcp`;
    /// `"53/udp"` matches only that key. Ports without a published host port are skipped.
    pub fn host_port(&self, port: &str) -> Option<&str> {
        let mut candidates: Vec<(&String, &Vec<String>)> = self
            .ports
            .iter()
            .filter(|(key, hosts)| port_matches(key, port) && !hosts.is_empty())
            .collect();
        candidates.sort_by_key(|(key, _)| !key.ends_with("/tcp"));
        candidates
            .first()
            .and_then(|(_, hosts)| hosts.first())
            .map(String::as_str)
    }
}

fn port_matches(key: &str, query: &str) -> bool {
    if query.contains('/') {
        key == query
    } else {
        key.split('/').next() == Some(query)
    }
}

impl Pool {
    /// Create, start and register a container from `repository:options.tag`.
    ///
    /// Steps, in order: create a host directory per mount, pull the image unless the engine
    /// has it, create the container with every port published, start it, inspect it, register
    /// the descriptor. Returns the engine-assigned id.
    ///
    /// # Errors
    ///
    /// - [`PoolError::EmptyRepository`] before any remote call.
    /// - [`PoolError::Cancelled`] when the pool is or becomes closed.
    /// - [`PoolError::Pull`] or [`PoolError::Remote`] naming the failed engine operation.
    ///
    /// A container that was created but failed to start or inspect is not registered; `close`
    /// removes it.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use resource_pool::{ContainerOptions, Pool};
    ///
    /// # async fn example(pool: &Pool) -> resource_pool::Result<()> {
    /// let id = pool
    ///     .create_container(
    ///         "mysql",
    ///         ContainerOptions::new()
    ///             .tag("8.4")
    ///             .env(["MYSQL_ROOT_PASSWORD=secret"])
    ///             .exposed_ports(["3306"])
    ///             .mounts(["/var/lib/mysql"]),
    ///     )
    ///     .await?;
    /// assert_eq!(pool.get_container(&id)?.image, "mysql:8.4");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_container(
        &self,
        repository: &str,
        options: ContainerOptions,
    ) -> Result<String> {
        let image = options.image_reference(repository)?;
        let _in_flight = self.begin_create("ContainerCreate")?;

        let mounts = self.prepare_mounts(&options.mounts).await?;
        self.ensure_image(&image).await?;

        let config = container_config(&image, &options, mounts);
        let create_options = options.name.clone().map(|name| CreateContainerOptions {
            name,
            platform: None,
        });
        self.ensure_open("ContainerCreate")?;
        let response = self
            .call_to_completion(
                "ContainerCreate",
                self.docker.create_container(create_options, config),
            )
            .await?;
        let id = response.id;
        for warning in &response.warnings {
            warn!(container_id = %id, warning = %warning, "Container create warning");
        }
        debug!(container_id = %id, image = %image, "Container created");

        match self.start_and_inspect(&id).await {
            Ok(descriptor) => {
                self.containers.insert(id.clone(), descriptor);
                info!(container_id = %id, image = %image, "Container started");
                Ok(id)
            }
            Err(e) => {
                self.record_orphan(Orphan::Container(id));
                Err(e)
            }
        }
    }

    /// Descriptor of a registered container, as last inspected.
    pub fn get_container(&self, id: &str) -> Result<ContainerDescriptor> {
        self.containers
            .get(id)
            .ok_or_else(|| PoolError::ContainerNotFound(id.to_string()))
    }

    /// `localhost:<host port>` for container port `port` of a registered container.
    ///
    /// Answered from the descriptor taken at creation; use [`Pool::refresh_container`] first if
    /// the container may have been restarted since. Matching rules are those of
    /// [`ContainerDescriptor::host_port`].
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use resource_pool::Pool;
    /// # fn example(pool: &Pool, id: &str) -> resource_pool::Result<()> {
    /// let mysql = pool.get_host_port(id, "3306")?; // e.g. "localhost:49153"
    /// let dns = pool.get_host_port(id, "53/udp")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn get_host_port(&self, id: &str, port: &str) -> Result<String> {
        let container = self.get_container(id)?;
        container
            .host_port(port)
            .map(|host_port| format!("localhost:{host_port}"))
            .ok_or_else(|| PoolError::PortNotFound {
                container: id.to_string(),
                port: port.to_string(),
            })
    }

    /// Re-inspect a registered container and replace its descriptor.
    ///
    /// Use after the container may have restarted, since host ports can change then. Fails with
    /// [`PoolError::ContainerNotFound`] for ids the pool does not hold, including when the pool
    /// closes while the inspect is in flight.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use resource_pool::Pool;
    /// # async fn example(pool: &Pool, id: &str) -> resource_pool::Result<()> {
    /// let container = pool.refresh_container(id).await?;
    /// if container.status.as_deref() != Some("running") {
    ///     eprintln!("{id} is {:?}", container.status);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn refresh_container(&self, id: &str) -> Result<ContainerDescriptor> {
        if !self.containers.contains(id) {
            return Err(PoolError::ContainerNotFound(id.to_string()));
        }
        let info = self
            .call("ContainerInspect", self.docker.inspect_container(id))
            .await?;
        let descriptor = ContainerDescriptor::from_inspect(info)?;
        if !self.containers.replace(id, descriptor.clone()) {
            // Closed while the inspect was in flight.
            return Err(PoolError::ContainerNotFound(id.to_string()));
        }
        Ok(descriptor)
    }

    /// Log the descriptor of a registered container as JSON.
    pub fn log_container(&self, id: &str) -> Result<ContainerDescriptor> {
        let container = self.get_container(id)?;
        match serde_json::to_string(&container) {
            Ok(json) => info!(container_id = %id, container = %json, "Container descriptor"),
            Err(e) => warn!(container_id = %id, error = %e, "Failed to serialize container"),
        }
        Ok(container)
    }

    async fn start_and_inspect(&self, id: &str) -> Result<ContainerDescriptor> {
        self.call("ContainerStart", self.docker.start_container(id))
            .await?;
        let info = self
            .call("ContainerInspect", self.docker.inspect_container(id))
            .await?;
        ContainerDescriptor::from_inspect(info)
    }

    /// Pull `image` unless the engine already has it.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        match self
            .call("ImageInspect", self.docker.inspect_image(image))
            .await
        {
            Ok(_) => {
                debug!(image = %image, "Image present locally");
                return Ok(());
            }
            Err(e @ PoolError::Cancelled { .. }) => return Err(e),
            Err(e) => debug!(image = %image, error = %e, "Image not available locally"),
        }

        info!(image = %image, "Pulling Docker image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        self.guard("ImagePull", async {
            let mut stream = self.docker.create_image_stream(Some(options));
            while let Some(item) = stream.next().await {
                let info = item.map_err(|e| PoolError::remote("ImagePull", e))?;
                if let Some(message) = info.error {
                    return Err(PoolError::Pull {
                        image: image.to_string(),
                        message,
                    });
                }
                if let Some(status) = info.status {
                    debug!(status = %status, "Pull progress");
                }
            }
            Ok(())
        })
        .await?;

        info!(image = %image, "Image pulled successfully");
        Ok(())
    }

    /// Create a host directory under the mount root for each container path.
    async fn prepare_mounts(&self, targets: &[String]) -> Result<Vec<Mount>> {
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let root = self.mount_root()?;
        let mut mounts = Vec::with_capacity(targets.len());
        for target in targets {
            let source = root.join(target.trim_start_matches('/'));
            tokio::fs::create_dir_all(&source)
                .await
                .map_err(|e| PoolError::MountDir {
                    path: source.clone(),
                    source: e,
                })?;
            debug!(source = %source.display(), target = %target, "Prepared bind mount");
            mounts.push(Mount {
                target: Some(target.clone()),
                source: Some(source.to_string_lossy().into_owned()),
                typ: Some(MountTypeEnum::BIND),
                ..Default::default()
            });
        }
        Ok(mounts)
    }

    /// Mount root as an absolute path; the engine rejects relative bind sources.
    fn mount_root(&self) -> Result<PathBuf> {
        let root = &self.config.mount_root;
        if root.is_absolute() {
            return Ok(root.clone());
        }
        std::env::current_dir()
            .map(|cwd| cwd.join(root))
            .map_err(|e| PoolError::MountDir {
                path: root.clone(),
                source: e,
            })
    }
}

fn container_config(image: &str, options: &ContainerOptions, mounts: Vec<Mount>) -> Config<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = options
        .port_keys()
        .into_iter()
        .map(|key| (key, HashMap::new()))
        .collect();
    let networking_config = options.network_id.as_ref().map(|network| NetworkingConfig {
        endpoints_config: HashMap::from([(network.clone(), EndpointSettings::default())]),
    });

    Config {
        image: Some(image.to_string()),
        env: (!options.env.is_empty()).then(|| options.env.clone()),
        cmd: (!options.cmd.is_empty()).then(|| options.cmd.clone()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(HostConfig {
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::ALWAYS),
                ..Default::default()
            }),
            publish_all_ports: Some(true),
            mounts: Some(mounts),
            ..Default::default()
        }),
        networking_config,
        ..Default::default()
    }
}
