//! Network provisioning

use crate::error::{PoolError, Result};
use crate::pool::{Orphan, Pool};
use bollard::models::Network;
use bollard::network::{CreateNetworkOptions, DisconnectNetworkOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// A network created by the pool, as inspected after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    pub id: String,
    pub name: String,
    /// Containers attached when the network was inspected.
    pub containers: BTreeSet<String>,
    pub inspected_at: DateTime<Utc>,
}

impl NetworkDescriptor {
    pub fn from_inspect(network: Network) -> Result<Self> {
        let id = network
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PoolError::Descriptor {
                op: "NetworkInspect",
                reason: "engine returned a network without an id".to_string(),
            })?;
        Ok(Self {
            id,
            name: network.name.unwrap_or_default(),
            containers: network
                .containers
                .map(|containers| containers.into_keys().collect())
                .unwrap_or_default(),
            inspected_at: Utc::now(),
        })
    }
}

impl Pool {
    /// Create a bridge network named `name` and register it.
    ///
    /// The engine rejects a name that is already taken (409). The network is inspected by the
    /// id the engine returned; if that inspect fails the network is left for `close` to remove.
    /// The returned descriptor's `id` is what [`crate::ContainerOptions::network`] expects.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use resource_pool::{ContainerOptions, Pool};
    ///
    /// # async fn example(pool: &Pool) -> resource_pool::Result<()> {
    /// let network = pool.create_network("backend").await?;
    /// let db = pool
    ///     .create_container("postgres", ContainerOptions::new().network(&network.id))
    ///     .await?;
    /// assert!(pool.get_container(&db)?.networks.contains(&network.name));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_network(&self, name: &str) -> Result<NetworkDescriptor> {
        let _in_flight = self.begin_create("NetworkCreate")?;

        let options = CreateNetworkOptions {
            name: name.to_string(),
            check_duplicate: true,
            ..Default::default()
        };
        let id = self
            .call_to_completion("NetworkCreate", self.docker.create_network(options))
            .await?;
        debug!(network = %name, network_id = %id, "Network created");

        let network = match self
            .call("NetworkInspect", self.docker.inspect_network(&id))
            .await
            .and_then(NetworkDescriptor::from_inspect)
        {
            Ok(network) => network,
            Err(e) => {
                self.record_orphan(Orphan::Network(id));
                return Err(e);
            }
        };

        self.networks.insert(network.id.clone(), network.clone());
        info!(network = %network.name, network_id = %network.id, "Created Docker network");
        Ok(network)
    }

    /// Descriptor of a registered network, as inspected at creation.
    ///
    /// `containers` is not kept up to date; `close` re-inspects before it disconnects.
    pub fn get_network(&self, id: &str) -> Result<NetworkDescriptor> {
        self.networks
            .get(id)
            .ok_or_else(|| PoolError::NetworkNotFound(id.to_string()))
    }

    /// Disconnect every container currently attached to `network`, then remove it.
    ///
    /// Attachments are read from a fresh inspect, so containers joined after creation (by this
    /// pool or anyone else) are disconnected too.
    pub(crate) async fn teardown_network(&self, network: String) -> Result<()> {
        let Some(inspected) = self
            .teardown_call(
                "NetworkInspect",
                &network,
                self.docker.inspect_network(&network),
            )
            .await?
        else {
            return Ok(());
        };

        let attached: BTreeSet<String> = inspected
            .containers
            .map(|containers| containers.into_keys().collect())
            .unwrap_or_default();
        for container in attached {
            let options = DisconnectNetworkOptions {
                container: container.clone(),
                force: true,
            };
            self.teardown_call(
                "NetworkDisconnect",
                &container,
                self.docker.disconnect_network(&network, options),
            )
            .await?;
            debug!(network_id = %network, container_id = %container, "Disconnected container");
        }

        if self
            .teardown_call(
                "NetworkRemove",
                &network,
                self.docker.remove_network(&network),
            )
            .await?
            .is_some()
        {
            debug!(network_id = %network, "Network removed");
        }
        Ok(())
    }
}
