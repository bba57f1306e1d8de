//! Container creation options
//!
//! `ContainerOptions` is a plain value assembled with chained builder methods. Scalar setters
//! overwrite (last call wins); list setters append in call order. Nothing is validated here:
//! a malformed env entry or port only fails once the engine sees it. The one check made before
//! any remote call is that the repository is non-empty, see [`ContainerOptions::image_reference`].

use crate::error::{PoolError, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TAG: &str = "latest";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOptions {
    pub name: Option<String>,
    pub tag: String,
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    pub network_id: Option<String>,
    pub exposed_ports: Vec<String>,
    pub mounts: Vec<String>,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            name: None,
            tag: DEFAULT_TAG.to_string(),
            env: Vec::new(),
            cmd: Vec::new(),
            network_id: None,
            exposed_ports: Vec::new(),
            mounts: Vec::new(),
        }
    }
}

impl ContainerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Container name. Empty means the engine picks one.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into()).filter(|n: &String| !n.is_empty());
        self
    }

    /// Image tag, `latest` by default.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Append `KEY=VALUE` environment entries.
    pub fn env<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env.extend(env.into_iter().map(Into::into));
        self
    }

    /// Append command arguments.
    pub fn cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd.extend(cmd.into_iter().map(Into::into));
        self
    }

    /// Attach the container to this network at creation time.
    ///
    /// The id is passed to the engine as the container's endpoint configuration, so the
    /// container joins the network before it starts.
    pub fn network(mut self, network_id: impl Into<String>) -> Self {
        self.network_id = Some(network_id.into()).filter(|n: &String| !n.is_empty());
        self
    }

    /// Append container ports to expose, e.g. `"3306"` or `"53/udp"`. Exposed ports are
    /// published to random host ports.
    pub fn exposed_ports<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exposed_ports.extend(ports.into_iter().map(Into::into));
        self
    }

    /// Append container paths to bind-mount from a host directory under the pool's mount root.
    pub fn mounts<I, S>(mut self, mounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mounts.extend(mounts.into_iter().map(Into::into));
        self
    }

    /// `repository:tag`, rejecting an empty repository.
    pub fn image_reference(&self, repository: &str) -> Result<String> {
        if repository.is_empty() {
            return Err(PoolError::EmptyRepository);
        }
        Ok(format!("{}:{}", repository, self.tag))
    }

    /// Exposed ports keyed the way the engine expects them (`3306` becomes `3306/tcp`).
    pub(crate) fn port_keys(&self) -> Vec<String> {
        self.exposed_ports
            .iter()
            .map(|port| {
                if port.contains('/') {
                    port.clone()
                } else {
                    format!("{port}/tcp")
                }
            })
            .collect()
    }
}
