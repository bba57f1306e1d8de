//! Docker engine bridge
//!
//! `DockerBridge` is the narrow slice of the engine API the pool consumes. `BollardBridge`
//! forwards each call to a `bollard::Docker` client, negotiating the API version with the
//! daemon on first use; tests substitute an in-memory double.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerCreateResponse, ContainerInspectResponse, CreateImageInfo, ImageInspect, Network,
};
use bollard::network::{CreateNetworkOptions, DisconnectNetworkOptions, InspectNetworkOptions};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

pub type ImageStream = Pin<Box<dyn Stream<Item = Result<CreateImageInfo, DockerError>> + Send>>;

/// Engine operations used by the pool.
///
/// Errors are bollard's own so callers can tell a 404 from a transport failure.
///
/// # Examples
///
/// Any implementation can back a pool:
///
/// ```no_run
/// use resource_pool::{BollardBridge, DockerBridge, Pool, PoolConfig};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bridge = BollardBridge::connect("unix:///var/run/docker.sock", Duration::from_secs(60))?;
/// if bridge.inspect_image("alpine:latest").await.is_err() {
///     println!("alpine will be pulled on first use");
/// }
/// let pool = Pool::with_bridge(bridge, PoolConfig::default());
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait DockerBridge: Send + Sync {
    /// Inspect a local image. An error means the image is not available locally (or the
    /// engine could not be asked).
    async fn inspect_image(&self, image: &str) -> Result<ImageInspect, DockerError>;

    /// Pull progress for an image; the pull runs as the stream is polled.
    fn create_image_stream(&self, options: Option<CreateImageOptions<String>>) -> ImageStream;

    async fn create_container(
        &self,
        options: Option<CreateContainerOptions<String>>,
        config: Config<String>,
    ) -> Result<ContainerCreateResponse, DockerError>;

    async fn start_container(&self, id: &str) -> Result<(), DockerError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspectResponse, DockerError>;

    async fn remove_container(
        &self,
        id: &str,
        options: Option<RemoveContainerOptions>,
    ) -> Result<(), DockerError>;

    /// Create a network and return the id the engine assigned to it.
    async fn create_network(
        &self,
        options: CreateNetworkOptions<String>,
    ) -> Result<String, DockerError>;

    /// Inspect a network by id or name.
    async fn inspect_network(&self, network: &str) -> Result<Network, DockerError>;

    async fn disconnect_network(
        &self,
        network: &str,
        options: DisconnectNetworkOptions<String>,
    ) -> Result<(), DockerError>;

    async fn remove_network(&self, network: &str) -> Result<(), DockerError>;
}

/// [`DockerBridge`] over a `bollard::Docker` client.
///
/// The client starts out speaking bollard's default API version. The first call negotiates
/// the version with the daemon and every later call reuses the negotiated client, so an older
/// daemon is spoken to in a version it understands. A failed negotiation is not cached; that
/// call goes out with the default version and the next one tries again.
#[derive(Clone)]
pub struct BollardBridge {
    docker: Docker,
    negotiated: OnceCell<Docker>,
}

impl BollardBridge {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            negotiated: OnceCell::new(),
        }
    }

    /// Build a client for `endpoint` without contacting the daemon.
    ///
    /// # Examples
    ///
    /// ```
    /// use resource_pool::BollardBridge;
    /// use std::time::Duration;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// // Nothing listens here; no request is made until the first call.
    /// let bridge = BollardBridge::connect("tcp://127.0.0.1:1", Duration::from_secs(5));
    /// assert!(bridge.is_ok());
    /// # }
    /// ```
    pub fn connect(endpoint: &str, timeout: Duration) -> Result<Self, DockerError> {
        connect(endpoint, timeout).map(Self::new)
    }

    /// The client to issue requests with, negotiating the API version on first use.
    async fn client(&self) -> &Docker {
        let negotiated = self
            .negotiated
            .get_or_try_init(|| async {
                let docker = self.docker.clone().negotiate_version().await?;
                debug!(version = ?docker.client_version(), "Negotiated Docker API version");
                Ok::<_, DockerError>(docker)
            })
            .await;
        match negotiated {
            Ok(docker) => docker,
            Err(e) => {
                warn!(error = %e, "Docker API version negotiation failed, using client default");
                &self.docker
            }
        }
    }

    /// The negotiated client if negotiation already happened, otherwise the default one.
    fn current_client(&self) -> &Docker {
        self.negotiated.get().unwrap_or(&self.docker)
    }
}

/// Create a bollard client for `endpoint`.
///
/// `tcp://` and `http://` endpoints use the HTTP transport; anything else (`unix://`,
/// `npipe://` or a bare socket path) uses the local socket transport. The client speaks
/// bollard's default API version and does no I/O here; [`BollardBridge`] negotiates on first
/// use.
pub fn connect(endpoint: &str, timeout: Duration) -> Result<Docker, DockerError> {
    let timeout_secs = timeout.as_secs();
    if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") {
        debug!(endpoint = %endpoint, "Connecting to Docker over HTTP");
        Docker::connect_with_http(endpoint, timeout_secs, API_DEFAULT_VERSION)
    } else {
        debug!(endpoint = %endpoint, "Connecting to Docker over local socket");
        Docker::connect_with_socket(endpoint, timeout_secs, API_DEFAULT_VERSION)
    }
}

#[async_trait]
impl DockerBridge for BollardBridge {
    async fn inspect_image(&self, image: &str) -> Result<ImageInspect, DockerError> {
        self.client().await.inspect_image(image).await
    }

    fn create_image_stream(&self, options: Option<CreateImageOptions<String>>) -> ImageStream {
        // `inspect_image` always runs first, so the version is negotiated by now.
        Box::pin(self.current_client().create_image(options, None, None))
    }

    async fn create_container(
        &self,
        options: Option<CreateContainerOptions<String>>,
        config: Config<String>,
    ) -> Result<ContainerCreateResponse, DockerError> {
        self.client().await.create_container(options, config).await
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        self.client()
            .await
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspectResponse, DockerError> {
        self.client()
            .await
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
    }

    async fn remove_container(
        &self,
        id: &str,
        options: Option<RemoveContainerOptions>,
    ) -> Result<(), DockerError> {
        self.client().await.remove_container(id, options).await
    }

    async fn create_network(
        &self,
        options: CreateNetworkOptions<String>,
    ) -> Result<String, DockerError> {
        let name = options.name.clone();
        let response = self.client().await.create_network(options).await?;
        if response.id.is_empty() {
            // Names are unique under check_duplicate, so the name still addresses it.
            warn!(network = %name, "Engine returned no network id, using the name");
            return Ok(name);
        }
        Ok(response.id)
    }

    async fn inspect_network(&self, network: &str) -> Result<Network, DockerError> {
        self.client()
            .await
            .inspect_network(network, None::<InspectNetworkOptions<String>>)
            .await
    }

    async fn disconnect_network(
        &self,
        network: &str,
        options: DisconnectNetworkOptions<String>,
    ) -> Result<(), DockerError> {
        self.client()
            .await
            .disconnect_network(network, options)
            .await
    }

    async fn remove_network(&self, network: &str) -> Result<(), DockerError> {
        self.client().await.remove_network(network).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_does_not_touch_the_daemon() {
        // Nothing listens here; construction must still succeed.
        assert!(BollardBridge::connect("tcp://127.0.0.1:1", Duration::from_secs(1)).is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_accepts_unix_socket_endpoint() {
        assert!(connect(
            "unix:///nonexistent/docker.sock",
            Duration::from_secs(1)
        )
        .is_ok());
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_bollard_bridge_inspects_missing_image() {
        let endpoint = crate::config::resolve_endpoint(None);
        let bridge = BollardBridge::connect(&endpoint, Duration::from_secs(30)).unwrap();
        let err = bridge
            .inspect_image("resource-pool/does-not-exist:never")
            .await
            .unwrap_err();
        assert!(crate::error::is_missing(&err));
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_bollard_bridge_negotiates_api_version() {
        let endpoint = crate::config::resolve_endpoint(None);
        let bridge = BollardBridge::connect(&endpoint, Duration::from_secs(30)).unwrap();
        assert!(bridge.negotiated.get().is_none());

        let client = bridge.client().await;
        let negotiated = client.client_version();
        let server = client.version().await.unwrap();

        assert!(bridge.negotiated.get().is_some());
        // The negotiated version never exceeds what the daemon speaks.
        let server_version = server.api_version.unwrap();
        let (major, minor) = server_version.split_once('.').unwrap();
        let server_minor: usize = minor.parse().unwrap();
        assert_eq!(negotiated.major_version, major.parse::<usize>().unwrap());
        assert!(negotiated.minor_version <= server_minor);

        // A full round trip works on the negotiated client.
        let err = bridge
            .inspect_network("resource-pool-does-not-exist")
            .await
            .unwrap_err();
        assert!(crate::error::is_missing(&err));
    }
}
