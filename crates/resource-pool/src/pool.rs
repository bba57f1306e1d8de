//! Pool lifecycle
//!
//! A `Pool` owns one engine client, one cancellation token and the registries of everything it
//! provisioned. `close` cancels the token, waits for creates already in flight to settle, and
//! removes what is registered: networks first (each attached container force-disconnected before
//! the network goes), then containers, then anything left half-created by a failed create.

use crate::config::PoolConfig;
use crate::container::ContainerDescriptor;
use crate::docker::{BollardBridge, DockerBridge};
use crate::error::{is_missing, PoolError, Result};
use crate::network::NetworkDescriptor;
use crate::registry::Registry;
use crate::retry::{self, RetryError, RetryPolicy};
use bollard::container::RemoveContainerOptions;
use bollard::errors::Error as DockerError;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::{task_tracker::TaskTrackerToken, TaskTracker};
use tracing::{debug, info, warn};

/// A resource created remotely but never registered, because a later step of its create failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Orphan {
    Container(String),
    Network(String),
}

/// Disposable containers and networks on one Docker engine.
///
/// Every resource the pool creates is registered under its engine id and removed again by
/// [`Pool::close`]. All methods take `&self`; share the pool behind an `Arc` to create from
/// several tasks at once.
///
/// # Examples
///
/// ```no_run
/// use resource_pool::{ContainerOptions, Pool};
/// use std::sync::Arc;
///
/// # async fn example() -> resource_pool::Result<()> {
/// let pool = Arc::new(Pool::new("")?);
/// let mut creates = Vec::new();
/// for _ in 0..3 {
///     let pool = pool.clone();
///     creates.push(tokio::spawn(async move {
///         pool.create_container("redis", ContainerOptions::new().exposed_ports(["6379"]))
///             .await
///     }));
/// }
/// for create in creates {
///     let id = create.await.expect("create task panicked")?;
///     println!("redis at {}", pool.get_host_port(&id, "6379")?);
/// }
/// pool.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Pool {
    cancel: CancellationToken,
    /// Creates that have passed the open check and not yet returned.
    in_flight: TaskTracker,
    pub(crate) docker: Arc<dyn DockerBridge>,
    pub(crate) config: PoolConfig,
    pub(crate) containers: Registry<ContainerDescriptor>,
    pub(crate) networks: Registry<NetworkDescriptor>,
    orphans: Mutex<Vec<Orphan>>,
}

impl Pool {
    /// Connect to `endpoint`, or to the environment's engine when it is empty.
    ///
    /// No request is sent; an unreachable engine surfaces on the first create.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use resource_pool::Pool;
    ///
    /// # fn example() -> resource_pool::Result<()> {
    /// // DOCKER_HOST, then DOCKER_URL, then the platform socket.
    /// let local = Pool::new("")?;
    /// let remote = Pool::new("tcp://build-host:2375")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(endpoint: &str) -> Result<Self> {
        let mut config = PoolConfig::from_env();
        if !endpoint.is_empty() {
            config.endpoint = Some(endpoint.to_string());
        }
        Self::from_config(config)
    }

    pub fn from_config(config: PoolConfig) -> Result<Self> {
        let endpoint = config.resolved_endpoint();
        let bridge =
            BollardBridge::connect(&endpoint, config.client_timeout).map_err(PoolError::Client)?;
        info!(endpoint = %endpoint, "Docker client ready");
        Ok(Self::with_bridge(bridge, config))
    }

    /// Build a pool around any bridge implementation.
    pub fn with_bridge(docker: impl DockerBridge + 'static, config: PoolConfig) -> Self {
        Self::from_bridge(Arc::new(docker), config)
    }

    pub fn from_bridge(docker: Arc<dyn DockerBridge>, config: PoolConfig) -> Self {
        Self {
            cancel: CancellationToken::new(),
            in_flight: TaskTracker::new(),
            docker,
            config,
            containers: Registry::new(),
            networks: Registry::new(),
            orphans: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Token cancelled when the pool closes. Hand out child tokens to tie caller work to the
    /// pool's lifetime.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use resource_pool::Pool;
    /// # use std::time::Duration;
    /// # async fn example(pool: &Pool) {
    /// let token = pool.cancellation_token().child_token();
    /// tokio::spawn(async move {
    ///     // Tail logs until the pool closes.
    ///     tokio::select! {
    ///         _ = token.cancelled() => {}
    ///         _ = tokio::time::sleep(Duration::from_secs(3600)) => {}
    ///     }
    /// });
    /// # }
    /// ```
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Ids of the registered containers, sorted.
    pub fn container_ids(&self) -> Vec<String> {
        self.containers.ids()
    }

    /// Ids of the registered networks, sorted.
    pub fn network_ids(&self) -> Vec<String> {
        self.networks.ids()
    }

    /// Retry `probe` under the pool's lifetime, bounded by `max_retry_wait`.
    ///
    /// Up to [`crate::MAX_RETRY_ATTEMPTS`] attempts with exponential backoff. Closing the pool
    /// stops the loop at its next check.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use resource_pool::Pool;
    /// use tokio::net::TcpStream;
    ///
    /// # async fn example(pool: &Pool, address: &str) {
    /// match pool.retry(|| TcpStream::connect(address)).await {
    ///     Ok(_) => println!("{address} is accepting connections"),
    ///     Err(e) => eprintln!("gave up after {} attempts: {e}", e.attempts()),
    /// }
    /// # }
    /// ```
    pub async fn retry<T, E, F, Fut>(&self, probe: F) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        let policy = RetryPolicy::default().with_max_elapsed(self.config.max_retry_wait);
        self.retry_with(&policy, probe).await
    }

    /// Like [`Pool::retry`] with an explicit policy.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use resource_pool::{FixedBackoff, Pool, RetryPolicy};
    /// use std::time::Duration;
    /// use tokio::net::TcpStream;
    ///
    /// # async fn example(pool: &Pool) {
    /// let policy = RetryPolicy::default()
    ///     .with_max_attempts(5)
    ///     .with_backoff(FixedBackoff(Duration::from_millis(200)));
    /// let connected = pool
    ///     .retry_with(&policy, || TcpStream::connect("localhost:5432"))
    ///     .await
    ///     .is_ok();
    /// # }
    /// ```
    pub async fn retry_with<T, E, F, Fut>(
        &self,
        policy: &RetryPolicy,
        probe: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        retry::retry(&self.cancel, policy, probe).await
    }

    /// Tear down everything the pool provisioned.
    ///
    /// Cancels the pool token first, so new creates are refused and in-flight ones stop at their
    /// next cancellable step. Removal starts only once every in-flight create has returned; a
    /// create that already has an engine id by then leaves it in the orphan list, which is
    /// drained last.
    ///
    /// Each teardown call gets `teardown_timeout`; a resource already gone (404) is logged and
    /// skipped. The first other failure is returned and the resources not yet removed stay
    /// registered, so calling `close` again retries them. Closing a drained pool is a no-op.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use resource_pool::{ContainerOptions, Pool};
    ///
    /// # async fn example() -> resource_pool::Result<()> {
    /// let pool = Pool::new("")?;
    /// let outcome = pool.create_container("postgres", ContainerOptions::new()).await;
    /// // Close even when the create failed; it may have left a half-created container.
    /// pool.close().await?;
    /// outcome?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        self.in_flight.close();
        if !self.in_flight.is_empty() {
            debug!(in_flight = self.in_flight.len(), "Waiting for in-flight creates");
        }
        self.in_flight.wait().await;

        let networks = self
            .networks
            .drain_and_remove(|id, _| self.teardown_network(id))
            .await?;
        let containers = self
            .containers
            .drain_and_remove(|id, _| self.teardown_container(id))
            .await?;
        let orphans = self.remove_orphans().await?;

        if networks + containers + orphans > 0 {
            info!(networks, containers, orphans, "Pool closed");
        } else {
            debug!("Pool closed with nothing to remove");
        }
        Ok(())
    }

    pub(crate) fn record_orphan(&self, orphan: Orphan) {
        warn!(orphan = ?orphan, "Resource left unregistered, removing it on close");
        self.orphans.lock().push(orphan);
    }

    #[cfg(test)]
    pub(crate) fn orphans(&self) -> Vec<Orphan> {
        self.orphans.lock().clone()
    }

    async fn remove_orphans(&self) -> Result<usize> {
        let mut removed = 0;
        loop {
            let next = self.orphans.lock().first().cloned();
            let Some(orphan) = next else {
                return Ok(removed);
            };
            match &orphan {
                Orphan::Container(id) => self.teardown_container(id.clone()).await?,
                Orphan::Network(id) => self.teardown_network(id.clone()).await?,
            }
            self.orphans.lock().retain(|o| o != &orphan);
            removed += 1;
        }
    }

    /// Race a pool operation against the lifetime token.
    pub(crate) async fn guard<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PoolError::Cancelled { op }),
            result = fut => result,
        }
    }

    /// One engine call, cancellable, with its error tagged by `op`.
    pub(crate) async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, DockerError>>,
    {
        self.guard(op, async { fut.await.map_err(|e| PoolError::remote(op, e)) })
            .await
    }

    /// Refuse to start new work on a closed pool.
    pub(crate) fn ensure_open(&self, op: &'static str) -> Result<()> {
        if self.is_closed() {
            return Err(PoolError::Cancelled { op });
        }
        Ok(())
    }

    /// Admit a create. `close` waits until the returned token is dropped before it drains.
    ///
    /// The token is taken before the open check: either `close` sees it and waits, or the
    /// create sees the cancelled pool and stops.
    pub(crate) fn begin_create(&self, op: &'static str) -> Result<TaskTrackerToken> {
        let token = self.in_flight.token();
        self.ensure_open(op)?;
        Ok(token)
    }

    /// An engine call that creates a resource. Not raced against the pool token: once the
    /// engine has been asked, the caller must learn the id to be able to remove it.
    pub(crate) async fn call_to_completion<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, DockerError>>,
    {
        fut.await.map_err(|e| PoolError::remote(op, e))
    }

    /// One engine call made while tearing down. Bounded by `teardown_timeout`; `Ok(None)` when
    /// the resource is already gone.
    pub(crate) async fn teardown_call<T, F>(
        &self,
        op: &'static str,
        target: &str,
        fut: F,
    ) -> Result<Option<T>>
    where
        F: Future<Output = std::result::Result<T, DockerError>>,
    {
        let timeout = self.config.teardown_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Err(_) => Err(PoolError::Timeout { op, timeout }),
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(e)) if is_missing(&e) => {
                warn!(op, target = %target, "Resource already removed");
                Ok(None)
            }
            Ok(Err(e)) => Err(PoolError::remote(op, e)),
        }
    }

    async fn teardown_container(&self, id: String) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        if self
            .teardown_call(
                "ContainerRemove",
                &id,
                self.docker.remove_container(&id, Some(options)),
            )
            .await?
            .is_some()
        {
            debug!(container_id = %id, "Container removed");
        }
        Ok(())
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.cancel.cancel();
        let containers = self.containers.len();
        let networks = self.networks.len();
        let orphans = self.orphans.lock().len();
        if containers + networks + orphans > 0 {
            warn!(
                containers,
                networks, orphans, "Pool dropped without close, resources left behind"
            );
        }
    }
}
