//! Resource Pool
//!
//! Provisions throwaway Docker containers and networks for integration tests and tears every
//! one of them down again. Provides:
//! - Container creation from `repository:tag` with env, command, published ports and bind
//!   mounts, pulling the image when it is missing
//! - Bridge networks that containers join at creation time
//! - Host port lookup for published container ports
//! - Bounded, cancellable retry for readiness probes
//! - Ordered teardown on `close`: networks (after disconnecting every attached container),
//!   then containers
//!
//! ## Endpoint Selection
//!
//! Priority order:
//! 1. Endpoint passed to [`Pool::new`] or set in [`PoolConfig`]
//! 2. `DOCKER_HOST`
//! 3. `DOCKER_URL`
//! 4. `unix:///var/run/docker.sock` (`http://localhost:2375` on Windows)
//!
//! ```no_run
//! use resource_pool::{ContainerOptions, Pool};
//!
//! # async fn run() -> resource_pool::Result<()> {
//! let pool = Pool::new("")?;
//! let id = pool
//!     .create_container(
//!         "mysql",
//!         ContainerOptions::new()
//!             .env(["MYSQL_ROOT_PASSWORD=secret"])
//!             .exposed_ports(["3306"]),
//!     )
//!     .await?;
//! let address = pool.get_host_port(&id, "3306")?;
//! println!("mysql listening on {address}");
//! pool.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod container;
pub mod docker;
pub mod error;
pub mod network;
pub mod options;
pub mod pool;
pub mod registry;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{resolve_endpoint, PoolConfig};
pub use container::{ContainerDescriptor, MountPair};
pub use docker::{BollardBridge, DockerBridge};
pub use error::{PoolError, Result};
pub use network::NetworkDescriptor;
pub use options::{ContainerOptions, DEFAULT_TAG};
pub use pool::Pool;
pub use retry::{
    retry, Backoff, ExponentialBackoff, FixedBackoff, RetryError, RetryPolicy, MAX_RETRY_ATTEMPTS,
};
