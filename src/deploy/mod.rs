//! Deployment driver for the service-discovery backend
//!
//! ```rust,ignore
//! let client = BackendClient::new(&backend_url, Duration::from_secs(1))?;
//! let driver = DeploymentDriver::new(client, DeploymentTimeouts::default());
//! driver.deploy(&WorkloadDefinition::docker("/whoami").with_image("emilevauge/whoami")).await?;
//! ```

mod client;
pub mod types;

pub use client::{BackendClient, DeploymentDriver, DeploymentTimeouts};
pub use types::{
    ContainerSpec, DeploymentRef, DeploymentStatus, DockerSpec, FRONTEND_RULE_LABEL, PortMapping,
    WorkloadDefinition,
};
