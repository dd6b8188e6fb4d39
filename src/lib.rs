//! Integration-test harness for a reverse proxy that discovers its backends
//! from a Marathon/Mesos environment.
//!
//! The harness brings up the orchestrated environment, reconciles container
//! addresses into the hosts table, runs the proxy under a rendered
//! configuration, deploys workloads through the backend API and polls the
//! proxy until the expected routes appear.

pub mod config;
pub mod deploy;
pub mod environment;
pub mod error;
pub mod poll;
pub mod scenarios;
pub mod subject;
pub mod suite;

pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
