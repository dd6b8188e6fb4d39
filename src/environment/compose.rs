//! Orchestrated environment control and container address lookup
//!
//! The environment is a docker compose project. Every harness run gets its
//! own project name so leftovers from an aborted run never collide with the
//! current one.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, Result};

/// A running container of the orchestrated environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Logical (compose service) name
    pub name: String,
    /// Runtime container id
    pub id: String,
    pub ip: IpAddr,
}

/// Lifecycle control over a multi-container environment
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Human-readable environment name
    fn name(&self) -> &str;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Resolve the running container for a declared service
    async fn inspect(&self, service: &str) -> Result<ContainerHandle>;

    /// Best-effort synchronous stop, used when no async teardown ran
    fn stop_blocking(&self);
}

/// Resolve `service` to its network address.
///
/// The container must already be running; placement is synchronous with
/// environment start, so a missing address is a hard failure and is not
/// retried.
pub async fn container_address<O: Orchestrator + ?Sized>(
    orchestrator: &O,
    service: &str,
) -> Result<ContainerHandle> {
    let handle = orchestrator.inspect(service).await.map_err(|e| match e {
        HarnessError::Setup(_) => e,
        other => HarnessError::setup(format!("cannot resolve container {}: {}", service, other)),
    })?;
    debug!(service = %service, ip = %handle.ip, "Resolved container address");
    Ok(handle)
}

// ============================================================================
// docker inspect document
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectDocument {
    id: String,
    #[serde(default)]
    state: Option<InspectState>,
    network_settings: NetworkSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    running: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkSettings {
    #[serde(default, rename = "IPAddress")]
    ip_address: String,
    #[serde(default)]
    networks: Option<HashMap<String, NetworkEndpoint>>,
}

#[derive(Debug, Deserialize)]
struct NetworkEndpoint {
    #[serde(default, rename = "IPAddress")]
    ip_address: String,
}

/// Build a `ContainerHandle` from `docker inspect` output (a JSON array)
pub fn parse_inspect(service: &str, json: &str) -> Result<ContainerHandle> {
    let docs: Vec<InspectDocument> = serde_json::from_str(json)?;
    let doc = docs
        .into_iter()
        .next()
        .ok_or_else(|| HarnessError::setup(format!("no container found for {}", service)))?;

    if let Some(state) = &doc.state {
        if !state.running {
            return Err(HarnessError::setup(format!("container {} is not running", service)));
        }
    }

    // Compose v2 user networks leave the top-level address empty
    let mut address = doc.network_settings.ip_address.clone();
    if address.is_empty() {
        if let Some(networks) = &doc.network_settings.networks {
            let mut names: Vec<&String> = networks.keys().collect();
            names.sort();
            address = names
                .into_iter()
                .map(|n| networks[n].ip_address.clone())
                .find(|ip| !ip.is_empty())
                .unwrap_or_default();
        }
    }

    if address.is_empty() {
        return Err(HarnessError::setup(format!(
            "container {} has no IP address",
            service
        )));
    }

    let ip = address.parse::<IpAddr>().map_err(|e| {
        HarnessError::setup(format!("container {} has invalid IP {:?}: {}", service, address, e))
    })?;

    Ok(ContainerHandle {
        name: service.to_string(),
        id: doc.id,
        ip,
    })
}

// ============================================================================
// docker compose CLI
// ============================================================================

/// A compose project driven through the `docker compose` CLI
#[derive(Debug, Clone)]
pub struct ComposeProject {
    project: String,
    file: PathBuf,
    docker_binary: String,
}

impl ComposeProject {
    pub fn new(project: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            file: file.into(),
            docker_binary: "docker".to_string(),
        }
    }

    pub fn with_docker_binary(mut self, binary: impl Into<String>) -> Self {
        self.docker_binary = binary.into();
        self
    }

    fn compose_args(&self) -> Vec<String> {
        vec![
            "compose".to_string(),
            "-p".to_string(),
            self.project.clone(),
            "-f".to_string(),
            self.file.to_string_lossy().into_owned(),
        ]
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        debug!(binary = %self.docker_binary, ?args, "Running docker command");
        let output = Command::new(&self.docker_binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                HarnessError::Orchestrator(format!("failed to run {}: {}", self.docker_binary, e))
            })?;

        if !output.status.success() {
            return Err(HarnessError::Orchestrator(format!(
                "{} {} exited with {}: {}",
                self.docker_binary,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn compose(&self, extra: &[&str]) -> Result<String> {
        let mut args = self.compose_args();
        args.extend(extra.iter().map(|s| s.to_string()));
        self.run(&args).await
    }
}

#[async_trait]
impl Orchestrator for ComposeProject {
    fn name(&self) -> &str {
        &self.project
    }

    async fn start(&self) -> Result<()> {
        info!(project = %self.project, file = %self.file.display(), "Starting compose project");
        self.compose(&["up", "-d"]).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        info!(project = %self.project, "Stopping compose project");
        self.compose(&["down", "--volumes", "--remove-orphans"]).await?;
        Ok(())
    }

    async fn inspect(&self, service: &str) -> Result<ContainerHandle> {
        let ids = self.compose(&["ps", "-q", service]).await?;
        let id = ids
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| HarnessError::setup(format!("service {} has no container", service)))?
            .to_string();

        let json = self.run(&["inspect".to_string(), id]).await?;
        parse_inspect(service, &json)
    }

    fn stop_blocking(&self) {
        let mut args = self.compose_args();
        args.extend(["down", "--volumes", "--remove-orphans"].map(String::from));
        match std::process::Command::new(&self.docker_binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {
                info!(project = %self.project, "Compose project stopped");
            }
            Ok(status) => warn!(project = %self.project, %status, "Compose down failed"),
            Err(e) => warn!(project = %self.project, error = %e, "Compose down failed"),
        }
    }
}
