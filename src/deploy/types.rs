//! Types for the service-discovery backend API
//!
//! `WorkloadDefinition` serializes to a Marathon application document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Label the proxy reads to build a frontend rule for an application
pub const FRONTEND_RULE_LABEL: &str = "traefik.frontend.rule";

// ============================================================================
// Workload definition
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadDefinition {
    /// Application id, e.g. `/whoami`
    pub id: String,
    pub cpus: f64,
    /// Memory limit in MiB
    pub mem: f64,
    pub instances: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub docker: DockerSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerSpec {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<PortMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,
    /// 0 lets the agent pick a host port
    pub host_port: u16,
    pub protocol: String,
}

impl WorkloadDefinition {
    /// A single-instance Docker workload with an empty image
    pub fn docker(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cpus: 0.1,
            mem: 32.0,
            instances: 1,
            labels: BTreeMap::new(),
            container: Some(ContainerSpec {
                kind: "DOCKER".to_string(),
                docker: DockerSpec {
                    image: String::new(),
                    network: None,
                    port_mappings: Vec::new(),
                },
            }),
        }
    }

    pub fn with_cpus(mut self, cpus: f64) -> Self {
        self.cpus = cpus;
        self
    }

    pub fn with_memory(mut self, mib: f64) -> Self {
        self.mem = mib;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.docker_mut().image = image.into();
        self
    }

    /// Use bridged container networking
    pub fn bridged(mut self) -> Self {
        self.docker_mut().network = Some("BRIDGE".to_string());
        self
    }

    /// Expose a TCP container port on a dynamically assigned host port
    pub fn expose(mut self, container_port: u16) -> Self {
        self.docker_mut().port_mappings.push(PortMapping {
            container_port,
            host_port: 0,
            protocol: "tcp".to_string(),
        });
        self
    }

    fn docker_mut(&mut self) -> &mut DockerSpec {
        &mut self
            .container
            .get_or_insert_with(|| ContainerSpec {
                kind: "DOCKER".to_string(),
                docker: DockerSpec {
                    image: String::new(),
                    network: None,
                    port_mappings: Vec::new(),
                },
            })
            .docker
    }

    /// Path segment form of the id (`/whoami` -> `whoami`)
    pub fn path_id(&self) -> &str {
        self.id.trim_start_matches('/')
    }
}

// ============================================================================
// Backend responses
// ============================================================================

/// Answer to an application submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRef {
    pub deployment_id: String,
    #[serde(default)]
    pub version: String,
}

/// One in-flight deployment as listed by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    pub id: String,
    #[serde(default)]
    pub affected_apps: Vec<String>,
    #[serde(default)]
    pub current_step: u32,
    #[serde(default)]
    pub total_steps: u32,
}
