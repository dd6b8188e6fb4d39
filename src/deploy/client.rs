//! Service-discovery backend client and deployment driver

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, info};
use url::Url;

use super::types::{DeploymentRef, DeploymentStatus, WorkloadDefinition};
use crate::error::{HarnessError, Result};
use crate::poll::{self, ObservedResponse, ResponseCondition};

/// Thin REST client over the backend's liveness, app and deployment APIs
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base: Url,
    interval: Duration,
}

impl BackendClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| HarnessError::Deployment(format!("invalid backend URL {}: {}", base_url, e)))?;

        let http = Client::builder()
            .timeout(request_timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base,
            interval: poll::DEFAULT_INTERVAL,
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| HarnessError::Deployment(format!("invalid endpoint {}: {}", path, e)))
    }

    /// Block until `GET /ping` answers 200 or `timeout` elapses
    pub async fn wait_until_live(&self, timeout: Duration) -> Result<ObservedResponse> {
        let url = self.endpoint("ping")?;
        info!(url = %url, ?timeout, "Waiting for backend to become ready");
        poll::get_request(
            &self.http,
            url.as_str(),
            timeout,
            self.interval,
            &ResponseCondition::status_code_is(200),
        )
        .await
    }

    /// Submit `workload` as a create-or-update. Not retried.
    pub async fn submit(&self, workload: &WorkloadDefinition, force: bool) -> Result<DeploymentRef> {
        let mut url = self.endpoint(&format!("v2/apps/{}", workload.path_id()))?;
        url.query_pairs_mut()
            .append_pair("force", if force { "true" } else { "false" });

        info!(app = %workload.id, url = %url, "Deploying test application");
        let resp = self.http.put(url).json(workload).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(HarnessError::Deployment(format!(
                "submitting {} returned {}: {}",
                workload.id, status, body
            )));
        }

        let deployment: DeploymentRef = serde_json::from_str(&body).map_err(|e| {
            HarnessError::Deployment(format!("unexpected submission answer {:?}: {}", body, e))
        })?;
        debug!(app = %workload.id, deployment = %deployment.deployment_id, "Submission accepted");
        Ok(deployment)
    }

    /// In-flight deployments
    pub async fn deployments(&self) -> Result<Vec<DeploymentStatus>> {
        let resp = self.http.get(self.endpoint("v2/deployments")?).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(HarnessError::Deployment(format!(
                "listing deployments returned {}",
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }

    pub async fn is_deployment_active(&self, deployment_id: &str) -> Result<bool> {
        Ok(self
            .deployments()
            .await?
            .iter()
            .any(|d| d.id == deployment_id))
    }

    /// Block until the backend no longer lists `deployment_id` as in flight.
    ///
    /// Listing errors while waiting are retried like any other poll failure.
    pub async fn wait_on_deployment(&self, deployment_id: &str, timeout: Duration) -> Result<()> {
        info!(deployment = %deployment_id, ?timeout, "Waiting for deployment to complete");
        poll::poll_until(
            || self.is_deployment_active(deployment_id),
            |active| !*active,
            timeout,
            self.interval,
        )
        .await
        .into_result(&format!("deployment {}", deployment_id))
        .map(|_| ())
    }
}

/// Timeouts governing one deployment
#[derive(Debug, Clone, Copy)]
pub struct DeploymentTimeouts {
    pub liveness: Duration,
    pub convergence: Duration,
}

impl Default for DeploymentTimeouts {
    fn default() -> Self {
        Self {
            liveness: Duration::from_secs(60),
            convergence: Duration::from_secs(120),
        }
    }
}

/// Publishes workloads and waits for them to converge
#[derive(Debug, Clone)]
pub struct DeploymentDriver {
    client: BackendClient,
    timeouts: DeploymentTimeouts,
}

impl DeploymentDriver {
    pub fn new(client: BackendClient, timeouts: DeploymentTimeouts) -> Self {
        Self { client, timeouts }
    }

    pub fn client(&self) -> &BackendClient {
        &self.client
    }

    /// Liveness check, single submission, then convergence wait.
    ///
    /// No submission is attempted when the backend never becomes live.
    /// Convergence does not prove routability: poll the proxy afterwards.
    pub async fn deploy(&self, workload: &WorkloadDefinition) -> Result<DeploymentRef> {
        self.client.wait_until_live(self.timeouts.liveness).await?;
        let deployment = self.client.submit(workload, false).await?;
        self.client
            .wait_on_deployment(&deployment.deployment_id, self.timeouts.convergence)
            .await?;
        info!(app = %workload.id, deployment = %deployment.deployment_id, "Deployment converged");
        Ok(deployment)
    }
}
