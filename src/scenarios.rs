//! End-to-end scenarios against a live environment
//!
//! Each scenario opens its own test case on the suite, so the subject is
//! killed and its output surfaced (on failure) before the next one starts.

use std::fmt;
use std::str::FromStr;

use tracing::info;

use crate::config::HarnessConfig;
use crate::deploy::{
    BackendClient, DeploymentDriver, DeploymentTimeouts, FRONTEND_RULE_LABEL, WorkloadDefinition,
};
use crate::environment::Orchestrator;
use crate::error::{HarnessError, Result};
use crate::poll::ResponseCondition;
use crate::subject::{ConfigTemplate, SubjectCommand};
use crate::suite::{Suite, TestCase};

/// Template variable holding the backend base URL
pub const BACKEND_URL_VAR: &str = "MarathonURL";

/// Path prefix routed to the test workload
pub const SERVICE_PREFIX: &str = "/service";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Nothing deployed: the proxy answers 404
    SimpleConfiguration,
    /// Deploy a workload and watch the proxy pick up its route
    ConfigurationUpdate,
}

impl Scenario {
    pub fn all() -> [Scenario; 2] {
        [Self::SimpleConfiguration, Self::ConfigurationUpdate]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SimpleConfiguration => "simple_configuration",
            Self::ConfigurationUpdate => "configuration_update",
        }
    }

    pub async fn run<O: Orchestrator>(&self, suite: &mut Suite<O>, config: &HarnessConfig) -> Result<()> {
        match self {
            Self::SimpleConfiguration => simple_configuration(suite, config).await,
            Self::ConfigurationUpdate => configuration_update(suite, config).await,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "simple" | "simple_configuration" => Ok(Self::SimpleConfiguration),
            "update" | "configuration_update" => Ok(Self::ConfigurationUpdate),
            other => Err(HarnessError::Config(format!("unknown scenario {}", other))),
        }
    }
}

/// The workload whose route the proxy is expected to pick up
pub fn whoami_workload() -> WorkloadDefinition {
    WorkloadDefinition::docker("/whoami")
        .with_cpus(0.1)
        .with_memory(32.0)
        .with_label(FRONTEND_RULE_LABEL, format!("PathPrefix:{}", SERVICE_PREFIX))
        .bridged()
        .expose(80)
        .with_image("emilevauge/whoami")
}

fn start_subject<O: Orchestrator>(
    case: &mut TestCase<'_, O>,
    config: &HarnessConfig,
    backend_url: &str,
) -> Result<()> {
    let rendered = ConfigTemplate::new(&config.config_template)
        .with_var(BACKEND_URL_VAR, backend_url)
        .render_to_file()?;
    case.start_subject(&SubjectCommand::from_config(config), rendered)
}

/// Scenario A: with nothing deployed, `/` is 404
pub async fn simple_configuration<O: Orchestrator>(
    suite: &mut Suite<O>,
    config: &HarnessConfig,
) -> Result<()> {
    let backend_url = suite.backend_url()?;
    let mut case = suite.begin_case(Scenario::SimpleConfiguration.name())?;
    let result = check_simple_configuration(&mut case, config, &backend_url).await;
    case.finish(result).await
}

async fn check_simple_configuration<O: Orchestrator>(
    case: &mut TestCase<'_, O>,
    config: &HarnessConfig,
    backend_url: &str,
) -> Result<()> {
    start_subject(case, config, backend_url)?;

    let root = config.proxy_endpoint("/");
    case.await_ready(&root, config.proxy_ready_timeout()).await?;
    case.expect(
        &root,
        &ResponseCondition::status_code_is(404),
        config.proxy_ready_timeout(),
    )
    .await?;
    Ok(())
}

/// Scenario B: a deployed workload becomes routable through the proxy
pub async fn configuration_update<O: Orchestrator>(
    suite: &mut Suite<O>,
    config: &HarnessConfig,
) -> Result<()> {
    let backend_url = suite.backend_url()?;
    let mut case = suite.begin_case(Scenario::ConfigurationUpdate.name())?;
    let result = check_configuration_update(&mut case, config, &backend_url).await;
    case.finish(result).await
}

async fn check_configuration_update<O: Orchestrator>(
    case: &mut TestCase<'_, O>,
    config: &HarnessConfig,
    backend_url: &str,
) -> Result<()> {
    info!(url = %backend_url, "Using backend URL");

    let client = BackendClient::new(backend_url, config.request_timeout())?
        .with_interval(config.poll_interval());

    // A client created before the backend is live sees no members at all
    client.wait_until_live(config.backend_liveness_timeout()).await?;

    start_subject(case, config, backend_url)?;
    case.await_ready(&config.proxy_endpoint("/"), config.proxy_ready_timeout())
        .await?;

    let driver = DeploymentDriver::new(
        client,
        DeploymentTimeouts {
            liveness: config.backend_liveness_timeout(),
            convergence: config.deployment_timeout(),
        },
    );
    driver.deploy(&whoami_workload()).await?;

    info!("Querying application via proxy");
    case.expect(
        &config.proxy_endpoint(SERVICE_PREFIX),
        &ResponseCondition::status_code_is(200),
        config.route_timeout(),
    )
    .await?;
    // unrelated paths stay unrouted
    case.expect_now(
        &config.proxy_endpoint("/other"),
        &ResponseCondition::status_code_is(404),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_names_roundtrip() {
        for scenario in Scenario::all() {
            assert_eq!(scenario.name().parse::<Scenario>().unwrap(), scenario);
        }
        assert_eq!("update".parse::<Scenario>().unwrap(), Scenario::ConfigurationUpdate);
        assert!(matches!(
            "chaos".parse::<Scenario>(),
            Err(HarnessError::Config(_))
        ));
    }

    #[test]
    fn test_whoami_routes_service_prefix() {
        let app = whoami_workload();
        assert_eq!(app.id, "/whoami");
        assert_eq!(
            app.labels.get(FRONTEND_RULE_LABEL).map(String::as_str),
            Some("PathPrefix:/service")
        );
        let docker = &app.container.as_ref().unwrap().docker;
        assert_eq!(docker.port_mappings[0].container_port, 80);
        assert_eq!(docker.network.as_deref(), Some("BRIDGE"));
    }
}
