//! Suite lifecycle
//!
//! ```text
//! Suite::setup ── start environment ── resolve peers ── patch hosts
//!      │
//!      ├── begin_case ── start subject ── await_ready ── expect ... ── finish
//!      ├── begin_case ── ...
//!      │
//! Suite::teardown ── stop environment
//! ```
//!
//! A `TestCase` mutably borrows its `Suite`, so cases run strictly one after
//! another. Both scopes release their resources on drop when the explicit
//! async teardown was skipped (early return, panic).

mod lifecycle;

pub use lifecycle::{PhaseTracker, SuitePhase};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::{error, info, warn};

use crate::config::HarnessConfig;
use crate::environment::{
    ContainerHandle, ContainmentProbe, HostMapping, HostPatcher, NameResolutionWriter,
    Orchestrator, container_address,
};
use crate::error::{HarnessError, Result};
use crate::poll::{self, ObservedResponse, ResponseCondition};
use crate::subject::{SubjectCommand, SubjectProcess};

/// What suite setup must do once the environment is up
#[derive(Debug, Clone)]
pub struct SetupPlan {
    /// Services whose addresses are resolved and kept
    pub peers: Vec<String>,
    /// Services made resolvable by name for the subject
    pub host_patches: Vec<String>,
    /// Service hosting the service-discovery backend API
    pub backend_service: String,
    pub backend_port: u16,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl SetupPlan {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            peers: vec![config.backend_service.clone(), config.agent_service.clone()],
            host_patches: vec![config.agent_service.clone()],
            backend_service: config.backend_service.clone(),
            backend_port: config.backend_port,
            poll_interval: config.poll_interval(),
            request_timeout: config.request_timeout(),
        }
    }
}

/// Owns the orchestrated environment for the lifetime of a suite run
pub struct Suite<O: Orchestrator> {
    orchestrator: O,
    plan: SetupPlan,
    phase: PhaseTracker,
    peers: HashMap<String, ContainerHandle>,
    http: reqwest::Client,
}

impl<O: Orchestrator> Suite<O> {
    /// Start the environment, resolve peers and patch the hosts table.
    ///
    /// Any failure here aborts the suite. The environment is stopped before
    /// returning; a failure of that stop is logged and never replaces the
    /// original setup error.
    pub async fn setup<P, W>(
        orchestrator: O,
        plan: SetupPlan,
        patcher: &HostPatcher<P, W>,
    ) -> Result<Self>
    where
        P: ContainmentProbe,
        W: NameResolutionWriter,
    {
        let http = reqwest::Client::builder()
            .timeout(plan.request_timeout)
            .build()?;

        let mut phase = PhaseTracker::new();
        phase.advance(SuitePhase::EnvironmentStarting)?;

        match Self::bring_up(&orchestrator, &plan, patcher).await {
            Ok(peers) => {
                phase.advance(SuitePhase::EnvironmentReady)?;
                info!(environment = %orchestrator.name(), peers = peers.len(), "Suite environment ready");
                Ok(Self {
                    orchestrator,
                    plan,
                    phase,
                    peers,
                    http,
                })
            }
            Err(e) => {
                error!(environment = %orchestrator.name(), error = %e, "Suite setup failed");
                if let Err(stop_err) = orchestrator.stop().await {
                    warn!(error = %stop_err, "Stopping partially started environment failed");
                }
                Err(e)
            }
        }
    }

    async fn bring_up<P, W>(
        orchestrator: &O,
        plan: &SetupPlan,
        patcher: &HostPatcher<P, W>,
    ) -> Result<HashMap<String, ContainerHandle>>
    where
        P: ContainmentProbe,
        W: NameResolutionWriter,
    {
        orchestrator.start().await.map_err(|e| match e {
            HarnessError::Setup(_) => e,
            other => HarnessError::setup(format!("environment start: {}", other)),
        })?;

        let mut peers = HashMap::new();
        for service in plan.peers.iter().chain(plan.host_patches.iter()) {
            if peers.contains_key(service) {
                continue;
            }
            let handle = container_address(orchestrator, service).await?;
            peers.insert(service.clone(), handle);
        }

        for service in &plan.host_patches {
            let handle = &peers[service];
            patcher
                .apply(&HostMapping::new(service.clone(), handle.ip))
                .map_err(|e| match e {
                    HarnessError::MalformedEnvironment(_) => e,
                    other => HarnessError::setup(format!("hosts patch for {}: {}", service, other)),
                })?;
        }

        Ok(peers)
    }

    pub fn phase(&self) -> SuitePhase {
        self.phase.current()
    }

    pub fn peer(&self, service: &str) -> Option<&ContainerHandle> {
        self.peers.get(service)
    }

    /// Base URL of the service-discovery backend, e.g. `http://172.17.0.3:8080`
    pub fn backend_url(&self) -> Result<String> {
        let handle = self.peer(&self.plan.backend_service).ok_or_else(|| {
            HarnessError::setup(format!(
                "backend service {} was not resolved",
                self.plan.backend_service
            ))
        })?;
        Ok(format!(
            "http://{}",
            SocketAddr::new(handle.ip, self.plan.backend_port)
        ))
    }

    /// Open a test case scope. Only one can exist at a time.
    pub fn begin_case(&mut self, name: impl Into<String>) -> Result<TestCase<'_, O>> {
        let name = name.into();
        self.phase.advance(SuitePhase::ProcessStarting)?;
        info!(case = %name, "Test case started");
        Ok(TestCase {
            suite: self,
            name,
            subject: None,
            config_file: None,
            finished: false,
        })
    }

    /// Stop the environment. Always marks the suite torn down.
    pub async fn teardown(mut self) -> Result<()> {
        self.phase.advance(SuitePhase::EnvironmentTornDown)?;
        self.orchestrator.stop().await
    }
}

impl<O: Orchestrator> Drop for Suite<O> {
    fn drop(&mut self) {
        if !self.phase.current().is_terminal() {
            warn!(environment = %self.orchestrator.name(), "Suite dropped without teardown, stopping environment");
            self.orchestrator.stop_blocking();
        }
    }
}

/// One test case: owns the subject process and its rendered configuration
pub struct TestCase<'s, O: Orchestrator> {
    suite: &'s mut Suite<O>,
    name: String,
    subject: Option<SubjectProcess>,
    config_file: Option<NamedTempFile>,
    finished: bool,
}

impl<'s, O: Orchestrator> TestCase<'s, O> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn suite(&self) -> &Suite<O> {
        &*self.suite
    }

    pub fn phase(&self) -> SuitePhase {
        self.suite.phase()
    }

    /// Launch the subject with `config_file`; the file lives as long as the case
    pub fn start_subject(&mut self, command: &SubjectCommand, config_file: NamedTempFile) -> Result<()> {
        self.start_subject_at(command, config_file.path())?;
        self.config_file = Some(config_file);
        Ok(())
    }

    /// Launch the subject with a configuration file owned by the caller
    pub fn start_subject_at(&mut self, command: &SubjectCommand, config_file: &Path) -> Result<()> {
        if self.subject.is_some() || self.phase() != SuitePhase::ProcessStarting {
            return Err(HarnessError::Lifecycle(format!(
                "subject already started in case {}",
                self.name
            )));
        }
        self.subject = Some(SubjectProcess::start(command, config_file)?);
        Ok(())
    }

    pub fn subject(&self) -> Option<&SubjectProcess> {
        self.subject.as_ref()
    }

    pub fn subject_mut(&mut self) -> Option<&mut SubjectProcess> {
        self.subject.as_mut()
    }

    /// Wait until `url` answers at all, then mark the subject ready
    pub async fn await_ready(&mut self, url: &str, timeout: Duration) -> Result<ObservedResponse> {
        let condition = ResponseCondition::new("any HTTP response", |_| true);
        let resp = poll::get_request(
            &self.suite.http,
            url,
            timeout,
            self.suite.plan.poll_interval,
            &condition,
        )
        .await?;
        self.suite.phase.advance(SuitePhase::ProcessReady)?;
        Ok(resp)
    }

    fn enter_asserting(&mut self) -> Result<()> {
        match self.phase() {
            SuitePhase::Asserting => Ok(()),
            SuitePhase::ProcessReady => self.suite.phase.advance(SuitePhase::Asserting),
            other => Err(HarnessError::Lifecycle(format!(
                "cannot assert in phase {} (case {})",
                other, self.name
            ))),
        }
    }

    /// Poll `url` until `condition` holds; the case is asserting from here on
    pub async fn expect(
        &mut self,
        url: &str,
        condition: &ResponseCondition,
        timeout: Duration,
    ) -> Result<ObservedResponse> {
        self.enter_asserting()?;
        poll::get_request(
            &self.suite.http,
            url,
            timeout,
            self.suite.plan.poll_interval,
            condition,
        )
        .await
    }

    /// Single GET that must already satisfy `condition`, for properties that
    /// hold continuously rather than eventually
    pub async fn expect_now(
        &mut self,
        url: &str,
        condition: &ResponseCondition,
    ) -> Result<ObservedResponse> {
        self.enter_asserting()?;
        let resp = poll::get_once(&self.suite.http, url).await?;
        if !condition.matches(&resp) {
            return Err(HarnessError::Assertion(format!(
                "GET {}: expected {}, got {:?}",
                url,
                condition.description(),
                resp
            )));
        }
        Ok(resp)
    }

    /// Tear the case down, surfacing subject output if `result` failed
    pub async fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        let failed = result.is_err();
        let stopped = match self.subject.as_mut() {
            Some(subject) => subject.stop().await,
            None => Ok(()),
        };
        if failed {
            if let Some(subject) = &self.subject {
                subject.dump_output(&self.name);
            }
        }
        self.release();

        match (result, stopped) {
            (Ok(value), Ok(())) => {
                info!(case = %self.name, "Test case passed");
                Ok(value)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), stop_result) => {
                if let Err(stop_err) = stop_result {
                    warn!(case = %self.name, error = %stop_err, "Stopping subject failed");
                }
                error!(case = %self.name, error = %e, "Test case failed");
                Err(e)
            }
        }
    }

    fn release(&mut self) {
        self.subject = None;
        self.config_file = None;
        if self.suite.phase().in_case() {
            // every in-case phase may move to ProcessTornDown
            let _ = self.suite.phase.advance(SuitePhase::ProcessTornDown);
        }
        self.finished = true;
    }
}

impl<O: Orchestrator> Drop for TestCase<'_, O> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(case = %self.name, "Test case ended without finish, killing subject");
        if let Some(subject) = &self.subject {
            subject.dump_output(&self.name);
        }
        self.release();
    }
}
