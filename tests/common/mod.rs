//! Shared fixtures for the integration tests: a fake service-discovery
//! backend, a fake proxy and an in-process orchestrator.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{StatusCode, Uri};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use discovery_harness::environment::{ContainerHandle, Orchestrator};
use discovery_harness::{HarnessError, Result};

pub const DEPLOYMENT_ID: &str = "5ed4c0c5-9ff8-4a6f-a0cd-f57f59a34b43";

/// Route test output through the libtest capture
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });
    addr
}

/// An address nothing listens on
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind probe listener");
    listener.local_addr().expect("listener address")
}

// ============================================================================
// Fake backend
// ============================================================================

/// How the fake backend behaves
#[derive(Debug, Clone)]
pub struct BackendBehavior {
    /// Pings answered 503 before the first 200; `None` never goes live
    pub live_after: Option<u32>,
    pub reject_submissions: bool,
    /// Listings answered 500 before the real ones
    pub failing_listings: u32,
    /// Listings that still show the deployment in flight; `None` never converges
    pub in_flight_listings: Option<u32>,
}

impl Default for BackendBehavior {
    fn default() -> Self {
        Self {
            live_after: Some(0),
            reject_submissions: false,
            failing_listings: 0,
            in_flight_listings: Some(2),
        }
    }
}

pub struct FakeBackend {
    behavior: BackendBehavior,
    pings: AtomicU32,
    listings: AtomicU32,
    submissions: Mutex<Vec<(String, Value)>>,
    converged: Arc<AtomicBool>,
}

impl FakeBackend {
    pub fn pings(&self) -> u32 {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn listings(&self) -> u32 {
        self.listings.load(Ordering::SeqCst)
    }

    /// `(path id, document)` of every submission received
    pub fn submissions(&self) -> Vec<(String, Value)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn has_converged(&self) -> bool {
        self.converged.load(Ordering::SeqCst)
    }

    /// Shared flag flipped once the deployment stops being listed
    pub fn converged_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.converged)
    }
}

async fn ping(State(backend): State<Arc<FakeBackend>>) -> (StatusCode, &'static str) {
    let seen = backend.pings.fetch_add(1, Ordering::SeqCst);
    match backend.behavior.live_after {
        Some(after) if seen >= after => (StatusCode::OK, "pong"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "not leading"),
    }
}

async fn put_app(
    State(backend): State<Arc<FakeBackend>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    backend.submissions.lock().unwrap().push((id, body));
    if backend.behavior.reject_submissions {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "message": "App is locked by one or more deployments." })),
        );
    }
    (
        StatusCode::CREATED,
        Json(json!({
            "deploymentId": DEPLOYMENT_ID,
            "version": "2017-03-01T12:00:00.000Z"
        })),
    )
}

async fn list_deployments(State(backend): State<Arc<FakeBackend>>) -> (StatusCode, Json<Value>) {
    let seen = backend.listings.fetch_add(1, Ordering::SeqCst);
    if seen < backend.behavior.failing_listings {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "leader election in progress" })),
        );
    }

    let listed = seen - backend.behavior.failing_listings;
    let in_flight = match backend.behavior.in_flight_listings {
        Some(n) => listed < n,
        None => true,
    };
    if in_flight {
        return (
            StatusCode::OK,
            Json(json!([{
                "id": DEPLOYMENT_ID,
                "affectedApps": ["/whoami"],
                "currentStep": 1,
                "totalSteps": 2
            }])),
        );
    }

    backend.converged.store(true, Ordering::SeqCst);
    (StatusCode::OK, Json(json!([])))
}

/// Start a fake backend; returns its base URL
pub async fn spawn_backend(behavior: BackendBehavior) -> (String, Arc<FakeBackend>) {
    let backend = Arc::new(FakeBackend {
        behavior,
        pings: AtomicU32::new(0),
        listings: AtomicU32::new(0),
        submissions: Mutex::new(Vec::new()),
        converged: Arc::new(AtomicBool::new(false)),
    });

    let app = Router::new()
        .route("/ping", get(ping))
        .route("/v2/apps/{id}", put(put_app))
        .route("/v2/deployments", get(list_deployments))
        .with_state(Arc::clone(&backend));

    let addr = serve(app).await;
    (format!("http://{}", addr), backend)
}

// ============================================================================
// Fake proxy
// ============================================================================

async fn route(State(converged): State<Arc<AtomicBool>>, uri: Uri) -> (StatusCode, String) {
    if converged.load(Ordering::SeqCst) && uri.path().starts_with("/service") {
        (StatusCode::OK, "Hostname: whoami\nIP: 172.17.0.5\n".to_string())
    } else {
        (StatusCode::NOT_FOUND, "404 page not found\n".to_string())
    }
}

fn proxy_app(converged: Arc<AtomicBool>) -> Router {
    Router::new().fallback(route).with_state(converged)
}

/// Start a fake proxy that routes `/service` once `converged` is set;
/// returns its base URL
pub async fn spawn_proxy(converged: Arc<AtomicBool>) -> String {
    let addr = serve(proxy_app(converged)).await;
    format!("http://{}", addr)
}

/// A fake proxy whose listener can be closed, standing in for a dead subject
pub struct StoppableProxy {
    pub url: String,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<()>,
}

impl StoppableProxy {
    pub async fn start(converged: Arc<AtomicBool>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener address");
        let (shutdown, signal) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, proxy_app(converged))
                .with_graceful_shutdown(async {
                    let _ = signal.await;
                })
                .await
                .expect("test server");
        });
        Self {
            url: format!("http://{}", addr),
            shutdown,
            server,
        }
    }

    /// Close the listener and every open connection
    pub async fn shut_down(self) {
        let _ = self.shutdown.send(());
        tokio::time::timeout(Duration::from_secs(5), self.server)
            .await
            .expect("proxy shut down in time")
            .expect("proxy task");
    }
}

// ============================================================================
// Fake orchestrator
// ============================================================================

/// Orchestrator over a fixed service table that records every call
#[derive(Clone, Default)]
pub struct FakeOrchestrator {
    services: HashMap<String, IpAddr>,
    fail_start: bool,
    fail_stop: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, name: &str, ip: IpAddr) -> Self {
        self.services.insert(name.to_string(), ip);
        self
    }

    /// The usual marathon + agent pair on loopback
    pub fn marathon() -> Self {
        Self::new()
            .with_service("marathon", IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_service("mesos-slave", "172.17.0.4".parse().unwrap())
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// Shared call log, readable after the orchestrator moved into a suite
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    fn name(&self) -> &str {
        "fake"
    }

    async fn start(&self) -> Result<()> {
        self.record("start");
        if self.fail_start {
            return Err(HarnessError::Orchestrator("image pull failed".to_string()));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record("stop");
        if self.fail_stop {
            return Err(HarnessError::Orchestrator("daemon went away".to_string()));
        }
        Ok(())
    }

    async fn inspect(&self, service: &str) -> Result<ContainerHandle> {
        self.record(format!("inspect {}", service));
        let ip = self.services.get(service).copied().ok_or_else(|| {
            HarnessError::Orchestrator(format!("no container for service {}", service))
        })?;
        Ok(ContainerHandle {
            name: service.to_string(),
            id: format!("{}-id", service),
            ip,
        })
    }

    fn stop_blocking(&self) {
        self.record("stop_blocking");
    }
}

pub fn recorded(calls: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    calls.lock().unwrap().clone()
}

pub const SHORT: Duration = Duration::from_millis(400);
pub const INTERVAL: Duration = Duration::from_millis(20);
