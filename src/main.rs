// src/main.rs
// discovery-harness - runs the service-discovery suite against a live environment

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use discovery_harness::HarnessConfig;
use discovery_harness::environment::{
    CgroupProbe, ComposeProject, ContainmentProbe, HostPatcher, HostsFile,
};
use discovery_harness::scenarios::Scenario;
use discovery_harness::suite::{SetupPlan, Suite};

#[derive(Parser)]
#[command(name = "discovery-harness")]
#[command(about = "Service-discovery integration suite for a reverse proxy")]
#[command(version)]
struct Cli {
    /// Log at DEBUG regardless of HARNESS_LOG_LEVEL
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring up the environment and run scenarios
    Run {
        /// Scenario to run: simple, update or all
        #[arg(short, long, default_value = "all")]
        scenario: String,

        /// Proxy binary under test
        #[arg(long, env = "HARNESS_PROXY_BINARY")]
        proxy_binary: Option<String>,

        /// Compose file describing the environment
        #[arg(long)]
        compose_file: Option<PathBuf>,

        /// Proxy configuration template
        #[arg(long)]
        template: Option<PathBuf>,

        /// Base URL of the proxy's entry point
        #[arg(long)]
        proxy_url: Option<String>,
    },

    /// Report whether this process runs inside a container
    Probe,
}

fn init_tracing(level: Level) -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn select_scenarios(arg: &str) -> Result<Vec<Scenario>> {
    if arg.eq_ignore_ascii_case("all") {
        return Ok(Scenario::all().to_vec());
    }
    arg.split(',')
        .map(|s| s.trim().parse::<Scenario>().map_err(anyhow::Error::from))
        .collect()
}

async fn run_suite(config: HarnessConfig, scenarios: Vec<Scenario>) -> Result<()> {
    let project = ComposeProject::new(config.project_name(), &config.compose_file);
    let patcher = HostPatcher::new(
        CgroupProbe::new(&config.cgroup_file),
        HostsFile::new(&config.hosts_file),
    );

    let mut suite = Suite::setup(project, SetupPlan::from_config(&config), &patcher)
        .await
        .context("Suite setup failed, no scenarios were run")?;

    let mut failures = 0;
    for scenario in &scenarios {
        match scenario.run(&mut suite, &config).await {
            Ok(()) => println!("PASS  {}", scenario),
            Err(e) => {
                failures += 1;
                println!("FAIL  {}: {}", scenario, e);
            }
        }
    }

    if let Err(e) = suite.teardown().await {
        error!(error = %e, "Environment teardown failed");
    }

    if failures > 0 {
        bail!("{} of {} scenarios failed", failures, scenarios.len());
    }
    info!(count = scenarios.len(), "All scenarios passed");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = HarnessConfig::from_env();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        config.tracing_level()
    };
    init_tracing(level)?;

    match cli.command {
        Commands::Run {
            scenario,
            proxy_binary,
            compose_file,
            template,
            proxy_url,
        } => {
            if let Some(binary) = proxy_binary {
                config.proxy_binary = binary;
            }
            if let Some(file) = compose_file {
                config.compose_file = file;
            }
            if let Some(template) = template {
                config.config_template = template;
            }
            if let Some(url) = proxy_url {
                config.proxy_url = url;
            }

            let scenarios = select_scenarios(&scenario)?;
            run_suite(config, scenarios).await
        }
        Commands::Probe => {
            let probe = CgroupProbe::new(&config.cgroup_file);
            let containment = probe
                .probe()
                .with_context(|| format!("Failed to read {}", probe.path().display()))?;
            println!("{}", containment.as_str());
            Ok(())
        }
    }
}
