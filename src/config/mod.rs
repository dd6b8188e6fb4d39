// src/config/mod.rs
// Harness configuration: .env file, then environment, then defaults

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    // ── Subject process
    pub proxy_binary: String,
    pub proxy_args: Vec<String>,
    pub config_flag: String,
    pub proxy_url: String,

    // ── Orchestrated environment
    pub compose_file: PathBuf,
    pub config_template: PathBuf,
    pub project_prefix: String,
    pub backend_service: String,
    pub backend_port: u16,
    pub agent_service: String,

    // ── Host reconciliation
    pub hosts_file: PathBuf,
    pub cgroup_file: PathBuf,

    // ── Polling (milliseconds unless noted)
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub proxy_ready_timeout_ms: u64,
    pub backend_liveness_timeout_secs: u64,
    pub deployment_timeout_secs: u64,
    pub route_timeout_secs: u64,

    // ── Logging
    pub log_level: String,
}

/// Drop a trailing comment. A `#` only starts one at the beginning of the
/// value or after whitespace, so `http://host/#frag` survives intact.
fn strip_comment(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    let end = raw
        .match_indices('#')
        .map(|(i, _)| i)
        .find(|&i| i == 0 || bytes[i - 1].is_ascii_whitespace())
        .unwrap_or(raw.len());
    raw[..end].trim()
}

/// Parse `raw` the way values in `.env` files are written: surrounding
/// whitespace and trailing ` # comments` are ignored.
fn parse_clean<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    let clean_val = strip_comment(raw);
    match clean_val.parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            // tracing is not installed yet when configuration loads
            eprintln!("Config: {} = '{}' (parse failed, using default)", key, raw);
            None
        }
    }
}

fn var_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|val| parse_clean(key, &val))
        .unwrap_or(default)
}

impl HarnessConfig {
    pub fn from_env() -> Self {
        // A missing .env is normal on CI
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let proxy_args: String = var_or(&lookup, "HARNESS_PROXY_ARGS", String::new());

        Self {
            proxy_binary: var_or(&lookup, "HARNESS_PROXY_BINARY", "traefik".to_string()),
            proxy_args: proxy_args.split_whitespace().map(String::from).collect(),
            config_flag: var_or(&lookup, "HARNESS_CONFIG_FLAG", "--configFile".to_string()),
            proxy_url: var_or(&lookup, "HARNESS_PROXY_URL", "http://127.0.0.1:8000".to_string()),
            compose_file: var_or(
                &lookup,
                "HARNESS_COMPOSE_FILE",
                PathBuf::from("fixtures/marathon/docker-compose.yml"),
            ),
            config_template: var_or(
                &lookup,
                "HARNESS_CONFIG_TEMPLATE",
                PathBuf::from("fixtures/marathon/simple.toml"),
            ),
            project_prefix: var_or(&lookup, "HARNESS_PROJECT_PREFIX", "harness".to_string()),
            backend_service: var_or(&lookup, "HARNESS_BACKEND_SERVICE", "marathon".to_string()),
            backend_port: var_or(&lookup, "HARNESS_BACKEND_PORT", 8080),
            agent_service: var_or(&lookup, "HARNESS_AGENT_SERVICE", "mesos-slave".to_string()),
            hosts_file: var_or(&lookup, "HARNESS_HOSTS_FILE", PathBuf::from("/etc/hosts")),
            cgroup_file: var_or(&lookup, "HARNESS_CGROUP_FILE", PathBuf::from("/proc/1/cgroup")),
            poll_interval_ms: var_or(&lookup, "HARNESS_POLL_INTERVAL_MS", 100),
            request_timeout_ms: var_or(&lookup, "HARNESS_REQUEST_TIMEOUT_MS", 1000),
            proxy_ready_timeout_ms: var_or(&lookup, "HARNESS_PROXY_READY_TIMEOUT_MS", 5000),
            backend_liveness_timeout_secs: var_or(
                &lookup,
                "HARNESS_BACKEND_LIVENESS_TIMEOUT_SECS",
                60,
            ),
            deployment_timeout_secs: var_or(&lookup, "HARNESS_DEPLOYMENT_TIMEOUT_SECS", 120),
            route_timeout_secs: var_or(&lookup, "HARNESS_ROUTE_TIMEOUT_SECS", 60),
            log_level: var_or(&lookup, "HARNESS_LOG_LEVEL", "info".to_string()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn proxy_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_ready_timeout_ms)
    }

    pub fn backend_liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_liveness_timeout_secs)
    }

    pub fn deployment_timeout(&self) -> Duration {
        Duration::from_secs(self.deployment_timeout_secs)
    }

    pub fn route_timeout(&self) -> Duration {
        Duration::from_secs(self.route_timeout_secs)
    }

    /// Compose project name unique to this harness run
    pub fn project_name(&self) -> String {
        format!("{}-{}", self.project_prefix, uuid::Uuid::new_v4().simple())
    }

    /// `tracing` level parsed from `log_level`, defaulting to INFO
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }

    /// Proxy URL for `path`, which must start with `/`
    pub fn proxy_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.proxy_url.trim_end_matches('/'), path)
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.proxy_binary, "traefik");
        assert_eq!(config.config_flag, "--configFile");
        assert_eq!(config.backend_port, 8080);
        assert_eq!(config.agent_service, "mesos-slave");
        assert_eq!(config.backend_liveness_timeout(), Duration::from_secs(60));
        assert_eq!(config.deployment_timeout(), Duration::from_secs(120));
        assert_eq!(config.proxy_ready_timeout(), Duration::from_millis(5000));
        assert!(config.proxy_args.is_empty());
    }

    #[test]
    fn test_values_with_comments_and_whitespace() {
        let config = HarnessConfig::from_lookup(lookup_from(&[
            ("HARNESS_BACKEND_PORT", "  9090   # custom marathon port"),
            ("HARNESS_PROXY_ARGS", "--debug  --accessLog"),
            ("HARNESS_LOG_LEVEL", "debug"),
        ]));
        assert_eq!(config.backend_port, 9090);
        assert_eq!(config.proxy_args, vec!["--debug", "--accessLog"]);
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_hash_inside_value_is_kept() {
        let config = HarnessConfig::from_lookup(lookup_from(&[
            ("HARNESS_HOSTS_FILE", "/tmp/run#2/hosts"),
            ("HARNESS_PROXY_URL", "http://127.0.0.1:8000/#entry # local proxy"),
            ("HARNESS_CGROUP_FILE", "\t/proc/1/cgroup\t# pid 1"),
        ]));
        assert_eq!(config.hosts_file, PathBuf::from("/tmp/run#2/hosts"));
        assert_eq!(config.proxy_url, "http://127.0.0.1:8000/#entry");
        assert_eq!(config.cgroup_file, PathBuf::from("/proc/1/cgroup"));
    }

    #[test]
    fn test_unparseable_value_falls_back() {
        let config = HarnessConfig::from_lookup(lookup_from(&[(
            "HARNESS_POLL_INTERVAL_MS",
            "fast",
        )]));
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_project_names_are_unique() {
        let config = HarnessConfig::default();
        let a = config.project_name();
        let b = config.project_name();
        assert!(a.starts_with("harness-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_proxy_endpoint_joins_path() {
        let config = HarnessConfig::from_lookup(lookup_from(&[(
            "HARNESS_PROXY_URL",
            "http://127.0.0.1:8000/",
        )]));
        assert_eq!(config.proxy_endpoint("/service"), "http://127.0.0.1:8000/service");
    }
}
