//! Environment detection: is the harness itself running in a container?
//!
//! The answer comes from the process-control-group descriptor of PID 1. Each
//! record looks like `12:cpu,cpuacct:/docker/4f2a...`; a scope path ending
//! in `/` is the root scope. Any record with a narrower scope means we are
//! containerized.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{HarnessError, Result};

/// Well-known descriptor location on Linux
pub const DEFAULT_CGROUP_FILE: &str = "/proc/1/cgroup";

/// Tri-state answer of a containment probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    /// Running directly on a host (or the descriptor is absent)
    Host,
    /// Running inside a container
    Container,
    /// The descriptor is present but empty or has blank records
    Indeterminate,
}

impl Containment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Container => "container",
            Self::Indeterminate => "indeterminate",
        }
    }
}

/// Capability query for "am I containerized"
pub trait ContainmentProbe: Send + Sync {
    /// `Err` only for an unreadable descriptor; absence is `Host`
    fn probe(&self) -> Result<Containment>;
}

/// Classify descriptor contents.
///
/// A trailing newline terminates the last record and is not itself a blank
/// record. Empty content, or an empty record before a containerized one, is
/// `Indeterminate` because it cannot be told apart from a truncated read.
pub fn classify(content: &str) -> Containment {
    if content.is_empty() {
        return Containment::Indeterminate;
    }

    for line in content.lines() {
        if line.is_empty() {
            return Containment::Indeterminate;
        }
        if !line.ends_with('/') {
            return Containment::Container;
        }
    }

    Containment::Host
}

/// Probe backed by a cgroup descriptor on disk
#[derive(Debug, Clone)]
pub struct CgroupProbe {
    path: PathBuf,
}

impl CgroupProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for CgroupProbe {
    fn default() -> Self {
        Self::new(DEFAULT_CGROUP_FILE)
    }
}

impl ContainmentProbe for CgroupProbe {
    fn probe(&self) -> Result<Containment> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No cgroup descriptor, assuming host");
                return Ok(Containment::Host);
            }
            Err(e) => return Err(HarnessError::Io(e)),
        };

        let containment = classify(&content);
        debug!(path = %self.path.display(), containment = containment.as_str(), "Probed containment");
        Ok(containment)
    }
}

/// Probe with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub Containment);

impl ContainmentProbe for StaticProbe {
    fn probe(&self) -> Result<Containment> {
        Ok(self.0)
    }
}
