//! Host resolution patching
//!
//! Containers on the default compose bridge cannot resolve each other by
//! name from the harness container, so the subject process would fail to
//! reach the agent that runs deployed workloads. When the harness runs in a
//! container we append an `IP\tHOSTNAME` record to the name-resolution table.
//! The table is append-only: records are never removed or rewritten.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::containment::{Containment, ContainmentProbe};
use crate::error::{HarnessError, Result};

pub const DEFAULT_HOSTS_FILE: &str = "/etc/hosts";

/// A hostname that must resolve to `ip` for the subject process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMapping {
    pub hostname: String,
    pub ip: IpAddr,
}

impl HostMapping {
    pub fn new(hostname: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            hostname: hostname.into(),
            ip,
        }
    }

    /// Canonical hosts-file record
    pub fn to_record(&self) -> String {
        format!("{}\t{}\n", self.ip, self.hostname)
    }
}

/// Append access to a name-resolution table
pub trait NameResolutionWriter: Send + Sync {
    type Handle: Write;

    /// Open the table for appending. The handle is closed when dropped.
    fn open_append(&self) -> io::Result<Self::Handle>;
}

/// The system hosts file
#[derive(Debug, Clone)]
pub struct HostsFile {
    path: PathBuf,
}

impl HostsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for HostsFile {
    fn default() -> Self {
        Self::new(DEFAULT_HOSTS_FILE)
    }
}

impl NameResolutionWriter for HostsFile {
    type Handle = File;

    fn open_append(&self) -> io::Result<File> {
        // No create: a missing hosts file means the environment is broken
        OpenOptions::new().append(true).open(&self.path)
    }
}

/// In-memory table, shared between clones
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

pub struct MemoryHandle {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Write for MemoryHandle {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl NameResolutionWriter for MemoryTable {
    type Handle = MemoryHandle;

    fn open_append(&self) -> io::Result<MemoryHandle> {
        Ok(MemoryHandle {
            buf: Arc::clone(&self.buf),
        })
    }
}

/// What `HostPatcher::apply` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Not containerized, nothing written
    Skipped,
    /// One record appended
    Appended,
}

/// Makes peer container names resolvable for the subject process
pub struct HostPatcher<P, W> {
    probe: P,
    writer: W,
}

impl<P: ContainmentProbe, W: NameResolutionWriter> HostPatcher<P, W> {
    pub fn new(probe: P, writer: W) -> Self {
        Self { probe, writer }
    }

    /// Append `mapping` when running inside a container.
    ///
    /// Not idempotent: every call that reaches the writer appends a record.
    /// The handle is flushed and closed before returning on every path.
    pub fn apply(&self, mapping: &HostMapping) -> Result<PatchOutcome> {
        match self.probe.probe()? {
            Containment::Host => {
                debug!(host = %mapping.hostname, "Not containerized, hosts table left alone");
                return Ok(PatchOutcome::Skipped);
            }
            Containment::Indeterminate => {
                return Err(HarnessError::MalformedEnvironment(
                    "cgroup descriptor is empty or has blank records".to_string(),
                ));
            }
            Containment::Container => {}
        }

        let mut handle = self.writer.open_append()?;
        let written = handle
            .write_all(mapping.to_record().as_bytes())
            .and_then(|_| handle.flush());
        drop(handle);
        written?;

        info!(host = %mapping.hostname, ip = %mapping.ip, "Extended hosts table");
        Ok(PatchOutcome::Appended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::containment::{CgroupProbe, StaticProbe};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn agent() -> HostMapping {
        HostMapping::new("mesos-slave", "172.17.0.4".parse().unwrap())
    }

    #[test]
    fn test_record_format() {
        assert_eq!(agent().to_record(), "172.17.0.4\tmesos-slave\n");
    }

    #[test]
    fn test_host_is_noop() {
        let table = MemoryTable::new();
        let patcher = HostPatcher::new(StaticProbe(Containment::Host), table.clone());
        assert_eq!(patcher.apply(&agent()).unwrap(), PatchOutcome::Skipped);
        assert!(table.contents().is_empty());
    }

    #[test]
    fn test_container_appends_exactly_one_record() {
        let table = MemoryTable::new();
        let patcher = HostPatcher::new(StaticProbe(Containment::Container), table.clone());
        assert_eq!(patcher.apply(&agent()).unwrap(), PatchOutcome::Appended);
        assert_eq!(table.contents(), "172.17.0.4\tmesos-slave\n");
    }

    #[test]
    fn test_repeated_apply_duplicates() {
        let table = MemoryTable::new();
        let patcher = HostPatcher::new(StaticProbe(Containment::Container), table.clone());
        patcher.apply(&agent()).unwrap();
        patcher.apply(&agent()).unwrap();
        assert_eq!(table.contents().lines().count(), 2);
    }

    #[test]
    fn test_indeterminate_is_malformed() {
        let patcher = HostPatcher::new(StaticProbe(Containment::Indeterminate), MemoryTable::new());
        let err = patcher.apply(&agent()).unwrap_err();
        assert!(matches!(err, HarnessError::MalformedEnvironment(_)));
        assert!(err.is_setup_failure());
    }

    struct FailingWriter {
        closed: Arc<AtomicBool>,
    }

    struct FailingHandle {
        closed: Arc<AtomicBool>,
    }

    impl Write for FailingHandle {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            // accept a few bytes, then fail the rest
            if data.len() > 4 {
                Ok(4)
            } else {
                Err(io::Error::new(io::ErrorKind::Other, "disk full"))
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for FailingHandle {
        fn drop(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    impl NameResolutionWriter for FailingWriter {
        type Handle = FailingHandle;

        fn open_append(&self) -> io::Result<FailingHandle> {
            Ok(FailingHandle {
                closed: Arc::clone(&self.closed),
            })
        }
    }

    #[test]
    fn test_handle_closed_after_partial_write() {
        let closed = Arc::new(AtomicBool::new(false));
        let writer = FailingWriter {
            closed: Arc::clone(&closed),
        };
        let patcher = HostPatcher::new(StaticProbe(Containment::Container), writer);

        let err = patcher.apply(&agent()).unwrap_err();
        assert!(matches!(err, HarnessError::Io(_)));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_real_files() {
        let dir = TempDir::new().unwrap();
        let cgroup = dir.path().join("cgroup");
        let hosts = dir.path().join("hosts");
        std::fs::write(&cgroup, "12:cpu:/docker/abc\n").unwrap();
        std::fs::write(&hosts, "127.0.0.1\tlocalhost\n").unwrap();

        let patcher = HostPatcher::new(CgroupProbe::new(&cgroup), HostsFile::new(&hosts));
        patcher.apply(&agent()).unwrap();

        let contents = std::fs::read_to_string(&hosts).unwrap();
        assert_eq!(contents, "127.0.0.1\tlocalhost\n172.17.0.4\tmesos-slave\n");
    }

    #[test]
    fn test_missing_hosts_file_fails() {
        let dir = TempDir::new().unwrap();
        let patcher = HostPatcher::new(
            StaticProbe(Containment::Container),
            HostsFile::new(dir.path().join("hosts")),
        );
        assert!(matches!(patcher.apply(&agent()), Err(HarnessError::Io(_))));
    }
}
