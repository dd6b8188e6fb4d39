//! The orchestrated environment and the harness's view of its network
//!
//! - `containment`: is the harness itself running in a container?
//! - `hosts`: make peer container names resolvable for the subject process
//! - `compose`: start/stop the environment and look up container addresses

pub mod compose;
pub mod containment;
pub mod hosts;

pub use compose::{ComposeProject, ContainerHandle, Orchestrator, container_address, parse_inspect};
pub use containment::{CgroupProbe, Containment, ContainmentProbe, StaticProbe, classify};
pub use hosts::{HostMapping, HostPatcher, HostsFile, MemoryTable, NameResolutionWriter, PatchOutcome};
