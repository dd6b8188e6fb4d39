//! The process under test
//!
//! A subject is launched per test case with a configuration rendered from a
//! fixture, and is killed when the case ends whatever its outcome.
//!
//! ```rust,ignore
//! let config = ConfigTemplate::new("fixtures/marathon/simple.toml")
//!     .with_var("MarathonURL", backend_url)
//!     .render_to_file()?;
//! let mut subject = SubjectProcess::start(&SubjectCommand::new("traefik"), config.path())?;
//! // ... poll the proxy port, assert ...
//! subject.stop().await?;
//! ```

mod process;
mod template;

pub use process::{OutputBuffer, SubjectCommand, SubjectProcess};
pub use template::{ConfigTemplate, render};
