//! Configuration template rendering
//!
//! Fixtures carry `{{.Name}}` placeholders. Each test case renders its own
//! copy into a temporary file that disappears when the case ends.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{HarnessError, Result};

static RE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid regex")
});

/// Substitute every placeholder in `template` from `vars`
pub fn render(template: &str, vars: &HashMap<String, String>) -> Result<String> {
    let mut missing = Vec::new();
    let rendered = RE_PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let name = &caps[1];
        match vars.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(HarnessError::Template(format!(
            "no value for placeholder(s): {}",
            missing.join(", ")
        )));
    }

    Ok(rendered.into_owned())
}

/// A fixture on disk plus the values to render it with
#[derive(Debug, Clone)]
pub struct ConfigTemplate {
    path: PathBuf,
    vars: HashMap<String, String>,
}

impl ConfigTemplate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            vars: HashMap::new(),
        }
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render to a string, checking the result is valid TOML
    pub fn render_to_string(&self) -> Result<String> {
        let template = std::fs::read_to_string(&self.path)?;
        let rendered = render(&template, &self.vars)?;

        toml::from_str::<toml::Value>(&rendered).map_err(|e| {
            HarnessError::Template(format!(
                "{} does not render to valid TOML: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(rendered)
    }

    /// Render into a temporary file removed when the returned handle drops
    pub fn render_to_file(&self) -> Result<NamedTempFile> {
        let rendered = self.render_to_string()?;

        let mut file = tempfile::Builder::new()
            .prefix("harness-config-")
            .suffix(".toml")
            .tempfile()?;
        file.write_all(rendered.as_bytes())?;
        file.flush()?;

        debug!(
            template = %self.path.display(),
            rendered = %file.path().display(),
            "Rendered configuration"
        );
        Ok(file)
    }
}
