//! Provenance sidecars for written reports.
//!
//! A report written with `--out run.json` gets a `run.provenance.json` next to
//! it that names the build, the subcommand, the scenario and the parameters
//! that produced it. The sidecar is a plain serde record so tooling can read it
//! back with the same type.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a [`Revision`] was read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionOrigin {
    /// `GIT_COMMIT` set when the binary was compiled.
    Build,
    /// `GIT_COMMIT` set in the environment of the run.
    Environment,
    /// `git rev-parse HEAD` in the working directory.
    Checkout,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub commit: String,
    pub origin: RevisionOrigin,
}

impl Revision {
    pub fn current() -> Self {
        let runtime = std::env::var("GIT_COMMIT").ok();
        Self::resolve(option_env!("GIT_COMMIT"), runtime.as_deref(), head_of_checkout)
    }

    /// First non-blank of the build value, the runtime value and `checkout()`.
    fn resolve(
        build: Option<&str>,
        runtime: Option<&str>,
        checkout: impl FnOnce() -> Option<String>,
    ) -> Self {
        let given = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(String::from);
        let (commit, origin) = if let Some(c) = given(build) {
            (c, RevisionOrigin::Build)
        } else if let Some(c) = given(runtime) {
            (c, RevisionOrigin::Environment)
        } else if let Some(c) = given(checkout().as_deref()) {
            (c, RevisionOrigin::Checkout)
        } else {
            ("unknown".to_string(), RevisionOrigin::Unknown)
        };
        Self { commit, origin }
    }
}

fn head_of_checkout() -> Option<String> {
    let out = Command::new("git").args(["rev-parse", "HEAD"]).output().ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8(out.stdout).ok()
}

/// Record written next to a report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    pub report: PathBuf,
    pub command: String,
    pub scenario: String,
    pub revision: Revision,
    pub engine_version: String,
    pub params: Value,
}

impl Sidecar {
    pub fn new(report: &Path, command: &str, scenario: &str, params: Value) -> Self {
        Self {
            report: report.to_path_buf(),
            command: command.to_string(),
            scenario: scenario.to_string(),
            revision: Revision::current(),
            engine_version: exactvis::VERSION.to_string(),
            params,
        }
    }

    /// `dir/run.json` → `dir/run.provenance.json`.
    pub fn path_for(report: &Path) -> PathBuf {
        let stem = report
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report".to_string());
        report.with_file_name(format!("{stem}.provenance.json"))
    }

    /// Write the sidecar beside its report, creating missing directories.
    pub fn write(&self) -> Result<PathBuf> {
        let path = Self::path_for(&self.report);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}
