//! P1689R5 dependency-file format.
//!
//! Modern toolchains emit this JSON from their own dependency scans
//! (`cl /scanDependencies`, `clang-scan-deps -format=p1689`). The driver only
//! consumes the logical names and header-unit source paths; everything else
//! in the format is ignored. When scanner verification is enabled, each
//! task's in-house scan is checked against the toolchain's rule and any
//! discrepancy is fatal.

use crate::{
    error::{BuildError, Result},
    task::Task,
};
use serde::Deserialize;
use std::{collections::BTreeSet, path::PathBuf};

/// A `*.ddi` / P1689 dependency file.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DepFile {
    #[serde(default)]
    pub rules: Vec<DepRule>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DepRule {
    #[serde(default)]
    pub provides: Vec<DepProvide>,
    #[serde(default)]
    pub requires: Vec<DepRequire>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DepProvide {
    pub logical_name: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DepRequire {
    pub logical_name: String,
    /// Present for header units: the resolved path of the imported header.
    #[serde(default)]
    pub source_path: Option<PathBuf>,
}

impl DepFile {
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The first (and in practice only) rule of the file.
    pub fn rule(&self) -> Option<&DepRule> {
        self.rules.first()
    }
}

/// Compares the in-house scan of `task` against the toolchain's dependency
/// rule. Every differing entry is logged; any difference is fatal.
pub fn verify_scan(task: &Task, dep_file: &DepFile) -> Result<()> {
    let rule = dep_file.rule().cloned().unwrap_or_default();

    let ours: BTreeSet<&str> = task.produces.iter().map(String::as_str).collect();
    let theirs: BTreeSet<&str> = rule.provides.iter().map(|p| p.logical_name.as_str()).collect();
    let mut mismatched = false;

    for missing in theirs.difference(&ours) {
        error!("[{}] toolchain scan provides [{missing}], ours does not", task.unique_name);
        mismatched = true;
    }
    for extra in ours.difference(&theirs) {
        error!("[{}] our scan provides [{extra}], toolchain scan does not", task.unique_name);
        mismatched = true;
    }

    let ours: BTreeSet<&str> = task.requires.iter().map(|req| req.name.as_str()).collect();
    let theirs: BTreeSet<&str> = rule.requires.iter().map(|r| r.logical_name.as_str()).collect();

    for missing in theirs.difference(&ours) {
        error!("[{}] toolchain scan requires [{missing}], ours does not", task.unique_name);
        mismatched = true;
    }
    for extra in ours.difference(&theirs) {
        error!("[{}] our scan requires [{extra}], toolchain scan does not", task.unique_name);
        mismatched = true;
    }

    if mismatched {
        return Err(BuildError::ScanMismatch { task: task.unique_name.clone() });
    }
    Ok(())
}
