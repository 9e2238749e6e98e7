//! Error types for the build driver.

use std::{
    fmt,
    io,
    path::{Path, PathBuf},
};

pub type Result<T, E = BuildError> = std::result::Result<T, E>;

/// An `io::Error` paired with the path that produced it.
#[derive(Debug, thiserror::Error)]
#[error("\"{}\": {io}", .path.display())]
pub struct BuildIoError {
    io: io::Error,
    path: PathBuf,
}

impl BuildIoError {
    pub fn new(io: io::Error, path: impl Into<PathBuf>) -> Self {
        Self { io, path: path.into() }
    }

    /// The path that failed
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn inner(&self) -> &io::Error {
        &self.io
    }
}

impl From<BuildIoError> for io::Error {
    fn from(err: BuildIoError) -> Self {
        err.io
    }
}

/// Various error types for the build pipeline.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Io(#[from] BuildIoError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Configuration errors: these abort before any build work begins.
    #[error("unknown source type: [{0}]")]
    UnknownSourceType(String),
    #[error("unknown executable type: [{0}], expected [console] or [window]")]
    UnknownSubsystem(String),
    #[error("unknown download type: [{0}]")]
    UnknownDownloadType(String),
    #[error("duplicate target name: [{0}]")]
    DuplicateTarget(String),
    #[error("target [{target}] imports unknown target [{import}]")]
    UnknownImport { target: String, import: String },
    #[error("recursive target dependency: {}", .chain.join(" -> "))]
    RecursiveTarget { chain: Vec<String> },
    /// Resolution errors: these abort before scheduling begins.
    #[error(
        "module partition [{partition}] in {} does not belong to primary module [{primary}]",
        .file.display()
    )]
    PartitionMismatch { file: PathBuf, partition: String, primary: String },
    #[error("task [{task}] requires [{name}] which no task produces")]
    UnresolvedImport { task: String, name: String },
    #[error("module [{name}] is produced by both [{first}] and [{second}]")]
    DuplicateProducer { name: String, first: String, second: String },
    #[error("cyclic module dependency: {}", .chain.join(" -> "))]
    ModuleCycle { chain: Vec<String> },
    #[error("task [{task}] imports header [{header}] which resolves to no file")]
    UnresolvedHeaderUnit { task: String, header: String },
    /// The in-house scan and the toolchain's P1689 scan disagree.
    #[error("dependency scan mismatch for task [{task}] (differences logged above)")]
    ScanMismatch { task: String },
    /// The scheduler detected that no further progress is possible.
    #[error("{0}")]
    Blocked(BlockageReport),
    #[error("compilation failed for: {}", .tasks.join(", "))]
    CompileFailed { tasks: Vec<String> },
    #[error("link failed for: {}", .targets.join(", "))]
    LinkFailed { targets: Vec<String> },
    /// The toolchain environment is unusable.
    #[error("toolchain error: {0}")]
    Toolchain(String),
    /// General purpose message
    #[error("{0}")]
    Message(String),
}

impl BuildError {
    pub fn io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        BuildIoError::new(err, path).into()
    }

    /// Create an error with a message
    pub fn msg(msg: impl Into<String>) -> Self {
        BuildError::Message(msg.into())
    }
}

/// Why the dispatcher stopped making progress.
///
/// Carries one entry per task that can never leave `Waiting`, each listing the
/// requirement names that are still not `Complete`.
#[derive(Clone, Debug, Default)]
pub struct BlockageReport {
    /// Number of tasks that ended in `Failed`.
    pub failed: usize,
    pub blocked: Vec<BlockedTask>,
}

#[derive(Clone, Debug)]
pub struct BlockedTask {
    pub unique_name: String,
    pub waiting_on: Vec<BlockedDependency>,
}

#[derive(Clone, Debug)]
pub struct BlockedDependency {
    pub name: String,
    pub failed: bool,
}

impl fmt::Display for BlockageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failed > 0 {
            write!(
                f,
                "blocked after {} failed compilation{}",
                self.failed,
                if self.failed == 1 { "" } else { "s" }
            )?;
        } else {
            write!(f, "illegal dependency chain detected")?;
        }
        for task in &self.blocked {
            write!(f, "\ntask [{}] blocked", task.unique_name)?;
            for dep in &task.waiting_on {
                write!(f, "\n - {}{}", dep.name, if dep.failed { " (failed)" } else { "" })?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for BlockageReport {}
