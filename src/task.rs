//! The in-memory target and task model shared by every build phase.
//!
//! Targets and tasks live in append-only vectors owned by the driver;
//! `TargetId` / `TaskId` indices serve as stable back-references between
//! them. Everything here is written during the pre-schedule phases and, with
//! the sole exception of [`Task::state`], read-only while the scheduler runs.

use crate::{
    error::{BuildError, Result},
    utils,
};
use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU8, Ordering},
};

/// Index of a [`Target`] in the driver's target arena.
pub type TargetId = usize;

/// Index of a [`Task`] in the driver's task list.
pub type TaskId = usize;

/// What a source file is compiled as.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SourceKind {
    CSource,
    CppSource,
    CppHeader,
    CppInterface,
    #[default]
    Unknown,
}

impl SourceKind {
    /// Detects the kind from the file extension, `Unknown` for anything else.
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(utils::C_SOURCE_EXTENSION) => Self::CSource,
            Some(utils::CPP_SOURCE_EXTENSION) => Self::CppSource,
            Some(utils::CPP_HEADER_EXTENSION) => Self::CppHeader,
            Some(utils::CPP_INTERFACE_EXTENSION) => Self::CppInterface,
            _ => Self::Unknown,
        }
    }

    /// Parses a manifest `type` string, which is fatal on unknown values.
    pub fn from_manifest(s: &str) -> Result<Self> {
        match s {
            "c" => Ok(Self::CSource),
            "c++" => Ok(Self::CppSource),
            "c++header" => Ok(Self::CppHeader),
            "c++interface" => Ok(Self::CppInterface),
            other => Err(BuildError::UnknownSourceType(other.to_string())),
        }
    }
}

/// A source file together with its detected and effective kinds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Source {
    pub path: PathBuf,
    /// Kind inferred from the file extension.
    pub detected: SourceKind,
    /// Kind the task is compiled as: the manifest override when one was
    /// given, the detected kind otherwise.
    pub kind: SourceKind,
}

impl Source {
    pub fn new(path: PathBuf, manifest_kind: SourceKind) -> Self {
        let detected = SourceKind::detect(&path);
        let kind = if manifest_kind == SourceKind::Unknown { detected } else { manifest_kind };
        Self { path, detected, kind }
    }
}

/// Visibility of a target-to-target import edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportKind {
    Private,
    Public,
    Interface,
}

/// A target-to-target import edge.
#[derive(Clone, Debug)]
pub struct TargetImport {
    pub target: TargetId,
    pub kind: ImportKind,
}

/// Which entry point the linker emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subsystem {
    Console,
    Window,
}

impl Subsystem {
    pub fn from_manifest(s: &str) -> Result<Self> {
        match s {
            "console" => Ok(Self::Console),
            "window" => Ok(Self::Window),
            other => Err(BuildError::UnknownSubsystem(other.to_string())),
        }
    }
}

/// Descriptor of the executable a target links.
#[derive(Clone, Debug)]
pub struct Executable {
    /// Output path, relative to the build directory.
    pub path: PathBuf,
    pub subsystem: Subsystem,
}

/// A named compilation unit group from the manifest.
///
/// Created by manifest expansion, mutated during flattening, and alive for
/// the whole build.
#[derive(Clone, Debug)]
pub struct Target {
    pub name: String,
    /// Directory source and include paths are declared relative to.
    pub root: PathBuf,
    pub include_dirs: Vec<PathBuf>,
    pub defines: Vec<String>,
    /// Static libraries passed to the linker.
    pub links: Vec<PathBuf>,
    /// Shared libraries the executable loads at runtime.
    pub shared: Vec<PathBuf>,
    pub imports: Vec<TargetImport>,
    pub executable: Option<Executable>,
    /// Every target reachable from this one under the import visibility
    /// rules, including the target itself.
    pub flattened_imports: Vec<TargetId>,
}

/// A requirement edge: the logical module name and, once resolution has run,
/// the task that produces it.
#[derive(Clone, Debug)]
pub struct Require {
    pub name: String,
    pub source: Option<TaskId>,
}

impl Require {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), source: None }
    }
}

/// Lifecycle of a task, advanced by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Waiting = 0,
    Compiling = 1,
    Complete = 2,
    Failed = 3,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// The one concurrently mutated field of a [`Task`].
///
/// Acquire/release ordering pairs the worker's `Complete` store with its
/// artifact writes, so a dispatcher (or dependent backend invocation) that
/// observes `Complete` also observes the artifacts on disk.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: TaskState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> TaskState {
        match self.0.load(Ordering::Acquire) {
            0 => TaskState::Waiting,
            1 => TaskState::Compiling,
            2 => TaskState::Complete,
            _ => TaskState::Failed,
        }
    }

    pub fn store(&self, state: TaskState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// `Waiting -> Compiling`, the dispatcher's launch transition.
    pub fn try_begin_compile(&self) -> bool {
        self.0
            .compare_exchange(
                TaskState::Waiting as u8,
                TaskState::Compiling as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Clone for StateCell {
    fn clone(&self) -> Self {
        Self::new(self.load())
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(TaskState::Waiting)
    }
}

/// One translation unit the backend must compile.
#[derive(Clone, Debug)]
pub struct Task {
    /// Owning target; `None` for synthetic external tasks.
    pub target: Option<TargetId>,
    pub source: Source,
    /// `"{filename}.{content-hash:016x}"`, assigned after scanning.
    pub unique_name: String,
    /// Object file path, assigned by the backend.
    pub obj: PathBuf,
    /// Binary module interface path, assigned by the backend.
    pub bmi: PathBuf,
    pub include_dirs: Vec<PathBuf>,
    pub defines: Vec<String>,
    /// Logical module names this task provides.
    pub produces: Vec<String>,
    /// Logical module names this task consumes.
    pub requires: Vec<Require>,
    pub is_header_unit: bool,
    /// Standard library or external header unit task that we did not create
    /// from the manifest.
    pub external: bool,
    pub state: StateCell,
}

impl Task {
    pub fn new(target: TargetId, source: Source) -> Self {
        Self {
            target: Some(target),
            source,
            unique_name: String::new(),
            obj: PathBuf::new(),
            bmi: PathBuf::new(),
            include_dirs: Vec::new(),
            defines: Vec::new(),
            produces: Vec::new(),
            requires: Vec::new(),
            is_header_unit: false,
            external: false,
            state: StateCell::default(),
        }
    }

    /// A synthetic task not declared by any target, e.g. the toolchain's
    /// `std` module interface or an out-of-tree header unit.
    pub fn synthetic(source: Source) -> Self {
        Self { target: None, external: true, ..Self::new(0, source) }
    }

    /// Adds a requirement unless one with the same name already exists.
    pub fn require(&mut self, name: &str) {
        if !self.requires.iter().any(|req| req.name == name) {
            self.requires.push(Require::new(name));
        }
    }

    /// Adds a produced name unless already present.
    pub fn produce(&mut self, name: &str) {
        if !self.produces.iter().any(|produced| produced == name) {
            self.produces.push(name.to_string());
        }
    }

    /// Whether compilation emits a binary module interface for this task.
    pub fn emits_bmi(&self) -> bool {
        self.is_header_unit || self.source.kind == SourceKind::CppInterface
    }

    pub fn state(&self) -> TaskState {
        self.state.load()
    }
}
