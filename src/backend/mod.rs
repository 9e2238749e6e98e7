//! The toolchain abstraction the scheduler drives.
//!
//! Everything the build engine knows about an actual compiler lives behind
//! [`Backend`]: how artifacts are named, how the standard library's module
//! interfaces are located, and how a single task is compiled or a target
//! linked. The scheduler only relies on the contract below; the concrete
//! command lines live in [`msvc`] and [`clang_cl`].

use crate::{
    error::Result,
    task::{Target, Task},
};
use std::path::PathBuf;

pub mod clang_cl;
pub mod common;
pub mod msvc;

pub use clang_cl::ClangClBackend;
pub use msvc::MsvcBackend;

/// Adapter to one compiler/linker toolchain.
///
/// `compile_task` runs concurrently on worker threads; everything else is
/// called from the driver thread before or after scheduling.
pub trait Backend: Sync {
    /// Toolchain name for diagnostics.
    fn name(&self) -> &'static str;

    /// Writes the source paths of the toolchain's standard-module interface
    /// units onto the provided placeholder tasks.
    ///
    /// Fatal when the toolchain cannot supply them.
    fn generate_std_module_tasks(
        &self,
        std_task: Option<&mut Task>,
        std_compat_task: Option<&mut Task>,
    ) -> Result<()>;

    /// Appends system include directories inferred from the toolchain
    /// environment. Fatal when the environment is invalid.
    fn add_system_include_dirs(&self, include_dirs: &mut Vec<PathBuf>) -> Result<()>;

    /// Populates each task's `obj` and `bmi` paths using the toolchain's
    /// artifact conventions.
    fn add_task_info(&self, tasks: &mut [Task]);

    /// Compiles one task, producing its `obj` and (for interface and header
    /// units) `bmi` at the pre-assigned paths. Returns success.
    ///
    /// Every transitive requirement of `task` is `Complete` when this is
    /// called; `tasks` is the full list for resolving `Require::source`
    /// back-references.
    fn compile_task(&self, task: &Task, tasks: &[Task]) -> bool;

    /// Links `target`'s executable from the completed task artifacts.
    /// Returns success.
    fn link_step(&self, target: &Target, tasks: &[Task]) -> bool;

    /// Runs the toolchain's own dependency scan, returning one P1689 JSON
    /// document per task (same order), used to cross-check the in-house
    /// scanner. `None` when the toolchain offers no scan.
    fn find_dependencies(&self, _tasks: &[Task]) -> Result<Option<Vec<String>>> {
        Ok(None)
    }
}
