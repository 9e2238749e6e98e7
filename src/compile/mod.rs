//! Manages the build of a manifest's targets.
//!
//! The build is performed in several steps.
//!
//! First the manifest is expanded into the target arena and the initial task
//! list ([`crate::config::expand`]). Every task is then scanned for module
//! declarations, the standard-library module tasks are materialized, header
//! units are promoted from their import spellings, and the backend assigns
//! artifact paths. Resolution links every requirement to its producing task
//! and rejects cycles ([`crate::resolver`]).
//!
//! At this point we check whether a task needs to be compiled at all or
//! whether its artifacts can be reused: a task is skipped when its artifacts
//! are newer than its source and all of its transitive requirements are also
//! up to date ([`crate::cache`]).
//!
//! The remaining tasks are executed by the concurrent scheduler
//! ([`scheduler`]), and finally every target that declares an executable is
//! linked. The whole pipeline is a state machine so the phases can be
//! inspected individually.

pub mod scheduler;

use crate::{
    backend::Backend,
    cache,
    config::{self, Manifest},
    error::{BuildError, Result},
    p1689, resolver,
    scan::{self, ComponentKind},
    task::{Source, SourceKind, Target, Task, TaskState},
    utils,
};
use rayon::prelude::*;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

/// Name of the default build directory.
pub const BUILD_DIR: &str = ".harmony";

/// Logical names of the toolchain's standard modules.
const STD_MODULE: &str = "std";
const STD_COMPAT_MODULE: &str = "std.compat";

#[derive(Clone, Debug)]
pub struct BuildOptions {
    /// Root directory for every derived artifact.
    pub build_dir: PathBuf,
    /// Recompile everything, ignoring up-to-date artifacts.
    pub no_cache: bool,
    /// Cross-check the in-house scanner against the toolchain's P1689 scan.
    pub verify_scan: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { build_dir: PathBuf::from(BUILD_DIR), no_cache: false, verify_scan: false }
    }
}

/// What a finished build did.
#[derive(Clone, Debug, Default)]
pub struct BuildSummary {
    pub total: usize,
    pub up_to_date: usize,
    pub compiled: usize,
    pub linked: Vec<String>,
}

/// Drives a manifest through expansion, scanning, resolution, filtering,
/// scheduling, and linking.
///
/// # Examples
///
/// ```no_run
/// use harmony::{BuildDriver, BuildOptions, Manifest, MsvcBackend};
///
/// let manifest = Manifest::read("harmony.json")?;
/// let backend = MsvcBackend::new(".harmony");
/// let summary =
///     BuildDriver::new(&manifest, ".".as_ref(), &backend, BuildOptions::default()).build()?;
/// println!("compiled {} of {} tasks", summary.compiled, summary.total);
/// # Ok::<(), harmony::BuildError>(())
/// ```
pub struct BuildDriver<'a> {
    manifest: &'a Manifest,
    /// Directory the manifest's relative paths are anchored at.
    root: &'a Path,
    backend: &'a dyn Backend,
    options: BuildOptions,
}

impl<'a> BuildDriver<'a> {
    pub fn new(
        manifest: &'a Manifest,
        root: &'a Path,
        backend: &'a dyn Backend,
        options: BuildOptions,
    ) -> Self {
        Self { manifest, root, backend, options }
    }

    /// Runs the whole pipeline.
    pub fn build(self) -> Result<BuildSummary> {
        let start = Instant::now();
        let summary = self.expand()?.scan()?.resolve()?.execute()?;
        info!(
            "built {} tasks ({} up to date, {} compiled) in {:.2?}",
            summary.total,
            summary.up_to_date,
            summary.compiled,
            start.elapsed()
        );
        Ok(summary)
    }

    /// Expands the manifest and collects the toolchain's system include
    /// directories used for header-unit resolution.
    fn expand(self) -> Result<ExpandedState<'a>> {
        debug!("expanding manifest with backend [{}]", self.backend.name());
        fs::create_dir_all(&self.options.build_dir)
            .map_err(|err| BuildError::io(err, &self.options.build_dir))?;

        let config::Expanded { targets, tasks } = config::expand(self.manifest, self.root)?;

        let mut system_include_dirs = Vec::new();
        self.backend.add_system_include_dirs(&mut system_include_dirs)?;

        Ok(ExpandedState {
            targets,
            tasks,
            system_include_dirs,
            backend: self.backend,
            options: self.options,
        })
    }
}

/// A header-unit import spelling waiting to be resolved to a file.
#[derive(Clone, Debug)]
struct HeaderImport {
    spelling: String,
    angled: bool,
}

/// State after manifest expansion: targets exist, tasks have sources and
/// translation inputs but no scan data yet.
struct ExpandedState<'a> {
    targets: Vec<Target>,
    tasks: Vec<Task>,
    system_include_dirs: Vec<PathBuf>,
    backend: &'a dyn Backend,
    options: BuildOptions,
}

impl<'a> ExpandedState<'a> {
    /// Scans every task, inserts the standard-module tasks, promotes header
    /// units, prunes plain headers, and assigns artifact paths.
    fn scan(mut self) -> Result<ScannedState<'a>> {
        trace!("scanning {} tasks", self.tasks.len());

        let header_imports: Vec<Vec<HeaderImport>> = self
            .tasks
            .par_iter_mut()
            .map(scan_task)
            .collect::<Result<_>>()?;

        if self.options.verify_scan {
            self.verify_scan()?;
        }

        self.insert_std_module_tasks()?;
        self.promote_header_units(&header_imports)?;
        // header tasks that were never promoted contribute neither BMI nor
        // object and are dropped before resolution
        self.tasks
            .retain(|task| task.is_header_unit || task.source.kind != SourceKind::CppHeader);

        self.backend.add_task_info(&mut self.tasks);

        let Self { targets, tasks, backend, options, .. } = self;
        Ok(ScannedState { targets, tasks, backend, options })
    }

    /// Cross-checks every scanned task against the toolchain's own
    /// dependency scan; any difference is fatal.
    fn verify_scan(&self) -> Result<()> {
        let Some(dependency_info) = self.backend.find_dependencies(&self.tasks)? else {
            warn!("backend [{}] offers no dependency scan to verify against", self.backend.name());
            return Ok(());
        };
        for (task, info) in self.tasks.iter().zip(&dependency_info) {
            let dep_file = p1689::DepFile::parse(info)?;
            p1689::verify_scan(task, &dep_file)?;
        }
        debug!("toolchain scan matches for all {} tasks", self.tasks.len());
        Ok(())
    }

    /// Materializes synthetic `std` / `std.compat` tasks when any scanned
    /// task requires them.
    fn insert_std_module_tasks(&mut self) -> Result<()> {
        let requires = |name: &str| {
            self.tasks.iter().any(|task| task.requires.iter().any(|req| req.name == name))
        };
        let needs_compat = requires(STD_COMPAT_MODULE);
        let needs_std = needs_compat || requires(STD_MODULE);
        if !needs_std {
            return Ok(());
        }

        let synthetic = |produces: &str| {
            let mut task = Task::synthetic(Source::new(PathBuf::new(), SourceKind::CppInterface));
            task.produce(produces);
            task
        };

        let mut std_task = synthetic(STD_MODULE);
        let mut compat_task = needs_compat.then(|| {
            let mut task = synthetic(STD_COMPAT_MODULE);
            task.require(STD_MODULE);
            task
        });

        self.backend.generate_std_module_tasks(Some(&mut std_task), compat_task.as_mut())?;

        std_task.unique_name = utils::unique_name_of_file(&std_task.source.path)?;
        debug!("std module task [{}]", std_task.unique_name);
        self.tasks.push(std_task);
        if let Some(mut task) = compat_task {
            task.unique_name = utils::unique_name_of_file(&task.source.path)?;
            self.tasks.push(task);
        }
        Ok(())
    }

    /// Resolves every header-unit import spelling to a file. A spelling that
    /// lands on a declared header task promotes it; one that lands on a
    /// foreign file synthesizes an external header-unit task; one that lands
    /// nowhere is fatal.
    fn promote_header_units(&mut self, header_imports: &[Vec<HeaderImport>]) -> Result<()> {
        let mut header_tasks: HashMap<PathBuf, usize> = HashMap::new();
        for (id, task) in self.tasks.iter().enumerate() {
            if task.source.kind == SourceKind::CppHeader {
                header_tasks.insert(utils::canonicalize(&task.source.path), id);
            }
        }

        for (importer, imports) in header_imports.iter().enumerate() {
            for import in imports {
                let Some(path) = self.resolve_header(importer, import) else {
                    return Err(BuildError::UnresolvedHeaderUnit {
                        task: self.tasks[importer].unique_name.clone(),
                        header: import.spelling.clone(),
                    });
                };

                if let Some(&header) = header_tasks.get(&path) {
                    let task = &mut self.tasks[header];
                    if !task.is_header_unit {
                        debug!("promoting [{}] to header unit", task.unique_name);
                        task.is_header_unit = true;
                    }
                    task.produce(&import.spelling);
                } else {
                    debug!(
                        "external header unit [{}] -> {}",
                        import.spelling,
                        path.display()
                    );
                    let mut task =
                        Task::synthetic(Source::new(path.clone(), SourceKind::CppHeader));
                    task.is_header_unit = true;
                    task.produce(&import.spelling);
                    task.unique_name = utils::unique_name_of_file(&path)?;
                    header_tasks.insert(path, self.tasks.len());
                    self.tasks.push(task);
                }
            }
        }
        Ok(())
    }

    /// Looks the spelling up the way the preprocessor would: quoted imports
    /// first try the importing file's directory, then everything falls back
    /// to the task's include directories and the system include directories.
    fn resolve_header(&self, importer: usize, import: &HeaderImport) -> Option<PathBuf> {
        let task = &self.tasks[importer];
        let local = (!import.angled)
            .then(|| task.source.path.parent().map(Path::to_path_buf))
            .flatten();

        local
            .iter()
            .chain(task.include_dirs.iter())
            .chain(self.system_include_dirs.iter())
            .map(|dir| dir.join(&import.spelling))
            .find(|candidate| candidate.is_file())
            .map(utils::canonicalize)
    }
}

/// Applies one task's scan: unique name, produces/requires, and the header
/// imports that still need path resolution.
fn scan_task(task: &mut Task) -> Result<Vec<HeaderImport>> {
    let bytes =
        fs::read(&task.source.path).map_err(|err| BuildError::io(err, &task.source.path))?;
    let (components, result) = scan::scan(&task.source.path, &bytes)?;
    task.unique_name = result.unique_name;

    let mut header_imports = Vec::new();
    for component in components {
        match component.kind {
            // plain includes carry no module dependency information
            ComponentKind::Header => {}
            ComponentKind::HeaderUnit => {
                task.require(&component.name);
                header_imports
                    .push(HeaderImport { spelling: component.name, angled: component.angled });
            }
            ComponentKind::Interface if component.imported => task.require(&component.name),
            ComponentKind::Interface => {
                // `export module a;` and partition units produce; a plain
                // `module a;` implementation unit consumes the interface BMI
                if component.exported || component.name.contains(':') {
                    task.produce(&component.name);
                } else {
                    task.require(&component.name);
                }
            }
        }
    }
    Ok(header_imports)
}

/// State after scanning: the task list is final and carries produce/require
/// sets plus artifact paths.
struct ScannedState<'a> {
    targets: Vec<Target>,
    tasks: Vec<Task>,
    backend: &'a dyn Backend,
    options: BuildOptions,
}

impl<'a> ScannedState<'a> {
    /// Advances by resolving every requirement and rejecting cycles.
    fn resolve(mut self) -> Result<ResolvedState<'a>> {
        trace!("resolving {} tasks", self.tasks.len());
        resolver::resolve(&mut self.tasks)?;
        let Self { targets, tasks, backend, options } = self;
        Ok(ResolvedState { targets, tasks, backend, options })
    }
}

/// State with a fully resolved DAG, ready to filter and schedule.
struct ResolvedState<'a> {
    targets: Vec<Target>,
    tasks: Vec<Task>,
    backend: &'a dyn Backend,
    options: BuildOptions,
}

impl ResolvedState<'_> {
    /// Filters up-to-date tasks, runs the scheduler, and links every target
    /// with an executable descriptor.
    fn execute(self) -> Result<BuildSummary> {
        let up_to_date = if self.options.no_cache {
            0
        } else {
            cache::filter_up_to_date(&self.tasks)
        };

        let compiled = scheduler::execute(&self.tasks, self.backend)?;

        // A failed task without dependents does not deadlock the queue, but
        // it still fails the build and skips linking.
        let failed_tasks: Vec<String> = self
            .tasks
            .iter()
            .filter(|task| task.state() == TaskState::Failed)
            .map(|task| task.unique_name.clone())
            .collect();
        if !failed_tasks.is_empty() {
            return Err(BuildError::CompileFailed { tasks: failed_tasks });
        }

        let mut linked = Vec::new();
        let mut failed = Vec::new();
        for target in self.targets.iter().filter(|target| target.executable.is_some()) {
            info!("linking [{}]", target.name);
            if self.backend.link_step(target, &self.tasks) {
                linked.push(target.name.clone());
            } else {
                // a failed link does not unwind targets already linked
                error!("link failed for [{}]", target.name);
                failed.push(target.name.clone());
            }
        }
        if !failed.is_empty() {
            return Err(BuildError::LinkFailed { targets: failed });
        }

        Ok(BuildSummary { total: self.tasks.len(), up_to_date, compiled, linked })
    }
}
