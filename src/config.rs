//! Manifest model and target expansion.
//!
//! The manifest is a JSON document with a top-level `targets` array. Unknown
//! fields are ignored for forward compatibility; unknown enumeration values
//! (source types, executable subsystems, download types) are fatal.
//!
//! Expansion turns the manifest into the driver's [`Target`] arena and the
//! initial task list: import names are resolved to target ids, the tagged
//! import graph is flattened under the CMake-style visibility rules, and
//! declared source paths are walked into one [`Task`] per translation unit.

use crate::{
    error::{BuildError, Result},
    task::{
        Executable, ImportKind, Source, SourceKind, Subsystem, Target, TargetId, TargetImport, Task,
    },
    utils,
};
use serde::Deserialize;
use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// Default directory fetched dependencies are expanded into, relative to the
/// manifest root.
pub const DEPS_DIR: &str = ".deps";

/// The top level manifest document.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub targets: Vec<TargetManifest>,
}

impl Manifest {
    /// Reads and deserializes the manifest at `path`.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        utils::read_json_file(path)
    }
}

/// One target object of the manifest.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TargetManifest {
    pub name: String,
    /// Overrides the default `.deps/<name>` root directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
    #[serde(default)]
    pub include: Vec<PathBuf>,
    #[serde(default)]
    pub define: Vec<String>,
    #[serde(default)]
    pub shared: Vec<PathBuf>,
    #[serde(default)]
    pub link: Vec<PathBuf>,
    #[serde(default)]
    pub import: Vec<String>,
    #[serde(default, rename = "import-public")]
    pub import_public: Vec<String>,
    #[serde(default, rename = "import-interface")]
    pub import_interface: Vec<String>,
    #[serde(default)]
    pub executable: Option<ExecutableManifest>,
    /// Accepted for forward compatibility; fetching is not performed here.
    #[serde(default)]
    pub git: Option<GitManifest>,
    #[serde(default)]
    pub download: Option<DownloadManifest>,
    #[serde(default)]
    pub cmake: Option<CmakeManifest>,
}

/// A source declaration: either a bare path or a typed set of paths with
/// additional translation inputs.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum SourceEntry {
    Path(PathBuf),
    Set {
        #[serde(rename = "type")]
        kind: String,
        paths: Vec<PathBuf>,
        #[serde(default)]
        includes: Vec<PathBuf>,
        #[serde(default)]
        define: Vec<String>,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExecutableManifest {
    pub name: PathBuf,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum GitManifest {
    Url(String),
    Detailed {
        url: String,
        #[serde(default)]
        branch: Option<String>,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub struct DownloadManifest {
    pub url: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CmakeManifest {
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub include: Option<PathBuf>,
    #[serde(default)]
    pub link: Vec<PathBuf>,
    #[serde(default)]
    pub shared: Vec<PathBuf>,
}

/// Targets and their initial task list, ready for scanning.
#[derive(Clone, Debug, Default)]
pub struct Expanded {
    pub targets: Vec<Target>,
    pub tasks: Vec<Task>,
}

/// Expands the manifest into targets and tasks. `root` is the directory the
/// manifest's relative paths are anchored at.
pub fn expand(manifest: &Manifest, root: &Path) -> Result<Expanded> {
    let mut targets = Vec::with_capacity(manifest.targets.len());
    let mut ids = HashMap::new();

    for (id, decl) in manifest.targets.iter().enumerate() {
        if ids.insert(decl.name.clone(), id).is_some() {
            return Err(BuildError::DuplicateTarget(decl.name.clone()));
        }
        validate_ignored_fields(decl)?;

        let dir = match &decl.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root.join(dir),
            None => root.join(DEPS_DIR).join(&decl.name),
        };

        let executable = decl
            .executable
            .as_ref()
            .map(|exe| {
                Ok::<_, BuildError>(Executable {
                    path: exe.name.clone(),
                    subsystem: Subsystem::from_manifest(&exe.kind)?,
                })
            })
            .transpose()?;

        targets.push(Target {
            name: decl.name.clone(),
            include_dirs: decl.include.iter().map(|include| dir_join(include, &dir)).collect(),
            defines: decl.define.clone(),
            links: decl.link.iter().map(|lib| dir_join(lib, &dir)).collect(),
            shared: decl.shared.iter().map(|lib| dir_join(lib, &dir)).collect(),
            imports: Vec::new(),
            executable,
            flattened_imports: Vec::new(),
            root: dir,
        });
    }

    // Second pass: resolve import names now that every target has an id.
    for (id, decl) in manifest.targets.iter().enumerate() {
        let mut imports = Vec::new();
        for (names, kind) in [
            (&decl.import, ImportKind::Private),
            (&decl.import_public, ImportKind::Public),
            (&decl.import_interface, ImportKind::Interface),
        ] {
            for name in names {
                let target = *ids.get(name.as_str()).ok_or_else(|| BuildError::UnknownImport {
                    target: decl.name.clone(),
                    import: name.clone(),
                })?;
                imports.push(TargetImport { target, kind });
            }
        }
        targets[id].imports = imports;
    }

    reject_import_cycles(&targets)?;

    for id in 0..targets.len() {
        targets[id].flattened_imports = flatten_imports(&targets, id);
    }

    let mut tasks = Vec::new();
    for (id, decl) in manifest.targets.iter().enumerate() {
        expand_target_sources(&targets, id, decl, &mut tasks)?;
    }

    debug!("expanded {} targets into {} tasks", targets.len(), tasks.len());

    Ok(Expanded { targets, tasks })
}

fn dir_join(path: &Path, dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

/// Validates enum values inside fields the build engine otherwise ignores.
fn validate_ignored_fields(decl: &TargetManifest) -> Result<()> {
    if let Some(download) = &decl.download {
        match download.kind.as_deref() {
            None | Some("zip") => {}
            Some(other) => return Err(BuildError::UnknownDownloadType(other.to_string())),
        }
    }
    Ok(())
}

/// Rejects cycles in the target import graph before flattening walks it.
fn reject_import_cycles(targets: &[Target]) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    fn visit(
        id: TargetId,
        targets: &[Target],
        colors: &mut [Color],
        path: &mut Vec<TargetId>,
    ) -> Result<()> {
        colors[id] = Color::Gray;
        path.push(id);
        for import in &targets[id].imports {
            match colors[import.target] {
                Color::White => visit(import.target, targets, colors, path)?,
                Color::Gray => {
                    let from = path.iter().position(|&t| t == import.target).unwrap_or(0);
                    let mut chain: Vec<_> =
                        path[from..].iter().map(|&t| targets[t].name.clone()).collect();
                    chain.push(targets[import.target].name.clone());
                    return Err(BuildError::RecursiveTarget { chain });
                }
                Color::Black => {}
            }
        }
        path.pop();
        colors[id] = Color::Black;
        Ok(())
    }

    let mut colors = vec![Color::White; targets.len()];
    let mut path = Vec::new();
    for id in 0..targets.len() {
        if colors[id] == Color::White {
            visit(id, targets, &mut colors, &mut path)?;
        }
    }
    Ok(())
}

/// Computes the transitively imported target set for `owner`.
///
/// From the owning target every import edge is followed (its `Private` edges
/// contribute exactly once); from indirect targets only `Public` and
/// `Interface` edges propagate further.
fn flatten_imports(targets: &[Target], owner: TargetId) -> Vec<TargetId> {
    let mut flattened = BTreeSet::from([owner]);
    let mut stack: Vec<TargetId> =
        targets[owner].imports.iter().map(|import| import.target).collect();

    while let Some(id) = stack.pop() {
        if !flattened.insert(id) {
            continue;
        }
        for import in &targets[id].imports {
            if matches!(import.kind, ImportKind::Public | ImportKind::Interface) {
                stack.push(import.target);
            }
        }
    }

    flattened.into_iter().collect()
}

/// Creates one task per discovered translation unit of `decl`.
fn expand_target_sources(
    targets: &[Target],
    id: TargetId,
    decl: &TargetManifest,
    tasks: &mut Vec<Task>,
) -> Result<()> {
    let target = &targets[id];
    if decl.sources.is_empty() {
        return Ok(());
    }

    // Translation inputs visible to every task of this target: its own
    // include dirs and defines plus those of every flattened import.
    let mut include_dirs = Vec::new();
    let mut defines = Vec::new();
    for &imported in &target.flattened_imports {
        include_dirs.extend(targets[imported].include_dirs.iter().cloned());
        defines.extend(targets[imported].defines.iter().cloned());
    }

    for entry in &decl.sources {
        let (paths, manifest_kind, set_includes, set_defines) = match entry {
            SourceEntry::Path(path) => {
                (std::slice::from_ref(path), SourceKind::Unknown, &[][..], &[][..])
            }
            SourceEntry::Set { kind, paths, includes, define } => (
                paths.as_slice(),
                SourceKind::from_manifest(kind)?,
                includes.as_slice(),
                define.as_slice(),
            ),
        };

        let mut task_includes = include_dirs.clone();
        task_includes.extend(set_includes.iter().map(|dir| dir_join(dir, &target.root)));
        let mut task_defines = defines.clone();
        task_defines.extend(set_defines.iter().cloned());

        let mut add_source_file = |path: &Path| {
            let source = Source::new(path.to_path_buf(), manifest_kind);
            if source.kind == SourceKind::Unknown {
                return;
            }
            trace!("source {:?} - {}", source.kind, source.path.display());
            let mut task = Task::new(id, source);
            task.include_dirs = task_includes.clone();
            task.defines = task_defines.clone();
            tasks.push(task);
        };

        for path in paths {
            let path = dir_join(path, &target.root);
            if path.is_dir() {
                for file in WalkDir::new(&path).follow_links(true) {
                    let file = match file {
                        Ok(file) => file,
                        Err(err) => {
                            trace!("skipping unreadable dir entry: {err}");
                            continue;
                        }
                    };
                    if file.file_type().is_file() {
                        add_source_file(file.path());
                    }
                }
            } else if path.is_file() {
                add_source_file(&path);
            } else {
                warn!("source path [{}] is not a directory or file", path.display());
            }
        }
    }

    Ok(())
}
