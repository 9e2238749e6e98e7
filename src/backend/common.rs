//! Helpers shared by the MSVC and clang-cl backends: command path
//! formatting, response files, transitive requirement walks, and the MSVC
//! developer environment bootstrap.

use crate::{
    error::{BuildError, Result},
    task::{Target, Task, TaskId},
    utils,
};
use once_cell::sync::OnceCell;
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    process::Command,
    sync::atomic::{AtomicU32, Ordering},
};

/// Command lines longer than this are spilled into a response file.
const CMD_SIZE_LIMIT: usize = 4000;

/// Name of the environment capture file under the build directory.
const MSVC_ENV_FILE: &str = "env";

const VCVARS_PATH: &str =
    "C:/Program Files/Microsoft Visual Studio/2022/Community/VC/Auxiliary/Build/vcvars64.bat";

const VCTOOLS_ENV_NAME: &str = "VCToolsInstallDir";

/// Formats a path for a toolchain command line: absolute, backslashed on
/// Windows, and quoted when it contains spaces.
pub fn path_to_cmd_string(path: &Path) -> String {
    let mut s = utils::absolute(path).to_string_lossy().into_owned();
    if cfg!(windows) {
        s = s.replace('/', "\\");
    }
    if s.contains(' ') {
        s = format!("\"{s}\"");
    }
    s
}

/// Returns the argument list to pass to the tool, spilling to a response
/// file under `<build_dir>/cmds` when the assembled command would exceed the
/// platform limit.
///
/// Response files carry a monotonically increasing id and are never garbage
/// collected during a run.
pub fn complete_args(program: &str, args: Vec<String>, build_dir: &Path) -> Result<Vec<String>> {
    static CMD_FILE_ID: AtomicU32 = AtomicU32::new(0);

    let cmd_length =
        program.len() + args.iter().map(|arg| arg.len() + 1).sum::<usize>();
    if cmd_length <= CMD_SIZE_LIMIT {
        return Ok(args);
    }

    let cmd_dir = build_dir.join("cmds");
    fs::create_dir_all(&cmd_dir).map_err(|err| BuildError::io(err, &cmd_dir))?;
    let cmd_path = cmd_dir.join(format!("cmd.{}", CMD_FILE_ID.fetch_add(1, Ordering::Relaxed)));
    fs::write(&cmd_path, args.join("\n")).map_err(|err| BuildError::io(err, &cmd_path))?;

    Ok(vec![format!("@{}", path_to_cmd_string(&cmd_path))])
}

/// Runs the tool in `cwd` and reports success. Failures to spawn are logged
/// and reported as an unsuccessful run.
pub fn run_tool(program: &str, cwd: &Path, args: &[String]) -> bool {
    trace!("[cmd] {program} {}", args.join(" "));
    match Command::new(program).args(args).current_dir(cwd).status() {
        Ok(status) => status.success(),
        Err(err) => {
            error!("failed to spawn [{program}]: {err}");
            false
        }
    }
}

/// Visits every transitive requirement of `task` exactly once, dependencies
/// in discovery order. The callback receives the resolved producing task and
/// the logical name it was required under.
pub fn for_each_transitive_require<F>(task: &Task, tasks: &[Task], mut f: F)
where
    F: FnMut(&Task, &str),
{
    let mut seen: HashSet<&str> = HashSet::new();
    let mut stack: Vec<TaskId> = Vec::new();

    for req in &task.requires {
        if let Some(source) = req.source {
            if seen.insert(&req.name) {
                f(&tasks[source], &req.name);
                stack.push(source);
            }
        }
    }
    while let Some(id) = stack.pop() {
        for req in &tasks[id].requires {
            if let Some(source) = req.source {
                if seen.insert(&req.name) {
                    f(&tasks[source], &req.name);
                    stack.push(source);
                }
            }
        }
    }
}

/// Object files the linker consumes for `target`: every non-header-unit task
/// of the target's flattened import set plus the external synthetic tasks.
pub fn link_objects<'a>(target: &Target, tasks: &'a [Task]) -> Vec<&'a Path> {
    tasks
        .iter()
        .filter(|task| !task.is_header_unit)
        .filter(|task| {
            task.external
                || task
                    .target
                    .is_some_and(|id| target.flattened_imports.contains(&id))
        })
        .map(|task| task.obj.as_path())
        .collect()
}

/// Ensures `VCToolsInstallDir` and friends are present in this process'
/// environment.
///
/// Reuses an inherited developer environment when possible; otherwise
/// captures `vcvars64.bat && set` into `<build_dir>/env` once and replays it.
pub fn ensure_msvc_environment(build_dir: &Path) -> Result<()> {
    static MSVC_ENV: OnceCell<()> = OnceCell::new();
    MSVC_ENV.get_or_try_init(|| setup_msvc_environment(build_dir)).copied()
}

fn setup_msvc_environment(build_dir: &Path) -> Result<()> {
    if std::env::var_os(VCTOOLS_ENV_NAME).is_some() {
        debug!("using existing Visual Studio environment");
        return Ok(());
    }

    let env_path = build_dir.join(MSVC_ENV_FILE);
    if !env_path.exists() {
        fs::create_dir_all(build_dir).map_err(|err| BuildError::io(err, build_dir))?;
        debug!("generating Visual Studio environment in [{}]", env_path.display());
        let script = format!("\"{VCVARS_PATH}\" && set > {}", path_to_cmd_string(&env_path));
        let status = Command::new("cmd")
            .args(["/C", &script])
            .status()
            .map_err(|err| BuildError::io(err, VCVARS_PATH))?;
        if !status.success() {
            return Err(BuildError::Toolchain(format!(
                "vcvars64.bat failed with {status}; is Visual Studio installed?"
            )));
        }
    } else {
        debug!("loading Visual Studio environment from [{}]", env_path.display());
    }

    let content = fs::read_to_string(&env_path).map_err(|err| BuildError::io(err, &env_path))?;
    for line in content.lines() {
        let line = line.trim_end_matches('\r');
        let Some((key, value)) = line.split_once('=') else {
            return Err(BuildError::Toolchain(format!("invalid environment line: {line}")));
        };
        trace!("setting env[{key}]");
        std::env::set_var(key, value);
    }

    if std::env::var_os(VCTOOLS_ENV_NAME).is_none() {
        return Err(BuildError::Toolchain(format!(
            "{VCTOOLS_ENV_NAME} still unset after replaying [{}]",
            env_path.display()
        )));
    }
    Ok(())
}

/// Directory holding the toolchain's standard module interface units.
pub fn msvc_std_modules_dir() -> Result<PathBuf> {
    let tools_dir = std::env::var_os(VCTOOLS_ENV_NAME).ok_or_else(|| {
        BuildError::Toolchain("not running in a valid VS developer environment".into())
    })?;
    Ok(PathBuf::from(tools_dir).join("modules"))
}

/// System include directories from the developer environment's `INCLUDE`.
pub fn msvc_system_include_dirs() -> Result<Vec<PathBuf>> {
    let include = std::env::var("INCLUDE").map_err(|_| {
        BuildError::Toolchain("INCLUDE is not set; not a valid VS developer environment".into())
    })?;
    Ok(include.split(';').filter(|s| !s.is_empty()).map(PathBuf::from).collect())
}
