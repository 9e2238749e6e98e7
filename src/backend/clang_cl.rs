//! clang-cl backend.
//!
//! Artifact conventions: `<unique_name>.obj` and `<unique_name>.pcm` under
//! the build directory. Module dependencies are `-fmodule-file=name=pcm`,
//! header units `-fmodule-file=pcm`, both transitively. The dependency scan
//! uses `clang-scan-deps -format=p1689`. Standard modules still come from
//! the MSVC installation, which clang-cl consumes on Windows.

use crate::{
    backend::{common, Backend},
    error::{BuildError, Result},
    p1689,
    task::{SourceKind, Subsystem, Target, Task},
};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use std::{fs, path::PathBuf};

static CLANG_CL: Lazy<String> =
    Lazy::new(|| std::env::var("HARMONY_CLANG_CL").unwrap_or_else(|_| "clang-cl".into()));
static CLANG_SCAN_DEPS: Lazy<String> = Lazy::new(|| {
    std::env::var("HARMONY_CLANG_SCAN_DEPS").unwrap_or_else(|_| "clang-scan-deps".into())
});
static LLD_LINK: Lazy<String> =
    Lazy::new(|| std::env::var("HARMONY_LLD_LINK").unwrap_or_else(|_| "lld-link".into()));

#[derive(Clone, Debug)]
pub struct ClangClBackend {
    build_dir: PathBuf,
}

impl ClangClBackend {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        Self { build_dir: build_dir.into() }
    }

    /// Source language selection plus the source path itself.
    fn source_args(task: &Task, args: &mut Vec<String>) -> bool {
        let source = common::path_to_cmd_string(&task.source.path);
        match task.source.kind {
            SourceKind::CSource => {
                args.push("-x".into());
                args.push("c".into());
                args.push(source);
            }
            SourceKind::CppSource => {
                args.push("/std:c++latest".into());
                args.push("-x".into());
                args.push("c++".into());
                args.push(source);
            }
            SourceKind::CppHeader => {
                if !task.is_header_unit {
                    error!(
                        "attempted to compile header [{}] that is not a header unit",
                        task.unique_name
                    );
                    return false;
                }
                args.push("/std:c++latest".into());
                args.push(format!("-fmodule-header={source}"));
            }
            SourceKind::CppInterface => {
                args.push("/std:c++latest".into());
                args.push("-x".into());
                args.push("c++-module".into());
                args.push(source);
            }
            SourceKind::Unknown => {
                error!("cannot compile [{}]: unknown source type", task.unique_name);
                return false;
            }
        }
        true
    }
}

impl Backend for ClangClBackend {
    fn name(&self) -> &'static str {
        "clang-cl"
    }

    fn generate_std_module_tasks(
        &self,
        std_task: Option<&mut Task>,
        std_compat_task: Option<&mut Task>,
    ) -> Result<()> {
        common::ensure_msvc_environment(&self.build_dir)?;
        let modules_dir = common::msvc_std_modules_dir()?;

        let module_file = modules_dir.join("std.ixx");
        if !module_file.exists() {
            return Err(BuildError::Toolchain(
                "std.ixx not found. Please install the C++ Modules component for Visual Studio"
                    .into(),
            ));
        }
        debug!("std module path: {}", module_file.display());

        if let Some(task) = std_task {
            task.source.path = module_file;
        }
        if let Some(task) = std_compat_task {
            task.source.path = modules_dir.join("std.compat.ixx");
        }
        Ok(())
    }

    fn add_system_include_dirs(&self, include_dirs: &mut Vec<PathBuf>) -> Result<()> {
        common::ensure_msvc_environment(&self.build_dir)?;
        include_dirs.extend(common::msvc_system_include_dirs()?);
        Ok(())
    }

    fn add_task_info(&self, tasks: &mut [Task]) {
        for task in tasks {
            task.obj = self.build_dir.join(format!("{}.obj", task.unique_name));
            task.bmi = self.build_dir.join(format!("{}.pcm", task.unique_name));
        }
    }

    fn compile_task(&self, task: &Task, tasks: &[Task]) -> bool {
        let mut args =
            vec!["/c".to_string(), "/nologo".into(), "-Wno-everything".into(), "/EHsc".into()];

        if !Self::source_args(task, &mut args) {
            return false;
        }

        for include_dir in &task.include_dirs {
            args.push(format!("/I{}", common::path_to_cmd_string(include_dir)));
        }
        for define in &task.defines {
            args.push(format!("/D{define}"));
        }

        common::for_each_transitive_require(task, tasks, |dep, name| {
            if dep.is_header_unit {
                args.push(format!("-fmodule-file={}", common::path_to_cmd_string(&dep.bmi)));
            } else {
                args.push(format!(
                    "-fmodule-file={name}={}",
                    common::path_to_cmd_string(&dep.bmi)
                ));
            }
        });

        if task.emits_bmi() {
            args.push(format!("-fmodule-output={}", file_name(&task.bmi)));
        }
        if !task.is_header_unit {
            args.push("-o".into());
            args.push(file_name(&task.obj));
        }

        let args = match common::complete_args(&CLANG_CL, args, &self.build_dir) {
            Ok(args) => args,
            Err(err) => {
                error!("{err}");
                return false;
            }
        };
        common::run_tool(&CLANG_CL, &self.build_dir, &args)
    }

    fn link_step(&self, target: &Target, tasks: &[Task]) -> bool {
        let Some(executable) = &target.executable else {
            return true;
        };
        let output = self.build_dir.join(&executable.path).with_extension("exe");

        let mut args = vec![
            "/nologo".to_string(),
            match executable.subsystem {
                Subsystem::Console => "/subsystem:console".into(),
                Subsystem::Window => "/subsystem:windows".into(),
            },
            format!("/OUT:{}", common::path_to_cmd_string(&output)),
        ];
        for obj in common::link_objects(target, tasks) {
            args.push(common::path_to_cmd_string(obj));
        }
        for lib in target.links.iter().chain(&target.shared) {
            args.push(common::path_to_cmd_string(lib));
        }

        let args = match common::complete_args(&LLD_LINK, args, &self.build_dir) {
            Ok(args) => args,
            Err(err) => {
                error!("{err}");
                return false;
            }
        };
        common::run_tool(&LLD_LINK, &self.build_dir, &args)
    }

    fn find_dependencies(&self, tasks: &[Task]) -> Result<Option<Vec<String>>> {
        fs::create_dir_all(&self.build_dir)
            .map_err(|err| BuildError::io(err, &self.build_dir))?;

        let dependency_info = tasks
            .par_iter()
            .enumerate()
            .map(|(i, task)| {
                let output = self.build_dir.join(format!("p1689_{i}.json"));
                let mut args = vec![
                    "-format=p1689".to_string(),
                    "-o".into(),
                    common::path_to_cmd_string(&output),
                    "--".into(),
                    CLANG_CL.clone(),
                    "/std:c++latest".into(),
                    "/nologo".into(),
                    "-x".into(),
                    "c++-module".into(),
                    common::path_to_cmd_string(&task.source.path),
                ];
                for include_dir in &task.include_dirs {
                    args.push(format!("/I{}", common::path_to_cmd_string(include_dir)));
                }
                for define in &task.defines {
                    args.push(format!("/D{define}"));
                }
                if !common::run_tool(&CLANG_SCAN_DEPS, &self.build_dir, &args) {
                    return Err(BuildError::Toolchain(format!(
                        "dependency scan failed for [{}]",
                        task.source.path.display()
                    )));
                }
                fs::read_to_string(&output).map_err(|err| BuildError::io(err, &output))
            })
            .collect::<Result<Vec<_>>>()?;

        for info in &dependency_info {
            p1689::DepFile::parse(info)?;
        }

        Ok(Some(dependency_info))
    }
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
}
