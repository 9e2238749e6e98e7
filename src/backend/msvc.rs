//! MSVC (`cl` / `link`) backend.
//!
//! Artifact conventions: `<unique_name>.obj` and `<unique_name>.ifc` under
//! the build directory. Module dependencies are handed to `cl` as
//! `/reference name=bmi` and header units as `/headerUnit path=bmi`,
//! transitively, because `cl` does not chase references on its own.

use crate::{
    backend::{common, Backend},
    error::Result,
    p1689,
    task::{SourceKind, Subsystem, Target, Task},
};
use rayon::prelude::*;
use std::{fs, path::PathBuf};

#[derive(Clone, Debug)]
pub struct MsvcBackend {
    build_dir: PathBuf,
}

impl MsvcBackend {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        Self { build_dir: build_dir.into() }
    }

    fn common_flags(task: &Task) -> Vec<String> {
        let mut args = vec![
            "/c".into(),
            "/nologo".into(),
            "/std:c++latest".into(),
            "/EHsc".into(),
            "/Zc:preprocessor".into(),
            "/utf-8".into(),
            "/DUNICODE".into(),
            "/D_UNICODE".into(),
            "/permissive-".into(),
            "/Zc:__cplusplus".into(),
        ];
        for include_dir in &task.include_dirs {
            args.push(format!("/I{}", common::path_to_cmd_string(include_dir)));
        }
        for define in &task.defines {
            args.push(format!("/D{define}"));
        }
        args
    }
}

impl Backend for MsvcBackend {
    fn name(&self) -> &'static str {
        "msvc"
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
            return Err(crate::error::BuildError::Toolchain(
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
            task.bmi = self.build_dir.join(format!("{}.ifc", task.unique_name));
        }
    }

    fn compile_task(&self, task: &Task, tasks: &[Task]) -> bool {
        let mut args = Self::common_flags(task);
        let source = common::path_to_cmd_string(&task.source.path);

        match task.source.kind {
            SourceKind::CSource => {
                args.push("/TC".into());
                args.push(source);
            }
            SourceKind::CppSource => {
                args.push("/TP".into());
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
                args.push("/exportHeader".into());
                args.push("/TP".into());
                args.push(source);
            }
            SourceKind::CppInterface => {
                args.push("/interface".into());
                args.push("/TP".into());
                args.push(source);
            }
            SourceKind::Unknown => {
                error!("cannot compile [{}]: unknown source type", task.unique_name);
                return false;
            }
        }

        common::for_each_transitive_require(task, tasks, |dep, name| {
            if dep.is_header_unit {
                args.push("/headerUnit".into());
                args.push(format!(
                    "{}={}",
                    common::path_to_cmd_string(&dep.source.path),
                    common::path_to_cmd_string(&dep.bmi)
                ));
            } else {
                args.push("/reference".into());
                args.push(format!("{name}={}", common::path_to_cmd_string(&dep.bmi)));
            }
        });

        if task.emits_bmi() {
            args.push("/ifcOutput".into());
            args.push(file_name(&task.bmi));
        }
        if !task.is_header_unit {
            args.push(format!("/Fo:{}", file_name(&task.obj)));
        }

        let args = match common::complete_args("cl", args, &self.build_dir) {
            Ok(args) => args,
            Err(err) => {
                error!("{err}");
                return false;
            }
        };
        common::run_tool("cl", &self.build_dir, &args)
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

        let args = match common::complete_args("link", args, &self.build_dir) {
            Ok(args) => args,
            Err(err) => {
                error!("{err}");
                return false;
            }
        };
        common::run_tool("link", &self.build_dir, &args)
    }

    fn find_dependencies(&self, tasks: &[Task]) -> Result<Option<Vec<String>>> {
        common::ensure_msvc_environment(&self.build_dir)?;
        fs::create_dir_all(&self.build_dir)
            .map_err(|err| crate::error::BuildError::io(err, &self.build_dir))?;

        let dependency_info = tasks
            .par_iter()
            .enumerate()
            .map(|(i, task)| {
                let output = self.build_dir.join(format!("p1689_{i}.json"));
                let mut args = vec![
                    "/std:c++latest".to_string(),
                    "/nologo".into(),
                    "/scanDependencies".into(),
                    common::path_to_cmd_string(&output),
                    "/TP".into(),
                    common::path_to_cmd_string(&task.source.path),
                ];
                for include_dir in &task.include_dirs {
                    args.push(format!("/I{}", common::path_to_cmd_string(include_dir)));
                }
                for define in &task.defines {
                    args.push(format!("/D{define}"));
                }
                if !common::run_tool("cl", &self.build_dir, &args) {
                    return Err(crate::error::BuildError::Toolchain(format!(
                        "dependency scan failed for [{}]",
                        task.source.path.display()
                    )));
                }
                fs::read_to_string(&output)
                    .map_err(|err| crate::error::BuildError::io(err, &output))
            })
            .collect::<Result<Vec<_>>>()?;

        // parse eagerly so malformed scanner output fails here, not mid-check
        for info in &dependency_info {
            p1689::DepFile::parse(info)?;
        }

        Ok(Some(dependency_info))
    }
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
}
