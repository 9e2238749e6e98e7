//! Shared test backend: compiles by writing artifact files atomically,
//! records invocation order, and can be told to fail specific sources.

use harmony::{
    task::{Target, Task, TaskState},
    Backend,
};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

pub struct StubBackend {
    build_dir: PathBuf,
    /// Directory the synthetic std module interfaces are materialized in.
    std_dir: PathBuf,
    /// Source file names whose compilation should fail.
    fail: HashSet<String>,
    /// Source file names in compile order.
    pub compiled: Mutex<Vec<String>>,
    pub linked: Mutex<Vec<String>>,
}

impl StubBackend {
    pub fn new(build_dir: impl Into<PathBuf>, std_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
            std_dir: std_dir.into(),
            fail: HashSet::new(),
            compiled: Mutex::new(Vec::new()),
            linked: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_on(mut self, sources: &[&str]) -> Self {
        self.fail = sources.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn compile_order(&self) -> Vec<String> {
        self.compiled.lock().unwrap().clone()
    }

    /// Index of `file` in the compile order; panics if it never compiled.
    pub fn compiled_at(&self, file: &str) -> usize {
        let order = self.compiled.lock().unwrap();
        order
            .iter()
            .position(|name| name == file)
            .unwrap_or_else(|| panic!("[{file}] was not compiled; order: {order:?}"))
    }

    fn file_name(task: &Task) -> String {
        task.source.path.file_name().unwrap().to_string_lossy().into_owned()
    }

    fn write_atomic(path: &Path, content: &str) {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, content).unwrap();
        fs::rename(&tmp, path).unwrap();
    }
}

impl Backend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn generate_std_module_tasks(
        &self,
        std_task: Option<&mut Task>,
        std_compat_task: Option<&mut Task>,
    ) -> harmony::Result<()> {
        fs::create_dir_all(&self.std_dir).unwrap();
        if let Some(task) = std_task {
            let path = self.std_dir.join("std.ixx");
            fs::write(&path, "export module std;\n").unwrap();
            task.source.path = path;
        }
        if let Some(task) = std_compat_task {
            let path = self.std_dir.join("std.compat.ixx");
            fs::write(&path, "export module std.compat;\nimport std;\n").unwrap();
            task.source.path = path;
        }
        Ok(())
    }

    fn add_system_include_dirs(&self, _include_dirs: &mut Vec<PathBuf>) -> harmony::Result<()> {
        Ok(())
    }

    fn add_task_info(&self, tasks: &mut [Task]) {
        for task in tasks {
            task.obj = self.build_dir.join(format!("{}.obj", task.unique_name));
            task.bmi = self.build_dir.join(format!("{}.bmi", task.unique_name));
        }
    }

    fn compile_task(&self, task: &Task, tasks: &[Task]) -> bool {
        // the ordering guarantee: every requirement is complete, its
        // artifacts already on disk
        for req in &task.requires {
            let source = req.source.expect("scheduled with unresolved requirement");
            let dep = &tasks[source];
            assert_eq!(dep.state(), TaskState::Complete, "[{}] not complete", dep.unique_name);
            if dep.emits_bmi() {
                assert!(dep.bmi.exists(), "missing bmi of [{}]", dep.unique_name);
            }
        }

        let name = Self::file_name(task);
        self.compiled.lock().unwrap().push(name.clone());
        if self.fail.contains(&name) {
            return false;
        }

        fs::create_dir_all(&self.build_dir).unwrap();
        if !task.is_header_unit {
            Self::write_atomic(&task.obj, &format!("obj of {name}"));
        }
        if task.emits_bmi() {
            Self::write_atomic(&task.bmi, &format!("bmi of {name}"));
        }
        true
    }

    fn link_step(&self, target: &Target, _tasks: &[Task]) -> bool {
        self.linked.lock().unwrap().push(target.name.clone());
        if let Some(executable) = &target.executable {
            let output = self.build_dir.join(&executable.path).with_extension("exe");
            Self::write_atomic(&output, &format!("exe of {}", target.name));
        }
        true
    }
}
