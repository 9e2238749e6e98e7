//! Property tests: scheduler safety/liveness over random acyclic task
//! graphs, deadlock reporting, and scanner determinism.

use harmony::{
    compile::scheduler,
    scan,
    task::{Require, Source, SourceKind, Task, TaskState},
    Backend, BuildError,
};
use proptest::{prelude::*, test_runner::TestCaseError};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Mutex,
};

/// In-memory backend asserting the ordering guarantee on every dispatch.
struct CountingBackend {
    fail: HashSet<usize>,
    compiled: Mutex<Vec<usize>>,
}

impl CountingBackend {
    fn new(fail: impl IntoIterator<Item = usize>) -> Self {
        Self { fail: fail.into_iter().collect(), compiled: Mutex::new(Vec::new()) }
    }
}

impl Backend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }
    fn generate_std_module_tasks(
        &self,
        _std: Option<&mut Task>,
        _compat: Option<&mut Task>,
    ) -> harmony::Result<()> {
        Ok(())
    }
    fn add_system_include_dirs(&self, _dirs: &mut Vec<PathBuf>) -> harmony::Result<()> {
        Ok(())
    }
    fn add_task_info(&self, _tasks: &mut [Task]) {}
    fn compile_task(&self, task: &Task, tasks: &[Task]) -> bool {
        for req in &task.requires {
            let source = req.source.expect("scheduled with unresolved requirement");
            assert_eq!(
                tasks[source].state(),
                TaskState::Complete,
                "[{}] began compiling before [{}] completed",
                task.unique_name,
                tasks[source].unique_name
            );
        }
        let id: usize = task.unique_name.strip_prefix('t').unwrap().parse().unwrap();
        self.compiled.lock().unwrap().push(id);
        !self.fail.contains(&id)
    }
    fn link_step(&self, _target: &harmony::Target, _tasks: &[Task]) -> bool {
        true
    }
}

/// Builds `n` tasks with a requirement edge `min -> max` for every pair, so
/// the graph is acyclic by construction.
fn make_tasks(n: usize, edges: &[(usize, usize)]) -> Vec<Task> {
    let mut tasks: Vec<Task> = (0..n)
        .map(|i| {
            let mut task = Task::new(
                0,
                Source::new(PathBuf::from(format!("t{i}.cpp")), SourceKind::CppSource),
            );
            task.unique_name = format!("t{i}");
            task.produce(&format!("m{i}"));
            task
        })
        .collect();

    for &(a, b) in edges {
        if a == b {
            continue;
        }
        let (dep, dependent) = if a < b { (a, b) } else { (b, a) };
        let name = format!("m{dep}");
        if !tasks[dependent].requires.iter().any(|req| req.name == name) {
            tasks[dependent].requires.push(Require { name, source: Some(dep) });
        }
    }
    tasks
}

/// Every task reachable from `from` along reverse requirement edges.
fn transitive_dependents(tasks: &[Task], from: usize) -> HashSet<usize> {
    let mut dependents = HashSet::new();
    let mut changed = true;
    while changed {
        changed = false;
        for (id, task) in tasks.iter().enumerate() {
            if dependents.contains(&id) {
                continue;
            }
            let blocked = task.requires.iter().any(|req| {
                req.source.is_some_and(|source| source == from || dependents.contains(&source))
            });
            if blocked {
                dependents.insert(id);
                changed = true;
            }
        }
    }
    dependents
}

fn arb_graph() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (2usize..24).prop_flat_map(|n| {
        let edges = proptest::collection::vec((0..n, 0..n), 0..n * 2);
        (Just(n), edges)
    })
}

proptest! {
    /// Liveness: with a zero-failure backend every task completes and the
    /// dispatcher exits. Safety is asserted inside the backend itself.
    #[test]
    fn scheduler_completes_random_acyclic_graphs((n, edges) in arb_graph()) {
        let tasks = make_tasks(n, &edges);
        let backend = CountingBackend::new([]);
        let dispatched = scheduler::execute(&tasks, &backend).unwrap();
        prop_assert_eq!(dispatched, n);
        prop_assert!(tasks.iter().all(|task| task.state() == TaskState::Complete));
        prop_assert_eq!(backend.compiled.lock().unwrap().len(), n);
    }

    /// Deadlock detection: failing one task leaves exactly its transitive
    /// dependents waiting, and the report names each with at least one
    /// still-incomplete requirement.
    #[test]
    fn scheduler_reports_blockage_for_failed_dependencies(
        (n, edges) in arb_graph(),
        fail_seed in any::<prop::sample::Index>(),
    ) {
        let tasks = make_tasks(n, &edges);
        let failed = fail_seed.index(n);
        let expected_blocked = transitive_dependents(&tasks, failed);

        let backend = CountingBackend::new([failed]);
        let result = scheduler::execute(&tasks, &backend);

        prop_assert_eq!(tasks[failed].state(), TaskState::Failed);
        if expected_blocked.is_empty() {
            // no dependents: the queue drains and the failure surfaces to
            // the driver instead
            let dispatched = result.unwrap();
            prop_assert_eq!(dispatched, n);
        } else {
            let err = result.unwrap_err();
            let BuildError::Blocked(report) = err else {
                return Err(TestCaseError::fail(format!("expected blockage, got {err:?}")));
            };
            prop_assert_eq!(report.failed, 1);

            let reported: HashSet<usize> = report
                .blocked
                .iter()
                .map(|task| task.unique_name.strip_prefix('t').unwrap().parse().unwrap())
                .collect();
            prop_assert_eq!(&reported, &expected_blocked);
            for blocked in &report.blocked {
                prop_assert!(
                    !blocked.waiting_on.is_empty(),
                    "[{}] reported blocked on nothing",
                    blocked.unique_name
                );
            }
        }
    }

    /// Scanning is deterministic: identical bytes give identical unique
    /// names, and the digest suffix is always 16 hex digits.
    #[test]
    fn scan_unique_names_are_deterministic(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let first = scan::scan(Path::new("input.cpp"), &bytes);
        let second = scan::scan(Path::new("input.cpp"), &bytes);
        match (first, second) {
            (Ok((_, a)), Ok((_, b))) => {
                prop_assert_eq!(&a.unique_name, &b.unique_name);
                prop_assert_eq!(a.hash, b.hash);
                let digest = a.unique_name.rsplit('.').next().unwrap();
                prop_assert_eq!(digest.len(), 16);
                prop_assert!(digest.bytes().all(|b| b.is_ascii_hexdigit()));
            }
            (Err(_), Err(_)) => {}
            (a, b) => {
                return Err(TestCaseError::fail(format!("non-deterministic scan: {a:?} vs {b:?}")));
            }
        }
    }
}
