//! Concurrent task execution honoring the requires DAG.
//!
//! A single dispatcher loop runs in the caller's thread and owns every
//! launch decision; each ready task is CAS'd `Waiting -> Compiling` and
//! handed to its own scoped worker thread. Work is child-process bound, so
//! workers are not capped — oversubscription is acceptable and the backend's
//! process wait is the only place a worker blocks.
//!
//! A task is ready when every resolved requirement is `Complete`, which
//! combined with single-threaded dispatch gives the ordering guarantee: all
//! transitive dependencies of a task are `Complete` (artifacts visible, by
//! acquire/release pairing on the state word) before its compilation begins.

use crate::{
    backend::Backend,
    error::{BlockageReport, BlockedDependency, BlockedTask, BuildError, Result},
    task::{Task, TaskState},
};
use std::{
    sync::{Condvar, Mutex},
    thread,
};

/// Completion signal shared between the dispatcher and its workers: a count
/// of finished compilations under a mutex, and a condvar the dispatcher
/// sleeps on when a pass launched nothing new.
struct CompletionSignal {
    finished: Mutex<usize>,
    cond: Condvar,
}

impl CompletionSignal {
    fn new() -> Self {
        Self { finished: Mutex::new(0), cond: Condvar::new() }
    }

    /// Blocks until the finished count moves past `seen`, returning the new
    /// count.
    fn wait_past(&self, seen: usize) -> usize {
        let mut finished = self.finished.lock().unwrap();
        while *finished == seen {
            finished = self.cond.wait(finished).unwrap();
        }
        *finished
    }

    fn count(&self) -> usize {
        *self.finished.lock().unwrap()
    }
}

/// Publishes the worker's result on every exit path.
///
/// Dropping without [`finish`](Self::finish) — a panicking backend — still
/// marks the task `Failed` and wakes the dispatcher, so the queue can report
/// blockage instead of hanging.
struct CompletionGuard<'a> {
    task: &'a Task,
    signal: &'a CompletionSignal,
    success: bool,
}

impl CompletionGuard<'_> {
    fn finish(mut self, success: bool) {
        self.success = success;
    }
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.task
            .state
            .store(if self.success { TaskState::Complete } else { TaskState::Failed });
        let mut finished = self.signal.finished.lock().unwrap();
        *finished += 1;
        self.signal.cond.notify_all();
    }
}

/// Runs every non-terminal task through the backend, honoring requirement
/// order. Returns the number of tasks dispatched.
///
/// On a stalled queue (failed dependencies, or requirements that can never
/// complete) the per-task blockage report is returned as
/// [`BuildError::Blocked`].
pub fn execute(tasks: &[Task], backend: &dyn Backend) -> Result<usize> {
    let signal = CompletionSignal::new();

    thread::scope(|scope| {
        let signal = &signal;
        let mut num_started = 0usize;
        let mut last_seen = 0usize;

        loop {
            // Block for a completion when the previous pass launched work we
            // are still waiting on and nothing has finished since.
            if num_started > last_seen && signal.count() == last_seen {
                last_seen = signal.wait_past(last_seen);
            } else {
                last_seen = signal.count();
            }

            let mut remaining = 0usize;
            let mut launched = 0usize;

            for task in tasks {
                let state = task.state();
                if state.is_terminal() {
                    continue;
                }
                remaining += 1;
                if state != TaskState::Waiting {
                    continue;
                }

                let ready = task.requires.iter().all(|req| {
                    req.source
                        .map(|source| tasks[source].state() == TaskState::Complete)
                        .unwrap_or(false)
                });
                if !ready || !task.state.try_begin_compile() {
                    continue;
                }

                num_started += 1;
                launched += 1;
                trace!("dispatching [{}]", task.unique_name);
                scope.spawn(move || {
                    let guard = CompletionGuard { task, signal, success: false };
                    let success = backend.compile_task(task, tasks);
                    guard.finish(success);
                });
            }

            if remaining == 0 {
                debug!("dispatched {num_started} tasks");
                return Ok(num_started);
            }
            // Judge deadlock against the pre-walk snapshot: a completion
            // racing the walk shows up as `last_seen < num_started` and earns
            // another pass instead of a false blockage report.
            if launched == 0 && last_seen == num_started {
                return Err(BuildError::Blocked(blockage_report(tasks)));
            }
        }
    })
}

/// One entry per task that can never leave `Waiting`, each listing its
/// still-incomplete requirement names, annotated where the producer failed.
fn blockage_report(tasks: &[Task]) -> BlockageReport {
    let failed = tasks.iter().filter(|task| task.state() == TaskState::Failed).count();
    let blocked = tasks
        .iter()
        .filter(|task| !task.state().is_terminal())
        .map(|task| BlockedTask {
            unique_name: task.unique_name.clone(),
            waiting_on: task
                .requires
                .iter()
                .filter(|req| {
                    req.source
                        .map(|source| tasks[source].state() != TaskState::Complete)
                        .unwrap_or(true)
                })
                .map(|req| BlockedDependency {
                    name: req.name.clone(),
                    failed: req
                        .source
                        .map(|source| tasks[source].state() == TaskState::Failed)
                        .unwrap_or(false),
                })
                .collect(),
        })
        .collect();
    BlockageReport { failed, blocked }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Require, Source, SourceKind};
    use std::{
        collections::HashSet,
        path::PathBuf,
        sync::Mutex,
    };

    /// Backend that records compile order and can be told to fail tasks.
    struct StubBackend {
        fail: HashSet<String>,
        order: Mutex<Vec<String>>,
    }

    impl StubBackend {
        fn new(fail: &[&str]) -> Self {
            Self {
                fail: fail.iter().map(|s| s.to_string()).collect(),
                order: Mutex::new(Vec::new()),
            }
        }
    }

    impl Backend for StubBackend {
        fn name(&self) -> &'static str {
            "stub"
        }
        fn generate_std_module_tasks(
            &self,
            _std: Option<&mut Task>,
            _compat: Option<&mut Task>,
        ) -> crate::error::Result<()> {
            Ok(())
        }
        fn add_system_include_dirs(&self, _dirs: &mut Vec<PathBuf>) -> crate::error::Result<()> {
            Ok(())
        }
        fn add_task_info(&self, _tasks: &mut [Task]) {}
        fn compile_task(&self, task: &Task, tasks: &[Task]) -> bool {
            // the scheduler's ordering guarantee, checked on every dispatch
            for req in &task.requires {
                let source = req.source.expect("scheduled task with unresolved requirement");
                assert_eq!(
                    tasks[source].state(),
                    TaskState::Complete,
                    "[{}] dispatched before [{}]",
                    task.unique_name,
                    tasks[source].unique_name
                );
            }
            self.order.lock().unwrap().push(task.unique_name.clone());
            !self.fail.contains(&task.unique_name)
        }
        fn link_step(&self, _target: &crate::task::Target, _tasks: &[Task]) -> bool {
            true
        }
    }

    fn task(name: &str, requires: &[(&str, usize)]) -> Task {
        let mut task = Task::new(
            0,
            Source::new(PathBuf::from(format!("{name}.cpp")), SourceKind::CppSource),
        );
        task.unique_name = name.to_string();
        task.produce(name);
        task.requires = requires
            .iter()
            .map(|&(name, source)| Require { name: name.into(), source: Some(source) })
            .collect();
        task
    }

    #[test]
    fn empty_task_list_finishes_immediately() {
        let backend = StubBackend::new(&[]);
        assert_eq!(execute(&[], &backend).unwrap(), 0);
    }

    #[test]
    fn chain_compiles_in_dependency_order() {
        let tasks = vec![task("a", &[]), task("b", &[("a", 0)]), task("c", &[("b", 1)])];
        let backend = StubBackend::new(&[]);
        assert_eq!(execute(&tasks, &backend).unwrap(), 3);
        assert!(tasks.iter().all(|t| t.state() == TaskState::Complete));
        assert_eq!(*backend.order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn complete_tasks_are_not_redispatched() {
        let tasks = vec![task("a", &[]), task("b", &[("a", 0)])];
        tasks[0].state.store(TaskState::Complete);
        let backend = StubBackend::new(&[]);
        assert_eq!(execute(&tasks, &backend).unwrap(), 1);
        assert_eq!(*backend.order.lock().unwrap(), vec!["b"]);
    }

    #[test]
    fn failure_blocks_dependents_with_report() {
        // a <- b <- c, backend fails a
        let tasks = vec![task("a", &[]), task("b", &[("a", 0)]), task("c", &[("b", 1)])];
        let backend = StubBackend::new(&["a"]);
        let err = execute(&tasks, &backend).unwrap_err();

        assert_eq!(tasks[0].state(), TaskState::Failed);
        assert_eq!(tasks[1].state(), TaskState::Waiting);
        assert_eq!(tasks[2].state(), TaskState::Waiting);

        let BuildError::Blocked(report) = err else { panic!("expected blockage, got {err:?}") };
        assert_eq!(report.failed, 1);
        assert_eq!(report.blocked.len(), 2);

        let b = report.blocked.iter().find(|t| t.unique_name == "b").unwrap();
        assert!(b.waiting_on.iter().any(|dep| dep.name == "a" && dep.failed));
        let c = report.blocked.iter().find(|t| t.unique_name == "c").unwrap();
        assert!(c.waiting_on.iter().any(|dep| dep.name == "b" && !dep.failed));

        let rendered = report.to_string();
        assert!(rendered.contains("blocked after 1 failed compilation"), "{rendered}");
        assert!(rendered.contains("task [b] blocked"), "{rendered}");
        assert!(rendered.contains("a (failed)"), "{rendered}");
    }

    #[test]
    fn independent_siblings_continue_after_a_failure() {
        let tasks = vec![task("bad", &[]), task("good", &[]), task("child", &[("good", 1)])];
        let backend = StubBackend::new(&["bad"]);
        // a failure without dependents cannot block the queue; the driver
        // surfaces it after the drain
        assert_eq!(execute(&tasks, &backend).unwrap(), 3);
        assert_eq!(tasks[0].state(), TaskState::Failed);
        assert_eq!(tasks[1].state(), TaskState::Complete);
        assert_eq!(tasks[2].state(), TaskState::Complete);
    }

    #[test]
    fn panicking_backend_reports_failure_not_hang() {
        struct PanickingBackend;
        impl Backend for PanickingBackend {
            fn name(&self) -> &'static str {
                "panic"
            }
            fn generate_std_module_tasks(
                &self,
                _std: Option<&mut Task>,
                _compat: Option<&mut Task>,
            ) -> crate::error::Result<()> {
                Ok(())
            }
            fn add_system_include_dirs(
                &self,
                _dirs: &mut Vec<PathBuf>,
            ) -> crate::error::Result<()> {
                Ok(())
            }
            fn add_task_info(&self, _tasks: &mut [Task]) {}
            fn compile_task(&self, _task: &Task, _tasks: &[Task]) -> bool {
                panic!("compiler crashed");
            }
            fn link_step(&self, _target: &crate::task::Target, _tasks: &[Task]) -> bool {
                true
            }
        }

        let tasks = vec![task("a", &[])];
        let result = std::panic::catch_unwind(|| execute(&tasks, &PanickingBackend));
        // the scope re-raises the worker panic; the guard must still have
        // published the failure first
        assert!(result.is_err());
        assert_eq!(tasks[0].state(), TaskState::Failed);
    }

    #[test]
    fn wide_graphs_run_to_completion() {
        // one root, many leaves, one sink requiring all leaves
        let mut tasks = vec![task("root", &[])];
        for i in 0..32 {
            tasks.push(task(&format!("leaf{i}"), &[("root", 0)]));
        }
        let sink_requires: Vec<(String, usize)> =
            (0..32).map(|i| (format!("leaf{i}"), i + 1)).collect();
        let mut sink = task("sink", &[]);
        sink.requires = sink_requires
            .iter()
            .map(|(name, source)| Require { name: name.clone(), source: Some(*source) })
            .collect();
        tasks.push(sink);

        let backend = StubBackend::new(&[]);
        assert_eq!(execute(&tasks, &backend).unwrap(), 34);
        assert_eq!(backend.order.lock().unwrap().last().unwrap(), "sink");
    }
}
