//! Incremental up-to-date filtering.
//!
//! Runs after resolution, before scheduling. A task whose artifact is newer
//! than its source is marked `Complete` so the scheduler never launches it;
//! staleness then propagates transitively, so a task is only skipped when
//! every module it depends on is also up to date.
//!
//! Only the source file's own timestamp is considered — the `#include` graph
//! is deliberately not expanded, so touching a header that is not itself a
//! task does not trigger a rebuild.

use crate::{
    task::{SourceKind, Task, TaskState},
    utils,
};

/// Marks every up-to-date task `Complete` and returns how many survived
/// staleness propagation.
pub fn filter_up_to_date(tasks: &[Task]) -> usize {
    for task in tasks {
        if locally_fresh(task) {
            task.state.store(TaskState::Complete);
        }
    }
    propagate_staleness(tasks);
    let fresh = tasks.iter().filter(|task| task.state() == TaskState::Complete).count();
    debug!("{fresh}/{} tasks up to date", tasks.len());
    fresh
}

/// Source-vs-artifact timestamp comparison for one task.
///
/// Header units are judged by their `bmi`, everything else by its `obj`;
/// module interface units additionally need a fresh `bmi` so that a
/// `Complete` interface task always has one for its importers.
fn locally_fresh(task: &Task) -> bool {
    let Some(source) = utils::mtime(&task.source.path) else {
        return false;
    };
    let fresh = |artifact| matches!(utils::mtime(artifact), Some(time) if time >= source);

    if task.is_header_unit {
        fresh(&task.bmi)
    } else if task.source.kind == SourceKind::CppInterface {
        fresh(&task.obj) && fresh(&task.bmi)
    } else {
        fresh(&task.obj)
    }
}

/// Memoized postorder walk forcing locally-complete tasks whose transitive
/// requirements are stale back to `Waiting`.
fn propagate_staleness(tasks: &[Task]) {
    fn is_stale(id: usize, tasks: &[Task], memo: &mut [Option<bool>]) -> bool {
        if let Some(stale) = memo[id] {
            return stale;
        }
        // break self-referential chains defensively; resolution has already
        // rejected real cycles
        memo[id] = Some(false);
        let stale = tasks[id].state() != TaskState::Complete
            || tasks[id]
                .requires
                .iter()
                .filter_map(|req| req.source)
                .any(|dep| is_stale(dep, tasks, memo));
        memo[id] = Some(stale);
        stale
    }

    let mut memo = vec![None; tasks.len()];
    for id in 0..tasks.len() {
        if is_stale(id, tasks, &mut memo) && tasks[id].state() == TaskState::Complete {
            trace!("[{}] stale through its requirements", tasks[id].unique_name);
            tasks[id].state.store(TaskState::Waiting);
        }
    }
}
