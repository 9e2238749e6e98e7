//! Resolution of logical module names to the tasks that produce them.
//!
//! Runs after scanning and standard-module insertion, before any compiler is
//! spawned. On success every [`Require`](crate::task::Require) of every task
//! carries a resolved [`TaskId`] back-reference and the requires graph is
//! known to be acyclic.

use crate::{
    error::{BuildError, Result},
    task::{Task, TaskId},
};
use std::collections::HashMap;

/// Resolves every requirement of every task and rejects cycles.
///
/// Fatal errors, in detection order: duplicate production of a non-external
/// logical name, a requirement no task produces, and a cycle in the requires
/// graph.
pub fn resolve(tasks: &mut [Task]) -> Result<()> {
    let produced_by = producer_index(tasks)?;

    for id in 0..tasks.len() {
        for req in 0..tasks[id].requires.len() {
            let name = tasks[id].requires[req].name.clone();
            match produced_by.get(name.as_str()) {
                Some(&source) => {
                    trace!(
                        "[{}] requires [{name}] <- [{}]",
                        tasks[id].unique_name,
                        tasks[source].unique_name
                    );
                    tasks[id].requires[req].source = Some(source);
                }
                None => {
                    return Err(BuildError::UnresolvedImport {
                        task: tasks[id].unique_name.clone(),
                        name,
                    });
                }
            }
        }
    }

    reject_module_cycles(tasks)?;

    let stats = GraphStats::compute(tasks);
    debug!(
        "module graph depth {}, longest chain: {}",
        stats.max_depth,
        stats.longest_chain.join(" -> ")
    );

    Ok(())
}

/// Maps every produced logical name to its producing task.
///
/// A name produced by two non-external tasks is fatal; synthetic external
/// tasks may only collide with each other (first wins), which covers repeated
/// standard-module insertion.
fn producer_index(tasks: &[Task]) -> Result<HashMap<String, TaskId>> {
    let mut produced_by: HashMap<String, TaskId> = HashMap::new();
    for (id, task) in tasks.iter().enumerate() {
        for name in &task.produces {
            match produced_by.entry(name.clone()) {
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(id);
                }
                std::collections::hash_map::Entry::Occupied(entry) => {
                    let first = *entry.get();
                    if task.external && tasks[first].external {
                        continue;
                    }
                    return Err(BuildError::DuplicateProducer {
                        name: name.clone(),
                        first: tasks[first].unique_name.clone(),
                        second: task.unique_name.clone(),
                    });
                }
            }
        }
    }
    Ok(produced_by)
}

/// Three-color depth-first search over the resolved requires edges.
fn reject_module_cycles(tasks: &[Task]) -> Result<()> {
    const WHITE: u8 = 0;
    const GRAY: u8 = 1;
    const BLACK: u8 = 2;

    let mut colors = vec![WHITE; tasks.len()];
    let mut path: Vec<TaskId> = Vec::new();
    // (task, next requirement edge to visit)
    let mut stack: Vec<(TaskId, usize)> = Vec::new();

    for start in 0..tasks.len() {
        if colors[start] != WHITE {
            continue;
        }
        colors[start] = GRAY;
        path.push(start);
        stack.push((start, 0));

        while let Some(top) = stack.last_mut() {
            let (id, edge) = (top.0, top.1);
            top.1 += 1;

            if edge >= tasks[id].requires.len() {
                colors[id] = BLACK;
                path.pop();
                stack.pop();
                continue;
            }
            let Some(dep) = tasks[id].requires[edge].source else { continue };
            match colors[dep] {
                GRAY => {
                    let from = path.iter().position(|&t| t == dep).unwrap_or(0);
                    let mut chain: Vec<String> =
                        path[from..].iter().map(|&t| tasks[t].unique_name.clone()).collect();
                    chain.push(tasks[dep].unique_name.clone());
                    return Err(BuildError::ModuleCycle { chain });
                }
                WHITE => {
                    colors[dep] = GRAY;
                    path.push(dep);
                    stack.push((dep, 0));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Informational statistics of the resolved requires graph. Logged only;
/// never gates compilation.
#[derive(Clone, Debug, Default)]
pub struct GraphStats {
    /// Length of the longest requires chain, 1 for a dependency-free task.
    pub max_depth: usize,
    /// Unique names along one longest chain, dependency first.
    pub longest_chain: Vec<String>,
}

impl GraphStats {
    /// Memoized postorder depth computation. The graph must be acyclic.
    pub fn compute(tasks: &[Task]) -> Self {
        fn depth(id: TaskId, tasks: &[Task], memo: &mut [Option<usize>]) -> usize {
            if let Some(depth) = memo[id] {
                return depth;
            }
            let deepest = tasks[id]
                .requires
                .iter()
                .filter_map(|req| req.source)
                .map(|dep| depth(dep, tasks, memo))
                .max()
                .unwrap_or(0);
            memo[id] = Some(deepest + 1);
            deepest + 1
        }

        let mut memo = vec![None; tasks.len()];
        let mut max_depth = 0;
        let mut deepest_task = None;
        for id in 0..tasks.len() {
            let d = depth(id, tasks, &mut memo);
            if d > max_depth {
                max_depth = d;
                deepest_task = Some(id);
            }
        }

        // walk the memoized depths back down to recover one longest chain
        let mut longest_chain = Vec::new();
        let mut cursor = deepest_task;
        while let Some(id) = cursor {
            longest_chain.push(tasks[id].unique_name.clone());
            cursor = tasks[id]
                .requires
                .iter()
                .filter_map(|req| req.source)
                .max_by_key(|&dep| memo[dep].unwrap_or(0));
        }
        longest_chain.reverse();

        Self { max_depth, longest_chain }
    }
}
