use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::{GraphError, PlanError};
use crate::stage::{StageId, StageStatus};

use super::graph::PlanGraph;

/// Stages that may run concurrently: all of their dependencies are verified
/// or sit in an earlier level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLevel {
    pub index: usize,
    /// Sorted by id.
    pub stage_ids: Vec<StageId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelPlan {
    pub levels: Vec<ExecutionLevel>,
    /// Non-terminal stages that can never run because a dependency failed
    /// or escalated. Sorted by id.
    pub blocked: Vec<StageId>,
}

impl LevelPlan {
    pub fn next_level(&self) -> Option<&ExecutionLevel> {
        self.levels.first()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn scheduled_count(&self) -> usize {
        self.levels.iter().map(|l| l.stage_ids.len()).sum()
    }

    /// Level index of `id`, if scheduled.
    pub fn level_of(&self, id: &str) -> Option<usize> {
        self.levels
            .iter()
            .find(|l| l.stage_ids.iter().any(|s| s.as_str() == id))
            .map(|l| l.index)
    }
}

/// Partition the non-terminal stages of `graph` into execution levels using
/// Kahn's algorithm.
///
/// Verified dependencies count as satisfied. Stages downstream of a failed or
/// escalated stage are reported in [`LevelPlan::blocked`]. The result is a pure
/// function of the graph's current statuses.
pub fn compute_levels(graph: &PlanGraph) -> Result<LevelPlan, GraphError> {
    let mut blocked: BTreeSet<StageId> = BTreeSet::new();
    for stage in graph.stages().filter(|s| s.status.is_dead_end()) {
        for dependent in graph.transitive_dependents_of(stage.id.as_str()) {
            if graph.status(dependent.as_str()).is_some_and(|s| !s.is_terminal()) {
                blocked.insert(dependent);
            }
        }
    }

    let remaining: HashSet<&StageId> = graph
        .stages()
        .filter(|s| !s.status.is_terminal() && !blocked.contains(&s.id))
        .map(|s| &s.id)
        .collect();

    // in_degree counts unsatisfied dependencies only
    let mut in_degree: HashMap<&StageId, usize> = HashMap::with_capacity(remaining.len());
    for &id in &remaining {
        let mut degree = 0;
        for dep in graph.dependencies_of(id.as_str()) {
            match graph.status(dep.as_str()) {
                None => {
                    return Err(GraphError::DependencyNotFound {
                        stage: id.clone(),
                        missing: dep.clone(),
                    })
                }
                Some(StageStatus::Verified) => {}
                Some(_) => degree += 1,
            }
        }
        in_degree.insert(id, degree);
    }

    let mut current: Vec<&StageId> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&id, _)| id)
        .collect();
    current.sort();

    let mut levels = Vec::new();
    let mut processed = 0;

    while !current.is_empty() {
        processed += current.len();

        let mut next = Vec::new();
        for &id in &current {
            for dependent in graph.dependents_of(id.as_str()) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(dependent);
                    }
                }
            }
        }
        next.sort();
        next.dedup();

        levels.push(ExecutionLevel {
            index: levels.len(),
            stage_ids: current.into_iter().cloned().collect(),
        });
        current = next;
    }

    if processed != remaining.len() {
        let cycle = graph.detect_cycle().unwrap_or_else(|| {
            let mut stuck: Vec<StageId> = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(id, _)| id.clone())
                .collect();
            stuck.sort();
            stuck
        });
        return Err(GraphError::cycle(cycle));
    }

    Ok(LevelPlan {
        levels,
        blocked: blocked.into_iter().collect(),
    })
}

/// Run one level: one future per stage, at most `max_parallel` at a time.
///
/// Results come back in completion order.
pub async fn run_level_parallel<F, Fut, R>(
    stage_ids: &[StageId],
    max_parallel: usize,
    run_fn: F,
) -> Result<Vec<R>, PlanError>
where
    F: Fn(StageId) -> Fut + Clone,
    Fut: Future<Output = R>,
{
    let sem = Arc::new(Semaphore::new(max_parallel.max(1)));
    let mut futs = FuturesUnordered::new();

    for id in stage_ids {
        let sem = sem.clone();
        let run = run_fn.clone();
        let stage_id = id.clone();

        futs.push(async move {
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|_| PlanError::Join("worker pool closed unexpectedly".into()))?;

            Ok::<R, PlanError>(run(stage_id).await)
        });
    }

    let mut results = Vec::with_capacity(stage_ids.len());
    while let Some(res) = futs.next().await {
        results.push(res?);
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Stage;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ids(raw: &[&str]) -> Vec<StageId> {
        raw.iter().map(|s| StageId::from(*s)).collect()
    }

    fn diamond() -> PlanGraph {
        PlanGraph::from_stages(vec![
            Stage::new("d").depends_on(["b", "c"]),
            Stage::new("c").depends_on(["a"]),
            Stage::new("b").depends_on(["a"]),
            Stage::new("a"),
        ])
        .unwrap()
    }

    #[test]
    fn test_levels_diamond() {
        let plan = compute_levels(&diamond()).unwrap();
        let levels: Vec<Vec<StageId>> = plan.levels.iter().map(|l| l.stage_ids.clone()).collect();
        assert_eq!(levels, vec![ids(&["a"]), ids(&["b", "c"]), ids(&["d"])]);
        assert_eq!(plan.levels[2].index, 2);
        assert!(plan.blocked.is_empty());
    }

    #[test]
    fn test_levels_skip_verified() {
        let mut graph = diamond();
        graph.transition("a", StageStatus::Running).unwrap();
        graph.transition("a", StageStatus::Verified).unwrap();

        let plan = compute_levels(&graph).unwrap();
        assert_eq!(plan.next_level().unwrap().stage_ids, ids(&["b", "c"]));
        assert_eq!(plan.level_of("d"), Some(1));
        assert_eq!(plan.level_of("a"), None);
    }

    #[test]
    fn test_levels_block_dependents_of_escalated() {
        let mut graph = diamond();
        for (id, to) in [
            ("a", StageStatus::Running),
            ("a", StageStatus::Verified),
            ("b", StageStatus::Running),
            ("b", StageStatus::Escalated),
        ] {
            graph.transition(id, to).unwrap();
        }

        let plan = compute_levels(&graph).unwrap();
        assert_eq!(plan.levels.len(), 1);
        assert_eq!(plan.levels[0].stage_ids, ids(&["c"]));
        assert_eq!(plan.blocked, ids(&["d"]));
    }

    #[test]
    fn test_levels_cycle() {
        let graph = PlanGraph::from_stages(vec![
            Stage::new("root"),
            Stage::new("x").depends_on(["root", "y"]),
            Stage::new("y").depends_on(["x"]),
        ])
        .unwrap();

        let err = compute_levels(&graph).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
    }

    #[test]
    fn test_levels_empty_graph() {
        let graph = PlanGraph::from_stages(Vec::new()).unwrap();
        assert_eq!(compute_levels(&graph).unwrap(), LevelPlan::default());
    }

    #[tokio::test]
    async fn test_run_level_parallel_respects_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let stage_ids = ids(&["a", "b", "c", "d", "e"]);

        let results = run_level_parallel(&stage_ids, 2, |id| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                id
            }
        })
        .await
        .unwrap();

        let mut results = results;
        results.sort();
        assert_eq!(results, stage_ids);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
