use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::GraphError;
use crate::stage::{Stage, StageId, StageStatus, StageTransition};

/// Stage dependency graph (DAG) and the single owner of stage status.
#[derive(Debug, Clone)]
pub struct PlanGraph {
    /// Stage nodes: stage_id -> Stage
    nodes: HashMap<StageId, Stage>,

    /// Dependency edges: stage_id -> list of dependencies
    edges: HashMap<StageId, Vec<StageId>>,

    /// Reverse edges: stage_id -> list of stages that depend on it
    reverse_edges: HashMap<StageId, Vec<StageId>>,

    /// Original insertion order (for stable iteration)
    insertion_order: Vec<StageId>,
}

/// Number of stages per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub verified: usize,
    pub failed: usize,
    pub escalated: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.verified + self.failed + self.escalated
    }
}

impl PlanGraph {
    /// Construct the graph from a stage list.
    pub fn from_stages(stages: Vec<Stage>) -> Result<Self, GraphError> {
        let mut nodes = HashMap::with_capacity(stages.len());
        let mut edges = HashMap::with_capacity(stages.len());
        let mut reverse_edges: HashMap<StageId, Vec<StageId>> = HashMap::new();
        let mut insertion_order = Vec::with_capacity(stages.len());

        for stage in stages {
            if !stage.id.is_path_safe() {
                return Err(GraphError::InvalidStageId(stage.id));
            }
            if nodes.contains_key(&stage.id) {
                return Err(GraphError::DuplicateStage(stage.id));
            }

            let stage_id = stage.id.clone();
            for dep in &stage.dependencies {
                reverse_edges
                    .entry(dep.clone())
                    .or_default()
                    .push(stage_id.clone());
            }
            edges.insert(stage_id.clone(), stage.dependencies.clone());
            insertion_order.push(stage_id.clone());
            nodes.insert(stage_id, stage);
        }

        Ok(Self {
            nodes,
            edges,
            reverse_edges,
            insertion_order,
        })
    }

    /// Validate dependency relationships.
    pub fn validate(&self) -> Result<(), GraphError> {
        for stage_id in &self.insertion_order {
            for dep in self.dependencies_of(stage_id.as_str()) {
                if dep == stage_id {
                    return Err(GraphError::SelfDependency(stage_id.clone()));
                }
                if !self.nodes.contains_key(dep) {
                    return Err(GraphError::DependencyNotFound {
                        stage: stage_id.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        if let Some(cycle) = self.detect_cycle() {
            return Err(GraphError::cycle(cycle));
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.nodes.get(id)
    }

    /// Stages in insertion order.
    pub fn stages(&self) -> impl Iterator<Item = &Stage> + '_ {
        self.insertion_order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn status(&self, id: &str) -> Option<StageStatus> {
        self.nodes.get(id).map(|s| s.status)
    }

    pub fn dependencies_of(&self, id: &str) -> &[StageId] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct dependents, in insertion order of the dependents.
    pub fn dependents_of(&self, id: &str) -> &[StageId] {
        self.reverse_edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every stage that can only run after `id`, sorted by id.
    pub fn transitive_dependents_of(&self, id: &str) -> Vec<StageId> {
        let mut seen: HashSet<&StageId> = HashSet::new();
        let mut queue: VecDeque<&StageId> = self.dependents_of(id).iter().collect();

        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.dependents_of(next.as_str()));
            }
        }

        let mut out: Vec<StageId> = seen.into_iter().cloned().collect();
        out.sort();
        out
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for stage in self.nodes.values() {
            match stage.status {
                StageStatus::Pending => counts.pending += 1,
                StageStatus::Running => counts.running += 1,
                StageStatus::Verified => counts.verified += 1,
                StageStatus::Failed => counts.failed += 1,
                StageStatus::Escalated => counts.escalated += 1,
            }
        }
        counts
    }

    /// Ids with the given status, sorted.
    pub fn ids_with_status(&self, status: StageStatus) -> Vec<StageId> {
        let mut ids: Vec<StageId> = self
            .nodes
            .values()
            .filter(|s| s.status == status)
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// The only way to change a stage's status.
    ///
    /// `Running -> Pending` starts a new attempt and bumps `attempts`.
    pub fn transition(&mut self, id: &str, to: StageStatus) -> Result<(), GraphError> {
        let stage = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownStage(StageId::from(id)))?;

        let from = stage.status;
        StageTransition::validate(from, to).map_err(|source| GraphError::Transition {
            stage: stage.id.clone(),
            source,
        })?;

        if StageTransition::is_retry(from, to) {
            stage.attempts += 1;
        }
        stage.status = to;
        Ok(())
    }

    /// Detect circular dependencies using DFS.
    ///
    /// Returns the cycle path with the first node repeated at the end.
    pub(crate) fn detect_cycle(&self) -> Option<Vec<StageId>> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for stage_id in &self.insertion_order {
            if !visited.contains(stage_id) && self.dfs_cycle(stage_id, &mut visited, &mut stack) {
                return Some(stack);
            }
        }

        None
    }

    fn dfs_cycle(
        &self,
        node: &StageId,
        visited: &mut HashSet<StageId>,
        stack: &mut Vec<StageId>,
    ) -> bool {
        visited.insert(node.clone());
        stack.push(node.clone());

        for dep in self.dependencies_of(node.as_str()) {
            // Dependency already on the current path
            if let Some(pos) = stack.iter().position(|x| x == dep) {
                stack.push(dep.clone());
                *stack = stack[pos..].to_vec();
                return true;
            }

            if self.nodes.contains_key(dep)
                && !visited.contains(dep)
                && self.dfs_cycle(dep, visited, stack)
            {
                return true;
            }
        }

        stack.pop();
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::TransitionError;

    fn diamond() -> PlanGraph {
        PlanGraph::from_stages(vec![
            Stage::new("a"),
            Stage::new("b").depends_on(["a"]),
            Stage::new("c").depends_on(["a"]),
            Stage::new("d").depends_on(["b", "c"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_duplicate_stage() {
        let err = PlanGraph::from_stages(vec![Stage::new("a"), Stage::new("a")]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateStage(StageId::from("a")));
    }

    #[test]
    fn test_path_unsafe_id() {
        let err = PlanGraph::from_stages(vec![Stage::new("../a")]).unwrap_err();
        assert!(matches!(err, GraphError::InvalidStageId(_)));
    }

    #[test]
    fn test_missing_dependency() {
        let graph = PlanGraph::from_stages(vec![Stage::new("a").depends_on(["ghost"])]).unwrap();
        assert_eq!(
            graph.validate(),
            Err(GraphError::DependencyNotFound {
                stage: "a".into(),
                missing: "ghost".into(),
            })
        );
    }

    #[test]
    fn test_self_dependency() {
        let graph = PlanGraph::from_stages(vec![Stage::new("a").depends_on(["a"])]).unwrap();
        assert_eq!(graph.validate(), Err(GraphError::SelfDependency("a".into())));
    }

    #[test]
    fn test_cycle_path() {
        let graph = PlanGraph::from_stages(vec![
            Stage::new("a").depends_on(["c"]),
            Stage::new("b").depends_on(["a"]),
            Stage::new("c").depends_on(["b"]),
        ])
        .unwrap();

        match graph.validate() {
            Err(GraphError::Cycle { path, stages }) => {
                assert_eq!(path, "a -> c -> b -> a");
                assert_eq!(stages.first(), stages.last());
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_dependents() {
        let graph = diamond();
        assert!(graph.validate().is_ok());
        assert_eq!(graph.dependents_of("a"), &[StageId::from("b"), StageId::from("c")]);
        assert_eq!(
            graph.transitive_dependents_of("a"),
            vec![StageId::from("b"), StageId::from("c"), StageId::from("d")]
        );
        assert!(graph.transitive_dependents_of("d").is_empty());
    }

    #[test]
    fn test_transition_counts_retries() {
        let mut graph = diamond();
        graph.transition("a", StageStatus::Running).unwrap();
        graph.transition("a", StageStatus::Pending).unwrap();
        graph.transition("a", StageStatus::Running).unwrap();
        graph.transition("a", StageStatus::Verified).unwrap();

        assert_eq!(graph.stage("a").unwrap().attempts, 1);
        assert_eq!(graph.status("a"), Some(StageStatus::Verified));
        assert_eq!(graph.counts().verified, 1);
        assert_eq!(graph.counts().total(), 4);
    }

    #[test]
    fn test_transition_rejects_invalid() {
        let mut graph = diamond();
        let err = graph.transition("a", StageStatus::Verified).unwrap_err();
        assert_eq!(
            err,
            GraphError::Transition {
                stage: "a".into(),
                source: TransitionError::InvalidTransition {
                    from: StageStatus::Pending,
                    to: StageStatus::Verified,
                },
            }
        );
        assert_eq!(
            graph.transition("zzz", StageStatus::Running),
            Err(GraphError::UnknownStage("zzz".into()))
        );
    }
}
