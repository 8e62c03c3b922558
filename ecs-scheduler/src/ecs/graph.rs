// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Stage graph construction
//!
//! For every stage the registered systems become the nodes of a directed
//! graph. Edges come from `before`/`after` constraints on systems and from
//! constraints on the sets systems belong to (transitively through nested
//! sets). The graph is then:
//!
//! 1. topologically sorted with Kahn's algorithm, breaking ties by
//!    registration order so identical registrations always give the same
//!    order;
//! 2. partitioned into levels: a system lands on the first level after all
//!    of its predecessors that holds no system it conflicts with;
//! 3. annotated with the worker each system is pinned to.

use crate::config::{ExecutorConfig, DEFAULT_WORKER};
use crate::ecs::scheduler::{OrderTarget, SetConfig, StageSchedule, SystemNode};
use crate::ecs::{Stage, SystemSet};
use crate::error::ScheduleError;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

/// Execution plan of one stage
#[derive(Debug, Clone)]
pub struct StageGraph {
    stage: Stage,
    labels: Vec<String>,
    order: Vec<usize>,
    levels: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    successors: Vec<Vec<usize>>,
    workers: Vec<Option<String>>,
}

impl StageGraph {
    /// Build and validate the graph of one stage
    pub(crate) fn build(
        stage: Stage,
        schedule: &StageSchedule,
        config: &ExecutorConfig,
    ) -> Result<Self, ScheduleError> {
        let nodes = &schedule.systems;
        for node in nodes {
            if let Some(err) = &node.invalid {
                return Err(ScheduleError::Access {
                    stage,
                    system: node.label.clone(),
                    source: err.clone(),
                });
            }
        }

        let set_closure = expand_sets(stage, nodes, &schedule.sets)?;
        let members = set_members(&set_closure);
        let resolver = TargetResolver {
            stage,
            nodes,
            members: &members,
            configured: &schedule.sets,
        };

        let mut edges = BTreeSet::new();
        for (index, node) in nodes.iter().enumerate() {
            let source = format!("system `{}`", node.label);
            for target in &node.before {
                for to in resolver.resolve(&source, target)? {
                    edges.insert((index, to));
                }
            }
            for target in &node.after {
                for from in resolver.resolve(&source, target)? {
                    edges.insert((from, index));
                }
            }
        }
        for (set, config) in &schedule.sets {
            let source = format!("set `{}`", set);
            let empty = Vec::new();
            let set_nodes = members.get(set).unwrap_or(&empty);
            for target in &config.before {
                for to in resolver.resolve(&source, target)? {
                    edges.extend(set_nodes.iter().map(|&from| (from, to)));
                }
            }
            for target in &config.after {
                for from in resolver.resolve(&source, target)? {
                    edges.extend(set_nodes.iter().map(|&to| (from, to)));
                }
            }
        }

        let mut predecessors = vec![Vec::new(); nodes.len()];
        let mut successors = vec![Vec::new(); nodes.len()];
        for &(from, to) in &edges {
            successors[from].push(to);
            predecessors[to].push(from);
        }

        let labels: Vec<String> = nodes.iter().map(|node| node.label.clone()).collect();
        let order = topological_order(&successors, &predecessors).map_err(|cycle| {
            ScheduleError::Cycle {
                stage,
                systems: cycle.into_iter().map(|index| labels[index].clone()).collect(),
            }
        })?;

        let workers = resolve_workers(stage, nodes, &set_closure, &schedule.sets, config)?;
        let levels = assign_levels(nodes, &order, &predecessors);

        Ok(StageGraph {
            stage,
            labels,
            order,
            levels,
            predecessors,
            successors,
            workers,
        })
    }

    /// The stage this graph belongs to
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Number of systems
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the stage has no systems
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// System indices (registration order) in topological order
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Labels in topological order
    pub fn ordered_labels(&self) -> Vec<&str> {
        self.order.iter().map(|&index| self.labels[index].as_str()).collect()
    }

    /// Groups of systems that may run concurrently, in execution order
    ///
    /// Each level lists its systems in topological order.
    pub fn levels(&self) -> &[Vec<usize>] {
        &self.levels
    }

    /// Label of a system
    pub fn label(&self, index: usize) -> &str {
        &self.labels[index]
    }

    /// Direct predecessors of a system
    pub fn predecessors(&self, index: usize) -> &[usize] {
        &self.predecessors[index]
    }

    /// Direct successors of a system
    pub fn successors(&self, index: usize) -> &[usize] {
        &self.successors[index]
    }

    /// Dedicated worker of a system; `None` means the default pool
    pub fn worker(&self, index: usize) -> Option<&str> {
        self.workers[index].as_deref()
    }

    /// Names of every dedicated worker used in this stage
    pub fn used_workers(&self) -> BTreeSet<&str> {
        self.workers.iter().flatten().map(String::as_str).collect()
    }
}

/// For every system, the sets it belongs to directly or through nesting
fn expand_sets(
    stage: Stage,
    nodes: &[SystemNode],
    configured: &BTreeMap<SystemSet, SetConfig>,
) -> Result<Vec<BTreeSet<SystemSet>>, ScheduleError> {
    check_set_nesting(stage, configured)?;

    let mut closure = Vec::with_capacity(nodes.len());
    for node in nodes {
        let mut sets = BTreeSet::new();
        let mut pending: Vec<SystemSet> = node.sets.clone();
        while let Some(set) = pending.pop() {
            if let Some(config) = configured.get(&set) {
                pending.extend(config.parents.iter().filter(|p| !sets.contains(*p)).cloned());
            }
            sets.insert(set);
        }
        closure.push(sets);
    }
    Ok(closure)
}

fn check_set_nesting(
    stage: Stage,
    configured: &BTreeMap<SystemSet, SetConfig>,
) -> Result<(), ScheduleError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        set: &'a SystemSet,
        configured: &'a BTreeMap<SystemSet, SetConfig>,
        marks: &mut BTreeMap<&'a SystemSet, Mark>,
        path: &mut Vec<&'a SystemSet>,
    ) -> Option<Vec<String>> {
        match marks.get(set) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|s| *s == set).unwrap_or(0);
                return Some(path[start..].iter().map(|s| s.to_string()).collect());
            }
            None => {}
        }
        marks.insert(set, Mark::Visiting);
        path.push(set);
        if let Some(config) = configured.get(set) {
            for parent in &config.parents {
                if let Some(cycle) = visit(parent, configured, marks, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        marks.insert(set, Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    for set in configured.keys() {
        let mut path = Vec::new();
        if let Some(sets) = visit(set, configured, &mut marks, &mut path) {
            return Err(ScheduleError::SetCycle { stage, sets });
        }
    }
    Ok(())
}

fn set_members(closure: &[BTreeSet<SystemSet>]) -> BTreeMap<SystemSet, Vec<usize>> {
    let mut members: BTreeMap<SystemSet, Vec<usize>> = BTreeMap::new();
    for (index, sets) in closure.iter().enumerate() {
        for set in sets {
            members.entry(set.clone()).or_default().push(index);
        }
    }
    members
}

struct TargetResolver<'a> {
    stage: Stage,
    nodes: &'a [SystemNode],
    members: &'a BTreeMap<SystemSet, Vec<usize>>,
    configured: &'a BTreeMap<SystemSet, SetConfig>,
}

impl TargetResolver<'_> {
    fn resolve(&self, source: &str, target: &OrderTarget) -> Result<Vec<usize>, ScheduleError> {
        let resolved: Option<Vec<usize>> = match target {
            OrderTarget::System(label) => {
                let matches: Vec<usize> = self
                    .nodes
                    .iter()
                    .enumerate()
                    .filter(|(_, node)| &node.label == label)
                    .map(|(index, _)| index)
                    .collect();
                (!matches.is_empty()).then_some(matches)
            }
            OrderTarget::Set(set) => match self.members.get(set) {
                Some(members) => Some(members.clone()),
                None if self.configured.contains_key(set) => Some(Vec::new()),
                None => None,
            },
        };
        resolved.ok_or_else(|| ScheduleError::UnresolvedTarget {
            stage: self.stage,
            source_label: source.to_string(),
            target: target.to_string(),
        })
    }
}

/// Kahn's algorithm; ready nodes leave in registration order
///
/// On failure returns the systems of one cycle, in edge order.
fn topological_order(
    successors: &[Vec<usize>],
    predecessors: &[Vec<usize>],
) -> Result<Vec<usize>, Vec<usize>> {
    let mut in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &degree)| degree == 0)
        .map(|(index, _)| Reverse(index))
        .collect();

    let mut order = Vec::with_capacity(successors.len());
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &next in &successors[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() == successors.len() {
        return Ok(order);
    }
    Err(extract_cycle(&in_degree, predecessors))
}

// Every node left with a positive in-degree has a predecessor that is also
// left, so walking predecessors must revisit a node.
fn extract_cycle(in_degree: &[usize], predecessors: &[Vec<usize>]) -> Vec<usize> {
    let remaining = |index: usize| in_degree[index] > 0;
    let Some(start) = (0..in_degree.len()).find(|&index| remaining(index)) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(&previous) = predecessors[current].iter().find(|&&p| remaining(p)) else {
            return path;
        };
        if let Some(position) = path.iter().position(|&node| node == previous) {
            let mut cycle = path.split_off(position);
            cycle.reverse();
            return cycle;
        }
        path.push(previous);
        current = previous;
    }
}

fn resolve_workers(
    stage: Stage,
    nodes: &[SystemNode],
    closure: &[BTreeSet<SystemSet>],
    configured: &BTreeMap<SystemSet, SetConfig>,
    config: &ExecutorConfig,
) -> Result<Vec<Option<String>>, ScheduleError> {
    let mut workers = Vec::with_capacity(nodes.len());
    for (node, sets) in nodes.iter().zip(closure) {
        let inherited = sets
            .iter()
            .filter_map(|set| configured.get(set).and_then(|c| c.worker.as_ref()));
        let mut chosen: Option<&String> = None;
        for worker in node.worker.iter().chain(inherited) {
            match chosen {
                Some(first) if first != worker => {
                    return Err(ScheduleError::ConflictingWorker {
                        stage,
                        system: node.label.clone(),
                        first: first.clone(),
                        second: worker.clone(),
                    });
                }
                _ => chosen = Some(worker),
            }
        }

        match chosen {
            Some(worker) if !config.has_worker(worker) => {
                return Err(ScheduleError::UnknownWorker {
                    stage,
                    system: node.label.clone(),
                    worker: worker.clone(),
                });
            }
            Some(worker) if worker != DEFAULT_WORKER => workers.push(Some(worker.clone())),
            _ => workers.push(None),
        }
    }
    Ok(workers)
}

fn assign_levels(nodes: &[SystemNode], order: &[usize], predecessors: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut level_of = vec![0usize; nodes.len()];
    let mut levels: Vec<Vec<usize>> = Vec::new();

    for &node in order {
        let mut level = predecessors[node]
            .iter()
            .map(|&p| level_of[p] + 1)
            .max()
            .unwrap_or(0);

        let access = nodes[node].system.access();
        while levels.get(level).is_some_and(|members| {
            members
                .iter()
                .any(|&other| access.conflicts_with(nodes[other].system.access()))
        }) {
            level += 1;
        }

        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].push(node);
        level_of[node] = level;
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{Component, Get, Query, Res, ResMut, Schedule};

    struct Score(u32);
    struct Position;
    impl Component for Position {}

    fn a() {}
    fn b() {}
    fn c() {}
    fn d() {}
    fn write_score(_score: ResMut<Score>) {}
    fn read_score(_score: Res<Score>) {}
    fn read_positions(_query: Query<Get<(&Position,)>>) {}

    fn build(schedule: Schedule, stage: Stage) -> Result<StageGraph, ScheduleError> {
        build_with(schedule, stage, &ExecutorConfig::default())
    }

    fn build_with(
        schedule: Schedule,
        stage: Stage,
        config: &ExecutorConfig,
    ) -> Result<StageGraph, ScheduleError> {
        let stages = schedule.into_stages();
        StageGraph::build(stage, &stages[&stage], config)
    }

    #[test]
    fn test_unconstrained_follows_registration_order() {
        let mut schedule = Schedule::new();
        schedule.add_system(Stage::Update, c);
        schedule.add_system(Stage::Update, a);
        schedule.add_system(Stage::Update, b);

        let graph = build(schedule, Stage::Update).unwrap();
        assert_eq!(graph.ordered_labels(), vec!["c", "a", "b"]);
        assert_eq!(graph.levels().len(), 1);
    }

    #[test]
    fn test_before_and_after_edges() {
        let mut schedule = Schedule::new();
        schedule.add_system(Stage::Update, a).after("c");
        schedule.add_system(Stage::Update, b).before("a");
        schedule.add_system(Stage::Update, c);

        let graph = build(schedule, Stage::Update).unwrap();
        assert_eq!(graph.ordered_labels(), vec!["b", "c", "a"]);
        assert_eq!(graph.levels(), &[vec![1, 2], vec![0]]);
        assert_eq!(graph.predecessors(0), &[1, 2]);
    }

    #[test]
    fn test_set_constraints_expand_to_members() {
        let mut schedule = Schedule::new();
        let physics = SystemSet::new("physics");
        schedule.add_system(Stage::Update, a).after(physics.clone());
        schedule.add_system(Stage::Update, b).in_set(physics.clone());
        schedule.add_system(Stage::Update, c).in_set(physics.clone());

        let graph = build(schedule, Stage::Update).unwrap();
        assert_eq!(graph.ordered_labels(), vec!["b", "c", "a"]);
        assert_eq!(graph.predecessors(0), &[1, 2]);
    }

    #[test]
    fn test_nested_and_chained_sets() {
        let mut schedule = Schedule::new();
        let input = SystemSet::new("input");
        let sim = SystemSet::new("sim");
        let inner = SystemSet::new("inner");
        schedule.configure_sets(Stage::Update, [input.clone(), sim.clone()]).chain();
        schedule.configure_set(Stage::Update, inner.clone()).in_set(sim.clone());
        schedule.add_system(Stage::Update, a).in_set(inner);
        schedule.add_system(Stage::Update, b).in_set(input);

        let graph = build(schedule, Stage::Update).unwrap();
        assert_eq!(graph.ordered_labels(), vec!["b", "a"]);
    }

    #[test]
    fn test_cycle_names_both_systems() {
        let mut schedule = Schedule::new();
        schedule.add_system(Stage::Update, a).before("b");
        schedule.add_system(Stage::Update, b).before("a");
        schedule.add_system(Stage::Update, c);

        match build(schedule, Stage::Update) {
            Err(ScheduleError::Cycle { stage, systems }) => {
                assert_eq!(stage, Stage::Update);
                assert_eq!(systems.len(), 2);
                assert!(systems.contains(&"a".to_string()));
                assert!(systems.contains(&"b".to_string()));
            }
            other => panic!("expected cycle, got {:?}", other.map(|g| g.ordered_labels().len())),
        }
    }

    #[test]
    fn test_cycle_through_set() {
        let mut schedule = Schedule::new();
        let set = SystemSet::new("late");
        schedule.configure_set(Stage::Update, set.clone()).after("a");
        schedule.add_system(Stage::Update, a).after(set.clone());
        schedule.add_system(Stage::Update, b).in_set(set);

        assert!(matches!(
            build(schedule, Stage::Update),
            Err(ScheduleError::Cycle { .. })
        ));
    }

    #[test]
    fn test_unresolved_target() {
        let mut schedule = Schedule::new();
        schedule.add_system(Stage::Update, a).after("missing");
        assert!(matches!(
            build(schedule, Stage::Update),
            Err(ScheduleError::UnresolvedTarget { .. })
        ));

        let mut schedule = Schedule::new();
        schedule.add_system(Stage::Update, a).after(SystemSet::new("nowhere"));
        assert!(matches!(
            build(schedule, Stage::Update),
            Err(ScheduleError::UnresolvedTarget { .. })
        ));
    }

    #[test]
    fn test_configured_empty_set_resolves() {
        let mut schedule = Schedule::new();
        let empty = SystemSet::new("empty");
        schedule.configure_set(Stage::Update, empty.clone());
        schedule.add_system(Stage::Update, a).after(empty);
        assert!(build(schedule, Stage::Update).is_ok());
    }

    #[test]
    fn test_set_nesting_cycle() {
        let mut schedule = Schedule::new();
        let outer = SystemSet::new("outer");
        let inner = SystemSet::new("inner");
        schedule.configure_set(Stage::Update, outer.clone()).in_set(inner.clone());
        schedule.configure_set(Stage::Update, inner.clone()).in_set(outer.clone());
        schedule.add_system(Stage::Update, a).in_set(inner);

        assert!(matches!(
            build(schedule, Stage::Update),
            Err(ScheduleError::SetCycle { .. })
        ));
    }

    #[test]
    fn test_conflicting_systems_split_levels() {
        let mut schedule = Schedule::new();
        schedule.add_system(Stage::Update, write_score);
        schedule.add_system(Stage::Update, read_score);
        schedule.add_system(Stage::Update, read_positions);

        let graph = build(schedule, Stage::Update).unwrap();
        assert_eq!(graph.levels(), &[vec![0, 2], vec![1]]);
    }

    #[test]
    fn test_shared_label_orders_all_carriers() {
        let mut schedule = Schedule::new();
        schedule.add_system(Stage::Update, a).label("io");
        schedule.add_system(Stage::Update, b).label("io");
        schedule.add_system(Stage::Update, c).before("io");

        let graph = build(schedule, Stage::Update).unwrap();
        assert_eq!(graph.order(), &[2, 0, 1]);
    }

    #[test]
    fn test_worker_resolution() {
        let mut schedule = Schedule::new();
        let gpu = SystemSet::new("gpu");
        schedule.configure_set(Stage::Render, gpu.clone()).use_worker("single");
        schedule.add_system(Stage::Render, a).in_set(gpu.clone());
        schedule.add_system(Stage::Render, b).use_worker("default");
        schedule.add_system(Stage::Render, c);

        let graph = build(schedule, Stage::Render).unwrap();
        assert_eq!(graph.worker(0), Some("single"));
        assert_eq!(graph.worker(1), None);
        assert_eq!(graph.worker(2), None);
        assert_eq!(graph.used_workers().into_iter().collect::<Vec<_>>(), vec!["single"]);
    }

    #[test]
    fn test_conflicting_and_unknown_workers() {
        let mut schedule = Schedule::new();
        let gpu = SystemSet::new("gpu");
        schedule.configure_set(Stage::Render, gpu.clone()).use_worker("single");
        schedule.add_system(Stage::Render, a).in_set(gpu).use_worker("io");
        let config = ExecutorConfig::default().with_worker("io", 2);
        assert!(matches!(
            build_with(schedule, Stage::Render, &config),
            Err(ScheduleError::ConflictingWorker { .. })
        ));

        let mut schedule = Schedule::new();
        schedule.add_system(Stage::Render, d).use_worker("gpu-thread");
        assert!(matches!(
            build(schedule, Stage::Render),
            Err(ScheduleError::UnknownWorker { .. })
        ));
    }

    #[test]
    fn test_access_error_reported_at_build() {
        fn aliasing(_a: Res<Score>, _b: ResMut<Score>) {}

        let mut schedule = Schedule::new();
        schedule.add_system(Stage::Update, aliasing);
        assert!(matches!(
            build(schedule, Stage::Update),
            Err(ScheduleError::Access { .. })
        ));
    }

    #[test]
    fn test_build_is_deterministic() {
        let make = || {
            let mut schedule = Schedule::new();
            schedule.add_system(Stage::Update, d);
            schedule.add_system(Stage::Update, a).after("d");
            schedule.add_system(Stage::Update, c);
            schedule.add_system(Stage::Update, b).before("c");
            schedule.add_system(Stage::Update, write_score);
            schedule.add_system(Stage::Update, read_score);
            build(schedule, Stage::Update).unwrap()
        };
        let first = make();
        for _ in 0..10 {
            let again = make();
            assert_eq!(again.order(), first.order());
            assert_eq!(again.levels(), first.levels());
        }
    }
}
