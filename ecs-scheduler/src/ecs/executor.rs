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
//! Schedule execution
//!
//! The executor walks the stages of a tick in their fixed order. Each stage
//! runs level by level: every system of a level may run concurrently, and
//! a level only starts once the previous one has completed. Systems pinned
//! to a named worker run on that worker's own thread pool: concurrently
//! when the pool has several threads, one after another in topological
//! order when it has a single thread.
//!
//! After the last level of a stage, the commands the stage produced are
//! applied to the world. Systems of the next stage see those changes;
//! systems of the same stage never do.
//!
//! With the `parallel` feature disabled, every system runs on the calling
//! thread in topological order.

use crate::config::{ExecutorConfig, FailurePolicy};
use crate::ecs::graph::StageGraph;
use crate::ecs::{CommandQueue, Schedule, Stage, StageClass, System, World};
use crate::error::{FailureCause, RunError, ScheduleError, SystemFailure, TickFailure};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, debug_span, error, info, trace, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;
#[cfg(feature = "parallel")]
use rayon::ThreadPool;

/// What the executor is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorPhase {
    /// Between stages
    Idle,
    /// Running the systems of a stage
    StageRunning(Stage),
    /// Applying the commands of a stage
    Flushing(Stage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pending,
    Done,
    Failed,
    Skipped,
}

struct StagePlan {
    graph: StageGraph,
    systems: Vec<Box<dyn System>>,
}

struct WorkerPools {
    #[cfg(feature = "parallel")]
    default: ThreadPool,
    #[cfg(feature = "parallel")]
    named: BTreeMap<String, ThreadPool>,
}

impl WorkerPools {
    #[cfg(feature = "parallel")]
    fn new(config: &ExecutorConfig, used: &[String]) -> Result<Self, ScheduleError> {
        let default = build_pool("default", config.threads.unwrap_or(0))?;
        let mut named = BTreeMap::new();
        for worker in used {
            let threads = config.workers.get(worker).copied().unwrap_or(1);
            named.insert(worker.clone(), build_pool(worker, threads)?);
        }
        Ok(WorkerPools { default, named })
    }

    #[cfg(not(feature = "parallel"))]
    fn new(_config: &ExecutorConfig, _used: &[String]) -> Result<Self, ScheduleError> {
        Ok(WorkerPools {})
    }

    fn default_threads(&self) -> usize {
        #[cfg(feature = "parallel")]
        {
            self.default.current_num_threads()
        }
        #[cfg(not(feature = "parallel"))]
        {
            1
        }
    }
}

#[cfg(feature = "parallel")]
fn build_pool(name: &str, threads: usize) -> Result<ThreadPool, ScheduleError> {
    let prefix = format!("ecs-{}", name);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |index| format!("{}-{}", prefix, index))
        .build()
        .map_err(|err| ScheduleError::WorkerPool {
            worker: name.to_string(),
            reason: err.to_string(),
        })
}

/// Runs a validated schedule against a world
///
/// # Examples
///
/// ```
/// use ecs_scheduler::config::ExecutorConfig;
/// use ecs_scheduler::ecs::{Executor, ResMut, Schedule, Stage, World};
///
/// struct Frames(u64);
///
/// fn count(mut frames: ResMut<Frames>) {
///     frames.0 += 1;
/// }
///
/// let mut schedule = Schedule::new();
/// schedule.add_system(Stage::Update, count);
///
/// let mut world = World::new();
/// world.insert_resource(Frames(0));
///
/// let mut executor = Executor::new(schedule, ExecutorConfig::default()).unwrap();
/// executor.tick(&mut world).unwrap();
/// executor.tick(&mut world).unwrap();
/// assert_eq!(world.resource::<Frames>().unwrap().0, 2);
/// ```
pub struct Executor {
    stages: BTreeMap<Stage, StagePlan>,
    pools: WorkerPools,
    config: ExecutorConfig,
    phase: ExecutorPhase,
    started: bool,
    startup_failed: Option<Stage>,
    shut_down: bool,
    ticks: u64,
}

impl Executor {
    /// Validate a schedule and prepare its worker pools
    ///
    /// Every configuration problem (ordering cycles, unknown targets,
    /// worker conflicts, invalid access) is reported here, before any
    /// system runs.
    pub fn new(schedule: Schedule, config: ExecutorConfig) -> Result<Self, ScheduleError> {
        let mut stages = BTreeMap::new();
        let mut used_workers: Vec<String> = Vec::new();
        let mut system_count = 0;

        for (stage, stage_schedule) in schedule.into_stages() {
            let graph = match StageGraph::build(stage, &stage_schedule, &config) {
                Ok(graph) => graph,
                Err(err) => {
                    error!(%stage, %err, "invalid schedule");
                    return Err(err);
                }
            };
            for worker in graph.used_workers() {
                if !used_workers.iter().any(|w| w == worker) {
                    used_workers.push(worker.to_string());
                }
            }
            system_count += graph.len();
            let systems = stage_schedule
                .systems
                .into_iter()
                .map(|node| node.system)
                .collect();
            stages.insert(stage, StagePlan { graph, systems });
        }

        let pools = WorkerPools::new(&config, &used_workers)?;
        info!(
            stages = stages.len(),
            systems = system_count,
            threads = pools.default_threads(),
            workers = ?used_workers,
            policy = %config.failure_policy,
            "executor ready"
        );

        Ok(Executor {
            stages,
            pools,
            config,
            phase: ExecutorPhase::Idle,
            started: false,
            startup_failed: None,
            shut_down: false,
            ticks: 0,
        })
    }

    /// Run one tick
    ///
    /// The first call also runs the startup stages. Every system failure of
    /// the tick is returned together; what ran despite the failures depends
    /// on the configured [`FailurePolicy`].
    ///
    /// If a startup stage aborts, that tick runs no tick stages and every
    /// later tick fails with [`RunError::StartupFailed`]. Shutdown still
    /// runs the exit stages.
    pub fn tick(&mut self, world: &mut World) -> Result<(), RunError> {
        if self.shut_down {
            return Err(RunError::ShutDown);
        }

        if let Some(stage) = self.startup_failed {
            return Err(RunError::StartupFailed { stage });
        }

        let mut report = TickFailure::default();
        if !self.started {
            info!("running startup stages");
            self.run_class(StageClass::Startup, world, &mut report);
            if let Some(stage) = report.aborted_at {
                error!(%stage, "startup aborted, tick stages disabled");
                self.startup_failed = Some(stage);
                return into_result(report);
            }
            self.started = true;
        }
        if report.aborted_at.is_none() {
            self.run_class(StageClass::Tick, world, &mut report);
        }
        self.ticks += 1;
        into_result(report)
    }

    /// Run the exit stages once
    ///
    /// Later calls do nothing; later ticks fail with [`RunError::ShutDown`].
    pub fn shutdown(&mut self, world: &mut World) -> Result<(), RunError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        info!(ticks = self.ticks, "running exit stages");

        let mut report = TickFailure::default();
        self.run_class(StageClass::Exit, world, &mut report);
        into_result(report)
    }

    /// Current phase
    pub fn phase(&self) -> ExecutorPhase {
        self.phase
    }

    /// Execution plan of a stage, if any system or set was registered in it
    pub fn graph(&self, stage: Stage) -> Option<&StageGraph> {
        self.stages.get(&stage).map(|plan| &plan.graph)
    }

    /// Number of completed ticks
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Whether the startup stages have completed without aborting
    pub fn has_started(&self) -> bool {
        self.started
    }

    /// Whether the exit stages have run
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Configuration the executor was built with
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn run_class(&mut self, class: StageClass, world: &mut World, report: &mut TickFailure) {
        for stage in Stage::of_class(class) {
            if report.aborted_at.is_some() {
                break;
            }
            self.run_stage(stage, world, report);
        }
    }

    fn run_stage(&mut self, stage: Stage, world: &mut World, report: &mut TickFailure) {
        let Some(StagePlan { graph, systems }) = self.stages.get_mut(&stage) else {
            return;
        };
        let graph = &*graph;
        let policy = self.config.failure_policy;
        let _span = debug_span!("stage", %stage).entered();

        self.phase = ExecutorPhase::StageRunning(stage);
        trace!(phase = ?self.phase, "phase transition");

        let mut status = vec![Status::Pending; systems.len()];
        let mut aborted = false;
        for level in graph.levels() {
            let mut runnable = Vec::with_capacity(level.len());
            for &index in level {
                let blocked = policy == FailurePolicy::SkipDependents
                    && graph
                        .predecessors(index)
                        .iter()
                        .any(|&p| matches!(status[p], Status::Failed | Status::Skipped));
                if blocked {
                    trace!(system = graph.label(index), "skipped after failed predecessor");
                    status[index] = Status::Skipped;
                    report.skipped.push(graph.label(index).to_string());
                } else {
                    runnable.push(index);
                }
            }

            let mut results = run_level(&self.pools, graph, systems, &runnable, world);
            results.sort_by_key(|(index, _)| level.iter().position(|i| i == index));
            for (index, result) in results {
                match result {
                    Ok(()) => status[index] = Status::Done,
                    Err(cause) => {
                        let system = graph.label(index).to_string();
                        warn!(%stage, system = %system, %cause, "system failed");
                        status[index] = Status::Failed;
                        report.failures.push(SystemFailure { system, stage, cause });
                    }
                }
            }

            if policy == FailurePolicy::Abort && status.contains(&Status::Failed) {
                aborted = true;
                break;
            }
        }

        self.phase = ExecutorPhase::Flushing(stage);
        trace!(phase = ?self.phase, "phase transition");

        let mut queue = CommandQueue::new();
        for &index in graph.order() {
            match status[index] {
                Status::Done => systems[index].take_deferred(&mut queue),
                Status::Failed => {
                    let mut rejected = CommandQueue::new();
                    systems[index].take_deferred(&mut rejected);
                    let released = rejected.discard(&mut world.entity_allocator().lock());
                    if released > 0 {
                        debug!(system = graph.label(index), released, "discarded commands of failed system");
                    }
                }
                Status::Pending | Status::Skipped => {}
            }
        }
        let stats = world.flush(queue);
        debug!(
            spawned = stats.spawned,
            inserted = stats.inserted,
            despawned = stats.despawned,
            resources = stats.resources,
            "stage flushed"
        );

        if aborted {
            report.aborted_at = Some(stage);
        }
        self.phase = ExecutorPhase::Idle;
        trace!(phase = ?self.phase, "phase transition");
    }
}

fn into_result(report: TickFailure) -> Result<(), RunError> {
    if report.failures.is_empty() {
        Ok(())
    } else {
        Err(RunError::Systems(report))
    }
}

type LevelResults = Vec<(usize, Result<(), FailureCause>)>;

/// Run the given systems of one level; `runnable` is in topological order
#[cfg(feature = "parallel")]
fn run_level(
    pools: &WorkerPools,
    graph: &StageGraph,
    systems: &mut [Box<dyn System>],
    runnable: &[usize],
    world: &World,
) -> LevelResults {
    let mut selected: Vec<(usize, &mut Box<dyn System>)> = systems
        .iter_mut()
        .enumerate()
        .filter(|(index, _)| runnable.contains(index))
        .collect();
    selected.sort_by_key(|(index, _)| runnable.iter().position(|i| i == index));

    let mut shared = Vec::new();
    let mut pinned: BTreeMap<&str, Vec<(usize, &mut Box<dyn System>)>> = BTreeMap::new();
    for (index, system) in selected {
        match graph.worker(index) {
            Some(worker) => pinned.entry(worker).or_default().push((index, system)),
            None => shared.push((index, system)),
        }
    }

    let results = parking_lot::Mutex::new(Vec::with_capacity(runnable.len()));
    pools.default.install(|| {
        rayon::scope(|scope| {
            for (worker, group) in pinned {
                let results = &results;
                let pool = pools.named.get(worker);
                scope.spawn(move |_| {
                    let dispatch = |(index, system): (usize, &mut Box<dyn System>)| {
                        trace!(system = system.name(), worker, "dispatch");
                        let result = run_system(system.as_mut(), world);
                        results.lock().push((index, result));
                    };
                    match pool {
                        Some(pool) if pool.current_num_threads() > 1 => {
                            pool.install(|| group.into_par_iter().for_each(dispatch))
                        }
                        Some(pool) => pool.install(|| group.into_iter().for_each(dispatch)),
                        None => group.into_iter().for_each(dispatch),
                    }
                });
            }

            shared.into_par_iter().for_each(|(index, system)| {
                trace!(system = system.name(), "dispatch");
                let result = run_system(system.as_mut(), world);
                results.lock().push((index, result));
            });
        });
    });
    results.into_inner()
}

/// Run the given systems of one level; `runnable` is in topological order
#[cfg(not(feature = "parallel"))]
fn run_level(
    _pools: &WorkerPools,
    _graph: &StageGraph,
    systems: &mut [Box<dyn System>],
    runnable: &[usize],
    world: &World,
) -> LevelResults {
    runnable
        .iter()
        .map(|&index| {
            let system = systems[index].as_mut();
            trace!(system = system.name(), "dispatch");
            (index, run_system(system, world))
        })
        .collect()
}

fn run_system(system: &mut dyn System, world: &World) -> Result<(), FailureCause> {
    match catch_unwind(AssertUnwindSafe(|| system.run(world))) {
        Ok(result) => result,
        Err(payload) => Err(FailureCause::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
