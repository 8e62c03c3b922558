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
//! Stages and system registration
//!
//! Systems are registered into one of the fixed lifecycle [`Stage`]s.
//! Stages execute sequentially in a fixed global order, while systems
//! within a stage can run in parallel if they don't conflict and no
//! ordering constraint separates them.
//!
//! # Examples
//!
//! ```
//! use ecs_scheduler::ecs::{Res, ResMut, Schedule, Stage, SystemSet};
//!
//! struct Score(u32);
//!
//! fn award(mut score: ResMut<Score>) {
//!     score.0 += 10;
//! }
//!
//! fn report(score: Res<Score>) {
//!     let _ = score.0;
//! }
//!
//! let mut schedule = Schedule::new();
//! schedule.add_system(Stage::Update, award).in_set(SystemSet::new("gameplay"));
//! schedule.add_system(Stage::Update, report).after(SystemSet::new("gameplay"));
//! assert_eq!(schedule.system_count(), 2);
//! ```

use crate::ecs::{IntoSystem, System};
use crate::error::AccessError;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, error};

/// Lifecycle stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Runs once, before [`Stage::Startup`]
    PreStartup,
    /// Runs once, before the first tick
    Startup,
    /// First stage of every tick
    Prepare,
    /// Before the main update
    PreUpdate,
    /// Main simulation update
    Update,
    /// After the main update
    PostUpdate,
    /// Before rendering
    PreRender,
    /// Rendering
    Render,
    /// After rendering
    PostRender,
    /// Runs once at shutdown
    Exit,
    /// Runs once at shutdown, after [`Stage::Exit`]
    PostExit,
}

/// When a stage runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageClass {
    /// Once, before the first tick
    Startup,
    /// Every tick
    Tick,
    /// Once, at shutdown
    Exit,
}

impl Stage {
    /// Every stage in execution order
    pub const ALL: [Stage; 11] = [
        Stage::PreStartup,
        Stage::Startup,
        Stage::Prepare,
        Stage::PreUpdate,
        Stage::Update,
        Stage::PostUpdate,
        Stage::PreRender,
        Stage::Render,
        Stage::PostRender,
        Stage::Exit,
        Stage::PostExit,
    ];

    /// When this stage runs
    pub fn class(self) -> StageClass {
        match self {
            Stage::PreStartup | Stage::Startup => StageClass::Startup,
            Stage::Exit | Stage::PostExit => StageClass::Exit,
            _ => StageClass::Tick,
        }
    }

    /// Stages of one class, in execution order
    pub fn of_class(class: StageClass) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().filter(move |stage| stage.class() == class)
    }

    /// Stage name
    pub fn name(self) -> &'static str {
        match self {
            Stage::PreStartup => "PreStartup",
            Stage::Startup => "Startup",
            Stage::Prepare => "Prepare",
            Stage::PreUpdate => "PreUpdate",
            Stage::Update => "Update",
            Stage::PostUpdate => "PostUpdate",
            Stage::PreRender => "PreRender",
            Stage::Render => "Render",
            Stage::PostRender => "PostRender",
            Stage::Exit => "Exit",
            Stage::PostExit => "PostExit",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named group of systems within a stage
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemSet(Cow<'static, str>);

impl SystemSet {
    /// Create a set handle
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        SystemSet(name.into())
    }

    /// Set name
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SystemSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Something a system or set can be ordered against
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OrderTarget {
    /// Every system carrying this label
    System(String),
    /// Every member of this set
    Set(SystemSet),
}

impl fmt::Display for OrderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderTarget::System(label) => write!(f, "system `{}`", label),
            OrderTarget::Set(set) => write!(f, "set `{}`", set),
        }
    }
}

impl From<&str> for OrderTarget {
    fn from(label: &str) -> Self {
        OrderTarget::System(label.to_string())
    }
}

impl From<String> for OrderTarget {
    fn from(label: String) -> Self {
        OrderTarget::System(label)
    }
}

impl From<SystemSet> for OrderTarget {
    fn from(set: SystemSet) -> Self {
        OrderTarget::Set(set)
    }
}

impl From<&SystemSet> for OrderTarget {
    fn from(set: &SystemSet) -> Self {
        OrderTarget::Set(set.clone())
    }
}

/// A registered system with its ordering metadata
pub(crate) struct SystemNode {
    pub(crate) system: Box<dyn System>,
    pub(crate) label: String,
    pub(crate) before: Vec<OrderTarget>,
    pub(crate) after: Vec<OrderTarget>,
    pub(crate) sets: Vec<SystemSet>,
    pub(crate) worker: Option<String>,
    pub(crate) invalid: Option<AccessError>,
}

/// Ordering and affinity configured on a set
#[derive(Debug, Clone, Default)]
pub(crate) struct SetConfig {
    pub(crate) before: Vec<OrderTarget>,
    pub(crate) after: Vec<OrderTarget>,
    pub(crate) parents: Vec<SystemSet>,
    pub(crate) worker: Option<String>,
}

/// Registrations of one stage
#[derive(Default)]
pub(crate) struct StageSchedule {
    pub(crate) systems: Vec<SystemNode>,
    pub(crate) sets: BTreeMap<SystemSet, SetConfig>,
}

/// Registered systems and sets, per stage
///
/// A schedule is only a description. It is validated and turned into
/// stage graphs when an [`Executor`](crate::ecs::Executor) is built from it.
#[derive(Default)]
pub struct Schedule {
    stages: BTreeMap<Stage, StageSchedule>,
}

impl Schedule {
    /// Create an empty schedule
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a system to a stage
    ///
    /// The returned builder adds ordering constraints, set membership and
    /// worker affinity. An inconsistent access declaration is logged here
    /// and reported when the executor is built.
    pub fn add_system<M>(&mut self, stage: Stage, system: impl IntoSystem<M>) -> SystemBuilder<'_> {
        let mut system: Box<dyn System> = Box::new(system.into_system());
        let label = system.name().to_string();
        let invalid = system.initialize().err();
        if let Some(err) = &invalid {
            error!(%stage, system = %label, %err, "invalid system access");
        } else {
            debug!(%stage, system = %label, "system registered");
        }

        let systems = &mut self.stages.entry(stage).or_default().systems;
        systems.push(SystemNode {
            system,
            label,
            before: Vec::new(),
            after: Vec::new(),
            sets: Vec::new(),
            worker: None,
            invalid,
        });
        let index = systems.len() - 1;
        SystemBuilder {
            node: &mut systems[index],
        }
    }

    /// Configure ordering and affinity of a set
    pub fn configure_set(&mut self, stage: Stage, set: SystemSet) -> SetBuilder<'_> {
        let config = self
            .stages
            .entry(stage)
            .or_default()
            .sets
            .entry(set)
            .or_default();
        SetBuilder { config }
    }

    /// Declare several sets at once
    pub fn configure_sets(
        &mut self,
        stage: Stage,
        sets: impl IntoIterator<Item = SystemSet>,
    ) -> SetChain<'_> {
        let schedule = self.stages.entry(stage).or_default();
        let sets: Vec<SystemSet> = sets.into_iter().collect();
        for set in &sets {
            schedule.sets.entry(set.clone()).or_default();
        }
        SetChain { schedule, sets }
    }

    /// Total number of registered systems
    pub fn system_count(&self) -> usize {
        self.stages.values().map(|stage| stage.systems.len()).sum()
    }

    /// Labels of the systems registered in a stage, in registration order
    pub fn labels(&self, stage: Stage) -> Vec<&str> {
        self.stages
            .get(&stage)
            .map(|schedule| schedule.systems.iter().map(|node| node.label.as_str()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn into_stages(self) -> BTreeMap<Stage, StageSchedule> {
        self.stages
    }
}

/// Builder returned by [`Schedule::add_system`]
pub struct SystemBuilder<'s> {
    node: &'s mut SystemNode,
}

impl<'s> SystemBuilder<'s> {
    /// Replace the label other systems use to refer to this one
    pub fn label(self, label: impl Into<String>) -> Self {
        self.node.label = label.into();
        self
    }

    /// Run before `target`
    pub fn before(self, target: impl Into<OrderTarget>) -> Self {
        self.node.before.push(target.into());
        self
    }

    /// Run after `target`
    pub fn after(self, target: impl Into<OrderTarget>) -> Self {
        self.node.after.push(target.into());
        self
    }

    /// Add the system to a set
    pub fn in_set(self, set: SystemSet) -> Self {
        self.node.sets.push(set);
        self
    }

    /// Pin the system to a named worker
    pub fn use_worker(self, worker: impl Into<String>) -> Self {
        self.node.worker = Some(worker.into());
        self
    }
}

/// Builder returned by [`Schedule::configure_set`]
pub struct SetBuilder<'s> {
    config: &'s mut SetConfig,
}

impl<'s> SetBuilder<'s> {
    /// Members of this set run before `target`
    pub fn before(self, target: impl Into<OrderTarget>) -> Self {
        self.config.before.push(target.into());
        self
    }

    /// Members of this set run after `target`
    pub fn after(self, target: impl Into<OrderTarget>) -> Self {
        self.config.after.push(target.into());
        self
    }

    /// Nest this set inside `parent`
    pub fn in_set(self, parent: SystemSet) -> Self {
        self.config.parents.push(parent);
        self
    }

    /// Pin every member to a named worker
    pub fn use_worker(self, worker: impl Into<String>) -> Self {
        self.config.worker = Some(worker.into());
        self
    }
}

/// Builder returned by [`Schedule::configure_sets`]
pub struct SetChain<'s> {
    schedule: &'s mut StageSchedule,
    sets: Vec<SystemSet>,
}

impl<'s> SetChain<'s> {
    /// Order the sets one after another, in the given order
    pub fn chain(self) -> Self {
        for pair in self.sets.windows(2) {
            if let Some(config) = self.schedule.sets.get_mut(&pair[1]) {
                config.after.push(OrderTarget::Set(pair[0].clone()));
            }
        }
        self
    }

    /// Nest every set inside `parent`
    pub fn in_set(self, parent: SystemSet) -> Self {
        for set in &self.sets {
            if let Some(config) = self.schedule.sets.get_mut(set) {
                config.parents.push(parent.clone());
            }
        }
        self
    }
}
