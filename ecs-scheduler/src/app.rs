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
//! Application handle
//!
//! [`App`] owns the world, the schedule under construction, the plugin
//! registry and, once finished, the executor. Registration happens on the
//! app until [`App::finish`] (or the first [`App::update`]) freezes the
//! schedule; from then on the app only runs ticks.

use crate::config::ExecutorConfig;
use crate::ecs::{
    Executor, IntoSystem, Resource, Schedule, SetBuilder, SetChain, Stage, SystemBuilder, SystemSet, World,
};
use crate::error::{AppError, PluginError};
use crate::plugins::{Plugin, PluginRegistry};
use tracing::{info, warn};

/// World, schedule and executor bundled together
///
/// # Examples
///
/// ```
/// use ecs_scheduler::App;
/// use ecs_scheduler::ecs::{Res, ResMut, Stage};
///
/// struct Score(u32);
///
/// fn award(mut score: ResMut<Score>) {
///     score.0 += 1;
/// }
///
/// fn report(score: Res<Score>) {
///     assert!(score.0 > 0);
/// }
///
/// let mut app = App::new();
/// app.insert_resource(Score(0));
/// app.add_system(Stage::Update, award);
/// app.add_system(Stage::PostUpdate, report);
/// app.run_for(3).unwrap();
/// assert_eq!(app.world().resource::<Score>().unwrap().0, 3);
/// ```
pub struct App {
    world: World,
    schedule: Schedule,
    plugins: PluginRegistry,
    config: ExecutorConfig,
    executor: Option<Executor>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// Create an app with the default executor configuration
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    /// Create an app with an explicit executor configuration
    pub fn with_config(config: ExecutorConfig) -> Self {
        App {
            world: World::new(),
            schedule: Schedule::new(),
            plugins: PluginRegistry::new(),
            config,
            executor: None,
        }
    }

    /// Register a plugin; it is built when the app is finished
    pub fn add_plugin(&mut self, plugin: impl Plugin + 'static) -> Result<&mut Self, AppError> {
        if self.executor.is_some() {
            return Err(PluginError::AlreadyBuilt.into());
        }
        self.plugins.register(Box::new(plugin))?;
        Ok(self)
    }

    /// Register a system in a stage
    ///
    /// Systems added after the app is finished are never run.
    pub fn add_system<M>(&mut self, stage: Stage, system: impl IntoSystem<M>) -> SystemBuilder<'_> {
        if self.executor.is_some() {
            warn!(%stage, "system added after the schedule was frozen; it will not run");
        }
        self.schedule.add_system(stage, system)
    }

    /// Configure ordering and affinity of a set
    pub fn configure_set(&mut self, stage: Stage, set: SystemSet) -> SetBuilder<'_> {
        self.schedule.configure_set(stage, set)
    }

    /// Declare several sets at once
    pub fn configure_sets(
        &mut self,
        stage: Stage,
        sets: impl IntoIterator<Item = SystemSet>,
    ) -> SetChain<'_> {
        self.schedule.configure_sets(stage, sets)
    }

    /// Insert a resource directly into the world
    ///
    /// Returns `true` if a previous value was replaced.
    pub fn insert_resource<R: Resource>(&mut self, value: R) -> bool {
        self.world.insert_resource(value)
    }

    /// Build plugins and validate the schedule
    ///
    /// Called implicitly by the first [`update`](Self::update). Calling it
    /// again is a no-op. A failure here leaves the app unusable.
    pub fn finish(&mut self) -> Result<(), AppError> {
        self.ensure_executor()
    }

    /// Run one tick
    pub fn update(&mut self) -> Result<(), AppError> {
        self.ensure_executor()?;
        match self.executor.as_mut() {
            Some(executor) => executor.tick(&mut self.world).map_err(AppError::from),
            None => Ok(()),
        }
    }

    /// Run `ticks` ticks, stopping at the first failed one
    pub fn run_for(&mut self, ticks: u64) -> Result<(), AppError> {
        for _ in 0..ticks {
            self.update()?;
        }
        Ok(())
    }

    /// Run the exit stages
    pub fn shutdown(&mut self) -> Result<(), AppError> {
        self.ensure_executor()?;
        match self.executor.as_mut() {
            Some(executor) => executor.shutdown(&mut self.world).map_err(AppError::from),
            None => Ok(()),
        }
    }

    /// The world
    pub fn world(&self) -> &World {
        &self.world
    }

    /// The world, mutably
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// The executor, once the app is finished
    pub fn executor(&self) -> Option<&Executor> {
        self.executor.as_ref()
    }

    /// Registered plugins
    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    fn ensure_executor(&mut self) -> Result<(), AppError> {
        if self.executor.is_some() {
            return Ok(());
        }
        let mut schedule = std::mem::take(&mut self.schedule);
        let order = self.plugins.build_all(&mut schedule, &mut self.world)?;
        info!(plugins = ?order, systems = schedule.system_count(), "finishing app");
        self.executor = Some(Executor::new(schedule, self.config.clone())?);
        Ok(())
    }
}
