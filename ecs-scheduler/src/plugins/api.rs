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
//! Plugin API trait and registration context
//!
//! A plugin bundles related systems, sets and initial resources so an
//! application can pull them in with one call. Plugins only register; they
//! never hold on to the executor and never mutate the world structurally
//! once ticks have started.
//!
//! # Safety Contracts
//!
//! Plugins must:
//! - Perform registration calls only, from [`Plugin::build`]
//! - Leave structural changes at run time to deferred commands
//! - Not create circular dependencies with other plugins

use crate::ecs::{IntoSystem, Resource, Schedule, SetBuilder, SetChain, Stage, SystemBuilder, SystemSet, World};

/// Version of the plugin API
///
/// This version must match between the scheduler and plugins to ensure compatibility.
/// Format: MAJOR.MINOR.PATCH following semantic versioning.
pub const PLUGIN_API_VERSION: &str = "0.1.0";

/// Registration surface handed to [`Plugin::build`]
///
/// The context exposes the same registration calls as the application
/// itself, scoped to the plugin being built.
pub struct PluginContext<'a> {
    plugin: &'a str,
    schedule: &'a mut Schedule,
    world: &'a mut World,
}

impl<'a> PluginContext<'a> {
    /// Create a new plugin context
    ///
    /// This is only callable by the registry, not by plugins.
    pub(crate) fn new(plugin: &'a str, schedule: &'a mut Schedule, world: &'a mut World) -> Self {
        PluginContext {
            plugin,
            schedule,
            world,
        }
    }

    /// Name of the plugin being built
    pub fn plugin_name(&self) -> &str {
        self.plugin
    }

    /// Register a system in a stage
    pub fn add_system<M>(&mut self, stage: Stage, system: impl IntoSystem<M>) -> SystemBuilder<'_> {
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

    /// Provide the initial value of a resource
    ///
    /// Returns `true` if a value inserted earlier (by the application or
    /// another plugin) was replaced.
    pub fn insert_resource<R: Resource>(&mut self, value: R) -> bool {
        self.world.insert_resource(value)
    }

    /// Whether a resource has been provided already
    pub fn contains_resource<R: Resource>(&self) -> bool {
        self.world.contains_resource::<R>()
    }
}

/// A reusable group of registrations
///
/// # Example
///
/// ```
/// use ecs_scheduler::ecs::{ResMut, Stage};
/// use ecs_scheduler::plugins::{Plugin, PluginContext};
///
/// struct Clock(u64);
///
/// fn advance(mut clock: ResMut<Clock>) {
///     clock.0 += 1;
/// }
///
/// struct ClockPlugin;
///
/// impl Plugin for ClockPlugin {
///     fn name(&self) -> &str { "clock" }
///     fn version(&self) -> &str { "1.0.0" }
///
///     fn build(&self, ctx: &mut PluginContext) {
///         ctx.insert_resource(Clock(0));
///         ctx.add_system(Stage::Prepare, advance);
///     }
/// }
/// ```
pub trait Plugin: Send + Sync {
    /// Get the name of this plugin
    ///
    /// Must be unique across all registered plugins.
    fn name(&self) -> &str;

    /// Get the version of this plugin
    ///
    /// Should follow semantic versioning (MAJOR.MINOR.PATCH).
    fn version(&self) -> &str;

    /// Get the plugin API version this plugin was built against
    ///
    /// Used for compatibility checking. Should return PLUGIN_API_VERSION.
    fn api_version(&self) -> &str {
        PLUGIN_API_VERSION
    }

    /// Get the list of plugin names this plugin depends on
    ///
    /// Dependencies are built before this plugin.
    fn dependencies(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Register systems, sets and resources
    fn build(&self, ctx: &mut PluginContext);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{Res, ResMut};

    struct Gravity(f32);

    fn apply(_gravity: Res<Gravity>) {}
    fn tune(mut gravity: ResMut<Gravity>) {
        gravity.0 *= 0.5;
    }

    struct TestPlugin;

    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            "test"
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        fn build(&self, ctx: &mut PluginContext) {
            ctx.insert_resource(Gravity(-9.81));
            let physics = SystemSet::new("physics");
            ctx.configure_set(Stage::Update, physics.clone());
            ctx.add_system(Stage::Update, tune).in_set(physics.clone());
            ctx.add_system(Stage::Update, apply).after(physics);
        }
    }

    #[test]
    fn test_plugin_api_version() {
        assert_eq!(PLUGIN_API_VERSION, "0.1.0");
    }

    #[test]
    fn test_plugin_defaults() {
        let plugin = TestPlugin;
        assert_eq!(plugin.name(), "test");
        assert_eq!(plugin.version(), "1.0.0");
        assert_eq!(plugin.api_version(), PLUGIN_API_VERSION);
        assert!(plugin.dependencies().is_empty());
    }

    #[test]
    fn test_plugin_build_registers() {
        let mut schedule = Schedule::new();
        let mut world = World::new();
        let mut ctx = PluginContext::new("test", &mut schedule, &mut world);
        assert_eq!(ctx.plugin_name(), "test");

        TestPlugin.build(&mut ctx);
        assert!(ctx.contains_resource::<Gravity>());
        assert!(ctx.insert_resource(Gravity(0.0)));

        assert_eq!(schedule.labels(Stage::Update), vec!["tune", "apply"]);
        assert_eq!(world.resource::<Gravity>().unwrap().0, 0.0);
    }
}
