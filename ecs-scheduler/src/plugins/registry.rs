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
//! Plugin registry
//!
//! This module provides the registry for managing plugins, including:
//! - Static registration via direct API calls
//! - Dependency resolution and circular dependency detection
//! - Version compatibility checking
//!
//! Plugins are built once, in dependency order. Plugins without an ordering
//! relation between them are built in registration order, so the resulting
//! schedule is the same on every run.

use crate::ecs::{Schedule, World};
use crate::error::PluginError;
use crate::plugins::api::{Plugin, PluginContext, PLUGIN_API_VERSION};
use semver::Version;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

/// Plugin registry for managing and building plugins
///
/// # Thread Safety
///
/// The registry is Send + Sync. Registration and building happen during
/// application setup, before the first tick.
pub struct PluginRegistry {
    /// Registered plugins, in registration order
    plugins: Vec<Box<dyn Plugin>>,
    /// Index into `plugins` by name
    index: HashMap<String, usize>,
    /// Build order (topologically sorted by dependencies)
    load_order: Vec<String>,
    /// Whether the plugins have been built
    built: bool,
}

impl PluginRegistry {
    /// Create a new plugin registry
    pub fn new() -> Self {
        PluginRegistry {
            plugins: Vec::new(),
            index: HashMap::new(),
            load_order: Vec::new(),
            built: false,
        }
    }

    /// Register a plugin statically
    ///
    /// # Errors
    ///
    /// - A plugin with the same name is already registered
    /// - The plugin API version is incompatible
    /// - The plugins have already been built
    pub fn register(&mut self, plugin: Box<dyn Plugin>) -> Result<(), PluginError> {
        if self.built {
            return Err(PluginError::AlreadyBuilt);
        }

        let name = plugin.name().to_string();
        if self.index.contains_key(&name) {
            return Err(PluginError::Duplicate(name));
        }

        let plugin_api = plugin.api_version();
        if !is_api_compatible(plugin_api, PLUGIN_API_VERSION) {
            return Err(PluginError::IncompatibleApi {
                name,
                plugin_api: plugin_api.to_string(),
                engine_api: PLUGIN_API_VERSION.to_string(),
            });
        }

        debug!(plugin = %name, version = plugin.version(), "plugin registered");
        self.index.insert(name, self.plugins.len());
        self.plugins.push(plugin);
        Ok(())
    }

    /// Build every registered plugin in dependency order
    ///
    /// Returns the build order.
    ///
    /// # Errors
    ///
    /// - Missing dependencies
    /// - Circular dependencies
    /// - The plugins have already been built
    pub fn build_all(&mut self, schedule: &mut Schedule, world: &mut World) -> Result<&[String], PluginError> {
        if self.built {
            return Err(PluginError::AlreadyBuilt);
        }

        let mut dependencies: Vec<Vec<usize>> = Vec::with_capacity(self.plugins.len());
        for plugin in &self.plugins {
            let mut deps = Vec::new();
            for dep in plugin.dependencies() {
                match self.index.get(dep) {
                    Some(&index) => deps.push(index),
                    None => {
                        return Err(PluginError::MissingDependency {
                            plugin: plugin.name().to_string(),
                            dependency: dep.to_string(),
                        })
                    }
                }
            }
            dependencies.push(deps);
        }

        let order = topological_sort(&dependencies).map_err(|remaining| {
            PluginError::CircularDependency(
                remaining
                    .into_iter()
                    .map(|index| self.plugins[index].name().to_string())
                    .collect(),
            )
        })?;

        for index in order {
            let plugin = &self.plugins[index];
            let mut ctx = PluginContext::new(plugin.name(), schedule, world);
            plugin.build(&mut ctx);
            info!(plugin = plugin.name(), version = plugin.version(), "plugin built");
            self.load_order.push(plugin.name().to_string());
        }

        self.built = true;
        Ok(&self.load_order)
    }

    /// Get a plugin by name
    pub fn get(&self, name: &str) -> Option<&dyn Plugin> {
        self.index.get(name).map(|&index| self.plugins[index].as_ref())
    }

    /// Get the number of registered plugins
    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Check if the plugins have been built
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Get the plugin build order
    ///
    /// Empty until [`build_all`](Self::build_all) has succeeded.
    pub fn load_order(&self) -> &[String] {
        &self.load_order
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if a plugin API version is compatible with this crate
///
/// Uses semantic versioning rules:
/// - Major version must match
/// - For major version 0.x.y, minor versions must match (breaking changes)
/// - For major version >= 1, plugin minor version must not exceed ours
/// - Patch version is ignored
pub fn is_api_compatible(plugin_version: &str, engine_version: &str) -> bool {
    let (Ok(plugin), Ok(engine)) = (Version::parse(plugin_version), Version::parse(engine_version)) else {
        return false;
    };

    if plugin.major != engine.major {
        return false;
    }
    if plugin.major == 0 {
        plugin.minor == engine.minor
    } else {
        plugin.minor <= engine.minor
    }
}

/// Order plugins so every plugin comes after its dependencies
///
/// `dependencies[i]` lists the plugins plugin `i` depends on. Ties are
/// resolved by registration order. On a cycle, returns every plugin that
/// could not be ordered.
fn topological_sort(dependencies: &[Vec<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); dependencies.len()];
    for (dependent, deps) in dependencies.iter().enumerate() {
        for &dep in deps {
            dependents[dep].push(dependent);
        }
    }

    let mut queue: VecDeque<usize> = (0..dependencies.len())
        .filter(|&index| in_degree[index] == 0)
        .collect();
    let mut sorted = Vec::with_capacity(dependencies.len());

    while let Some(node) = queue.pop_front() {
        sorted.push(node);
        for &next in &dependents[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if sorted.len() != dependencies.len() {
        return Err((0..dependencies.len()).filter(|&index| in_degree[index] > 0).collect());
    }
    Ok(sorted)
}

/// Macro for static plugin registration
///
/// Expands to the `Result` of [`PluginRegistry::register`].
///
/// # Example
///
/// ```rust,ignore
/// register_plugin!(registry, MyPlugin::new())?;
/// ```
#[macro_export]
macro_rules! register_plugin {
    ($registry:expr, $plugin:expr) => {
        $registry.register(Box::new($plugin))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::Stage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct TestPlugin {
        name: String,
        api: String,
        deps: Vec<String>,
        builds: Arc<AtomicUsize>,
    }

    impl TestPlugin {
        fn new(name: &str, deps: Vec<&str>) -> Self {
            TestPlugin {
                name: name.to_string(),
                api: PLUGIN_API_VERSION.to_string(),
                deps: deps.iter().map(|s| s.to_string()).collect(),
                builds: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        fn api_version(&self) -> &str {
            &self.api
        }

        fn dependencies(&self) -> Vec<&str> {
            self.deps.iter().map(|s| s.as_str()).collect()
        }

        fn build(&self, ctx: &mut PluginContext) {
            self.builds.fetch_add(1, Ordering::SeqCst);
            let name = ctx.plugin_name().to_string();
            ctx.add_system(Stage::Update, || {}).label(name);
        }
    }

    fn build(registry: &mut PluginRegistry) -> Result<Vec<String>, PluginError> {
        let mut schedule = Schedule::new();
        let mut world = World::new();
        registry.build_all(&mut schedule, &mut world).map(|order| order.to_vec())
    }

    #[test]
    fn test_registry_creation() {
        let registry = PluginRegistry::new();
        assert_eq!(registry.plugin_count(), 0);
        assert!(!registry.is_built());
    }

    #[test]
    fn test_duplicate_plugin_registration() {
        let mut registry = PluginRegistry::new();
        registry
            .register(Box::new(TestPlugin::new("test", vec![])))
            .unwrap();

        let result = registry.register(Box::new(TestPlugin::new("test", vec![])));
        assert_eq!(result, Err(PluginError::Duplicate("test".to_string())));
    }

    #[test]
    fn test_incompatible_api_rejected() {
        let mut registry = PluginRegistry::new();
        let mut plugin = TestPlugin::new("future", vec![]);
        plugin.api = "0.2.0".to_string();
        assert!(matches!(
            registry.register(Box::new(plugin)),
            Err(PluginError::IncompatibleApi { .. })
        ));
    }

    #[test]
    fn test_build_registers_systems_once() {
        let mut registry = PluginRegistry::new();
        let plugin = TestPlugin::new("test", vec![]);
        let builds = plugin.builds.clone();
        register_plugin!(registry, plugin).unwrap();

        let mut schedule = Schedule::new();
        let mut world = World::new();
        registry.build_all(&mut schedule, &mut world).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(schedule.labels(Stage::Update), vec!["test"]);
        assert!(registry.is_built());

        assert_eq!(
            registry.build_all(&mut schedule, &mut world).unwrap_err(),
            PluginError::AlreadyBuilt
        );
        assert_eq!(
            registry.register(Box::new(TestPlugin::new("late", vec![]))),
            Err(PluginError::AlreadyBuilt)
        );
    }

    #[test]
    fn test_dependency_resolution() {
        let mut registry = PluginRegistry::new();
        registry
            .register(Box::new(TestPlugin::new("plugin_c", vec!["plugin_b"])))
            .unwrap();
        registry
            .register(Box::new(TestPlugin::new("plugin_b", vec!["plugin_a"])))
            .unwrap();
        registry
            .register(Box::new(TestPlugin::new("plugin_a", vec![])))
            .unwrap();
        registry
            .register(Box::new(TestPlugin::new("plugin_d", vec![])))
            .unwrap();

        let order = build(&mut registry).unwrap();
        assert_eq!(order, vec!["plugin_a", "plugin_d", "plugin_b", "plugin_c"]);
        assert_eq!(registry.load_order(), order.as_slice());
    }

    #[test]
    fn test_missing_dependency() {
        let mut registry = PluginRegistry::new();
        registry
            .register(Box::new(TestPlugin::new("plugin_b", vec!["plugin_a"])))
            .unwrap();

        assert_eq!(
            build(&mut registry),
            Err(PluginError::MissingDependency {
                plugin: "plugin_b".to_string(),
                dependency: "plugin_a".to_string(),
            })
        );
    }

    #[test]
    fn test_circular_dependency() {
        let mut registry = PluginRegistry::new();

        // A -> B -> C -> A
        registry
            .register(Box::new(TestPlugin::new("plugin_a", vec!["plugin_c"])))
            .unwrap();
        registry
            .register(Box::new(TestPlugin::new("plugin_b", vec!["plugin_a"])))
            .unwrap();
        registry
            .register(Box::new(TestPlugin::new("plugin_c", vec!["plugin_b"])))
            .unwrap();
        registry
            .register(Box::new(TestPlugin::new("plugin_d", vec![])))
            .unwrap();

        match build(&mut registry) {
            Err(PluginError::CircularDependency(names)) => {
                assert_eq!(names, vec!["plugin_a", "plugin_b", "plugin_c"]);
            }
            other => panic!("expected circular dependency, got {:?}", other),
        }
        assert!(!registry.is_built());
    }

    #[test]
    fn test_version_compatibility() {
        assert!(is_api_compatible("0.1.0", "0.1.0"));
        assert!(is_api_compatible("0.1.5", "0.1.0"));
        assert!(!is_api_compatible("0.2.0", "0.1.0"));
        assert!(is_api_compatible("1.0.0", "1.2.0"));
        assert!(!is_api_compatible("1.3.0", "1.2.0"));
        assert!(!is_api_compatible("2.0.0", "1.0.0"));
        assert!(!is_api_compatible("not-a-version", "0.1.0"));
    }

    #[test]
    fn test_get_plugin() {
        let mut registry = PluginRegistry::new();
        registry
            .register(Box::new(TestPlugin::new("test", vec![])))
            .unwrap();
        assert_eq!(registry.get("test").map(|p| p.version()), Some("1.0.0"));
        assert!(registry.get("missing").is_none());
    }
}
