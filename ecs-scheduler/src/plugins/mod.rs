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
//! Plugin system for packaging registrations
//!
//! A plugin is a named, versioned group of registration calls: systems,
//! set configuration and initial resources. Rendering, windowing and other
//! collaborators plug into the scheduler this way.
//!
//! # Features
//!
//! - **Registration only**: plugins receive a [`PluginContext`] that exposes
//!   `add_system`, `configure_set(s)` and `insert_resource`, nothing else
//! - **Dependency Management**: dependencies are built first; cycles are rejected
//! - **Version Checking**: API version compatibility validation between the
//!   scheduler and plugins
//!
//! # Example
//!
//! ```
//! use ecs_scheduler::ecs::{Res, Schedule, Stage, World};
//! use ecs_scheduler::plugins::{Plugin, PluginContext, PluginRegistry};
//!
//! struct Title(&'static str);
//!
//! fn show(title: Res<Title>) {
//!     let _ = title.0;
//! }
//!
//! struct TitlePlugin;
//!
//! impl Plugin for TitlePlugin {
//!     fn name(&self) -> &str { "title" }
//!     fn version(&self) -> &str { "1.0.0" }
//!
//!     fn build(&self, ctx: &mut PluginContext) {
//!         ctx.insert_resource(Title("demo"));
//!         ctx.add_system(Stage::Render, show).use_worker("single");
//!     }
//! }
//!
//! let mut registry = PluginRegistry::new();
//! registry.register(Box::new(TitlePlugin)).unwrap();
//!
//! let mut schedule = Schedule::new();
//! let mut world = World::new();
//! registry.build_all(&mut schedule, &mut world).unwrap();
//! assert_eq!(schedule.labels(Stage::Render), vec!["show"]);
//! ```
//!
//! # Version Compatibility
//!
//! The plugin API follows semantic versioning:
//!
//! - **Major version**: Breaking API changes
//! - **Minor version**: Backward-compatible additions (breaking while 0.x)
//! - **Patch version**: Bug fixes only

pub mod api;
pub mod registry;

pub use api::{Plugin, PluginContext, PLUGIN_API_VERSION};
pub use registry::{is_api_compatible, PluginRegistry};
