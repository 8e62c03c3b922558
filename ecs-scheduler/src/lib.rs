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
//! # ECS Scheduler
//!
//! A stage-based scheduler for an ECS (Entity Component System): systems are
//! registered into fixed lifecycle stages, ordered with `before`/`after`
//! constraints and sets, and run in parallel wherever their data access
//! allows it.
//!
//! ## Features
//!
//! - **Access from signatures**: a system's reads and writes are derived from
//!   its parameter types (`Res`, `ResMut`, `Query`, `Command`, `Local`)
//! - **Deterministic ordering**: stage graphs are sorted with registration
//!   order as the tie-breaker; cycles are reported before the first tick
//! - **Parallelization**: optional Rayon integration; conflicting systems never overlap
//! - **Worker affinity**: systems can be pinned to dedicated threads such as `single`
//! - **Deferred commands**: structural changes are applied between stages
//! - **Extensibility**: plugins bundle registrations
//!
//! ## Example
//!
//! ```rust
//! use ecs_scheduler::App;
//! use ecs_scheduler::ecs::{Command, Component, Get, Query, Res, Stage};
//!
//! struct Velocity(f32);
//! impl Component for Velocity {}
//!
//! struct Speed(f32);
//!
//! fn spawn(command: Command, speed: Res<Speed>) {
//!     command.spawn((Velocity(speed.0),));
//! }
//!
//! fn accelerate(mut query: Query<Get<(&mut Velocity,)>>) {
//!     query.for_each(|_, (velocity,)| velocity.0 *= 2.0);
//! }
//!
//! let mut app = App::new();
//! app.insert_resource(Speed(1.5));
//! app.add_system(Stage::Startup, spawn);
//! app.add_system(Stage::Update, accelerate);
//! app.update().unwrap();
//! assert_eq!(app.world().entity_count(), 1);
//! ```

#![warn(missing_docs)]

/// Entity Component System implementation
pub mod ecs;

/// Plugin system for extensibility
pub mod plugins;

pub mod app;
pub mod config;
pub mod error;

pub use app::App;
pub use config::{ExecutorConfig, FailurePolicy};
pub use ecs::{Entity, World};
pub use error::{AccessError, AppError, FailureCause, PluginError, RunError, ScheduleError, SystemFailure, TickFailure};
