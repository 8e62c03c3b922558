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
//! Error types
//!
//! Errors fall into four groups:
//!
//! - [`AccessError`]: a system's declared data access is internally
//!   inconsistent (detected at registration), or a borrow was attempted
//!   that the declaration did not cover (detected at run time).
//! - [`ScheduleError`]: configuration problems found while building stage
//!   graphs. All of them are reported before the first tick.
//! - [`SystemFailure`] / [`RunError`]: a system body failed during a tick.
//!   Failures always carry the system label and stage.
//! - [`PluginError`]: plugin registration and dependency problems.
//!
//! Despawning an entity that no longer exists is deliberately absent from
//! this list: destruction is idempotent.

use crate::ecs::Stage;
use thiserror::Error;

/// Inconsistent or uncovered data access
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// The same resource is requested mutably together with any other access
    #[error("resource `{0}` is requested mutably alongside another access in the same system")]
    ResourceAliasing(&'static str),

    /// The same component is written by one fetch and read or written by another
    #[error("component `{0}` is requested mutably alongside another access in the same system")]
    ComponentAliasing(&'static str),

    /// A fetched component is also excluded by a `Without` filter
    #[error("component `{0}` is fetched by a query that also excludes it with `Without`")]
    FetchExcluded(&'static str),

    /// A component is both required by `With` and excluded by `Without`
    #[error("component `{0}` is both required by `With` and excluded by `Without`")]
    FilterContradiction(&'static str),

    /// A borrow could not be taken because another holder has it
    #[error("`{0}` is already borrowed by a concurrently running system")]
    Contended(&'static str),
}

/// Configuration error found while building the schedule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The ordering constraints of a stage form a cycle
    #[error("ordering cycle in stage {stage}: {}", .systems.join(" -> "))]
    Cycle {
        /// Stage containing the cycle
        stage: Stage,
        /// Labels of the systems on the cycle, in edge order
        systems: Vec<String>,
    },

    /// A `before`/`after` target names no system or set in the stage
    #[error("{source_label} in stage {stage} is ordered relative to unknown {target}")]
    UnresolvedTarget {
        /// Stage the constraint was declared in
        stage: Stage,
        /// System or set that declared the constraint
        source_label: String,
        /// Description of the missing target
        target: String,
    },

    /// A system inherits two different worker affinities
    #[error("system `{system}` in stage {stage} is pinned to both worker `{first}` and worker `{second}`")]
    ConflictingWorker {
        /// Stage of the system
        stage: Stage,
        /// System label
        system: String,
        /// First affinity found
        first: String,
        /// Second, incompatible affinity
        second: String,
    },

    /// A system asks for a worker the executor was not configured with
    #[error("system `{system}` in stage {stage} requests unknown worker `{worker}`")]
    UnknownWorker {
        /// Stage of the system
        stage: Stage,
        /// System label
        system: String,
        /// Requested worker name
        worker: String,
    },

    /// Sets are nested inside each other in a loop
    #[error("set nesting cycle in stage {stage}: {}", .sets.join(" -> "))]
    SetCycle {
        /// Stage the sets were configured in
        stage: Stage,
        /// Set names on the loop
        sets: Vec<String>,
    },

    /// A system's declared access is inconsistent
    #[error("system `{system}` in stage {stage} has invalid access: {source}")]
    Access {
        /// Stage of the system
        stage: Stage,
        /// System label
        system: String,
        /// The access violation
        source: AccessError,
    },

    /// A worker thread pool could not be created
    #[error("failed to start worker `{worker}`: {reason}")]
    WorkerPool {
        /// Worker name
        worker: String,
        /// Underlying error message
        reason: String,
    },
}

/// Why a system run failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCause {
    /// The system returned an error value
    #[error("returned error: {0}")]
    Error(String),

    /// The system panicked
    #[error("panicked: {0}")]
    Panicked(String),

    /// A parameter could not be fetched
    #[error("parameter access failed: {0}")]
    Access(#[from] AccessError),
}

/// A single system failure attributed to its system and stage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("system `{system}` failed in stage {stage}: {cause}")]
pub struct SystemFailure {
    /// Label of the failing system
    pub system: String,
    /// Stage the system was running in
    pub stage: Stage,
    /// What went wrong
    pub cause: FailureCause,
}

/// Everything that went wrong during one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickFailure {
    /// Every failed system, in the order the failures were observed
    pub failures: Vec<SystemFailure>,
    /// Labels of systems skipped because a predecessor failed
    pub skipped: Vec<String>,
    /// Set when the tick stopped early; the stage where it stopped
    pub aborted_at: Option<Stage>,
}

impl std::fmt::Display for TickFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} system(s) failed", self.failures.len())?;
        if let Some(stage) = self.aborted_at {
            write!(f, ", tick aborted in stage {}", stage)?;
        }
        if let Some(first) = self.failures.first() {
            write!(f, " (first: {})", first)?;
        }
        Ok(())
    }
}

/// Error returned from running the schedule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// One or more systems failed
    #[error("{0}")]
    Systems(TickFailure),

    /// The executor has already run its exit stages
    #[error("executor has already shut down")]
    ShutDown,

    /// A startup stage aborted on an earlier tick, so tick stages never run
    #[error("startup aborted in stage {stage}; the executor cannot tick")]
    StartupFailed {
        /// Stage in which startup aborted
        stage: Stage,
    },
}

/// Plugin registration or build problem
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// A plugin with the same name is already registered
    #[error("plugin '{0}' is already registered")]
    Duplicate(String),

    /// The plugin targets an incompatible plugin API
    #[error("plugin '{name}' API version {plugin_api} is incompatible with engine API version {engine_api}")]
    IncompatibleApi {
        /// Plugin name
        name: String,
        /// API version the plugin was built against
        plugin_api: String,
        /// API version of this crate
        engine_api: String,
    },

    /// A declared dependency is not registered
    #[error("plugin '{plugin}' depends on '{dependency}' which is not registered")]
    MissingDependency {
        /// Plugin declaring the dependency
        plugin: String,
        /// Missing dependency name
        dependency: String,
    },

    /// Plugin dependencies form a cycle
    #[error("circular dependency detected among plugins: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    /// Plugins can no longer be added
    #[error("plugins cannot be registered after the app has been finished")]
    AlreadyBuilt,
}

/// Top-level error for [`App`](crate::App)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    /// Schedule configuration error
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// Runtime failure
    #[error(transparent)]
    Run(#[from] RunError),

    /// Plugin failure
    #[error(transparent)]
    Plugin(#[from] PluginError),
}
