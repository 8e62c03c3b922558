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
//! Executor configuration
//!
//! [`ExecutorConfig`] controls the size of the default worker pool, the
//! dedicated named workers systems can be pinned to, and what happens to
//! the rest of a tick when a system fails.
//!
//! The same settings can be supplied through the environment:
//!
//! - `ECS_SCHEDULER_THREADS`: default pool size (`0` means one thread per core)
//! - `ECS_SCHEDULER_FAILURE_POLICY`: `abort`, `skip-dependents` or `continue`

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Name of the always-present single-threaded worker
pub const SINGLE_WORKER: &str = "single";

/// Name referring to the default pool
pub const DEFAULT_WORKER: &str = "default";

/// Environment variable holding the default pool size
pub const THREADS_ENV: &str = "ECS_SCHEDULER_THREADS";

/// Environment variable holding the failure policy
pub const FAILURE_POLICY_ENV: &str = "ECS_SCHEDULER_FAILURE_POLICY";

/// What the executor does after a system fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FailurePolicy {
    /// Finish the running level, flush the stage, then stop the tick
    #[default]
    Abort,
    /// Skip every system ordered after the failed one in its stage
    SkipDependents,
    /// Keep running every other system
    Continue,
}

impl FailurePolicy {
    /// Lower-case name as accepted by [`FromStr`]
    pub fn as_str(self) -> &'static str {
        match self {
            FailurePolicy::Abort => "abort",
            FailurePolicy::SkipDependents => "skip-dependents",
            FailurePolicy::Continue => "continue",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized failure policy name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown failure policy `{0}` (expected abort, skip-dependents or continue)")]
pub struct ParsePolicyError(String);

impl FromStr for FailurePolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "skip-dependents" | "skip" => Ok(FailurePolicy::SkipDependents),
            "continue" => Ok(FailurePolicy::Continue),
            _ => Err(ParsePolicyError(s.to_string())),
        }
    }
}

/// Executor settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Threads in the default pool; `None` lets rayon pick
    pub threads: Option<usize>,
    /// Reaction to system failures
    pub failure_policy: FailurePolicy,
    /// Dedicated workers by name and thread count
    pub workers: BTreeMap<String, usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let mut workers = BTreeMap::new();
        workers.insert(SINGLE_WORKER.to_string(), 1);
        ExecutorConfig {
            threads: None,
            failure_policy: FailurePolicy::default(),
            workers,
        }
    }
}

impl ExecutorConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the environment on top of the defaults
    ///
    /// Malformed values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(THREADS_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(0) => self.threads = None,
                Ok(threads) => self.threads = Some(threads),
                Err(err) => warn!(variable = THREADS_ENV, value = %raw, %err, "ignoring invalid thread count"),
            }
        }
        if let Some(raw) = lookup(FAILURE_POLICY_ENV) {
            match raw.parse::<FailurePolicy>() {
                Ok(policy) => self.failure_policy = policy,
                Err(err) => warn!(variable = FAILURE_POLICY_ENV, %err, "ignoring invalid failure policy"),
            }
        }
        self
    }

    /// Set the default pool size
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = if threads == 0 { None } else { Some(threads) };
        self
    }

    /// Set the failure policy
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Add a dedicated worker with its own thread pool
    ///
    /// Systems pinned to a worker with more than one thread may run
    /// concurrently within a level, on that pool only.
    ///
    /// The `single` worker always keeps exactly one thread, and `default`
    /// always names the default pool; both are left untouched.
    pub fn with_worker(mut self, name: impl Into<String>, threads: usize) -> Self {
        let name = name.into();
        if name == SINGLE_WORKER || name == DEFAULT_WORKER {
            return self;
        }
        self.workers.insert(name, threads.max(1));
        self
    }

    /// Whether `name` refers to a worker this configuration provides
    pub fn has_worker(&self, name: &str) -> bool {
        name == DEFAULT_WORKER || self.workers.contains_key(name)
    }
}
