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
//! Declared data access
//!
//! Every system carries a [`SystemAccess`] describing which resources and
//! component types it reads and writes. The descriptor is built once from
//! the system's parameter types and is the only input to conflict
//! detection: two systems conflict when they touch the same resource or
//! component type and at least one of them writes it.
//!
//! Filter-only component types (`With`/`Without`) are recorded for
//! validation but never take part in conflict detection.

use crate::ecs::{Component, Resource};
use crate::error::AccessError;
use std::any::{type_name, TypeId};
use std::collections::BTreeMap;

type TypeSet = BTreeMap<TypeId, &'static str>;

/// Component access of a single query
#[derive(Debug, Clone, Default)]
pub struct QueryAccess {
    reads: TypeSet,
    writes: TypeSet,
    with: TypeSet,
    without: TypeSet,
    aliased: Option<&'static str>,
}

impl QueryAccess {
    /// Create an empty query descriptor
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a shared borrow of `T`
    pub fn read<T: Component>(&mut self) {
        let id = TypeId::of::<T>();
        if self.writes.contains_key(&id) {
            self.aliased.get_or_insert(type_name::<T>());
        }
        self.reads.insert(id, type_name::<T>());
    }

    /// Record an exclusive borrow of `T`
    pub fn write<T: Component>(&mut self) {
        let id = TypeId::of::<T>();
        if self.reads.contains_key(&id) || self.writes.contains_key(&id) {
            self.aliased.get_or_insert(type_name::<T>());
        }
        self.writes.insert(id, type_name::<T>());
    }

    /// Record a `With<T>` filter
    pub fn with<T: Component>(&mut self) {
        self.with.insert(TypeId::of::<T>(), type_name::<T>());
    }

    /// Record a `Without<T>` filter
    pub fn without<T: Component>(&mut self) {
        self.without.insert(TypeId::of::<T>(), type_name::<T>());
    }

    /// Component types every matching entity must have, fetched or filtered
    pub fn required(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.reads
            .keys()
            .chain(self.writes.keys())
            .chain(self.with.keys())
            .copied()
    }

    /// Component types matching entities must not have
    pub fn excluded(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.without.keys().copied()
    }

    fn validate(&self) -> Result<(), AccessError> {
        if let Some(name) = self.aliased {
            return Err(AccessError::ComponentAliasing(name));
        }
        for (id, name) in &self.without {
            if self.reads.contains_key(id) || self.writes.contains_key(id) {
                return Err(AccessError::FetchExcluded(*name));
            }
            if self.with.contains_key(id) {
                return Err(AccessError::FilterContradiction(*name));
            }
        }
        Ok(())
    }
}

/// Everything a system may touch while it runs
///
/// Function systems derive this from their parameters. Hand-written
/// systems build it explicitly:
///
/// ```
/// use ecs_scheduler::ecs::SystemAccess;
///
/// struct Score(u32);
/// struct Lives(u8);
///
/// let access = SystemAccess::new()
///     .reads_resource::<Score>()
///     .writes_resource::<Lives>();
/// assert!(access.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct SystemAccess {
    resource_reads: TypeSet,
    resource_writes: TypeSet,
    component_reads: TypeSet,
    component_writes: TypeSet,
    filters: TypeSet,
    commands: bool,
    local: bool,
    invalid: Option<AccessError>,
}

impl SystemAccess {
    /// Create an empty access descriptor
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a shared borrow of resource `T`
    pub fn add_resource_read<T: Resource>(&mut self) -> Result<(), AccessError> {
        let id = TypeId::of::<T>();
        if self.resource_writes.contains_key(&id) {
            return Err(AccessError::ResourceAliasing(type_name::<T>()));
        }
        self.resource_reads.insert(id, type_name::<T>());
        Ok(())
    }

    /// Record an exclusive borrow of resource `T`
    pub fn add_resource_write<T: Resource>(&mut self) -> Result<(), AccessError> {
        let id = TypeId::of::<T>();
        if self.resource_reads.contains_key(&id) || self.resource_writes.contains_key(&id) {
            return Err(AccessError::ResourceAliasing(type_name::<T>()));
        }
        self.resource_writes.insert(id, type_name::<T>());
        Ok(())
    }

    /// Merge the access of one query into the system
    ///
    /// Fails if the query is inconsistent on its own, or if it writes a
    /// component another query of the same system already borrows (or
    /// borrows one another query writes).
    pub fn add_query(&mut self, query: &QueryAccess) -> Result<(), AccessError> {
        query.validate()?;

        for (id, name) in &query.writes {
            if self.component_reads.contains_key(id) || self.component_writes.contains_key(id) {
                return Err(AccessError::ComponentAliasing(*name));
            }
        }
        for (id, name) in &query.reads {
            if self.component_writes.contains_key(id) {
                return Err(AccessError::ComponentAliasing(*name));
            }
        }

        self.component_reads.extend(query.reads.iter().map(|(k, v)| (*k, *v)));
        self.component_writes.extend(query.writes.iter().map(|(k, v)| (*k, *v)));
        self.filters.extend(query.with.iter().map(|(k, v)| (*k, *v)));
        self.filters.extend(query.without.iter().map(|(k, v)| (*k, *v)));
        Ok(())
    }

    /// Mark the system as producing deferred commands
    pub fn add_commands(&mut self) {
        self.commands = true;
    }

    /// Mark the system as owning private local state
    pub fn add_local(&mut self) {
        self.local = true;
    }

    /// Builder form of [`add_resource_read`](Self::add_resource_read)
    ///
    /// A violation is kept and reported by [`validate`](Self::validate).
    pub fn reads_resource<T: Resource>(mut self) -> Self {
        let result = self.add_resource_read::<T>();
        self.keep_violation(result)
    }

    /// Builder form of [`add_resource_write`](Self::add_resource_write)
    pub fn writes_resource<T: Resource>(mut self) -> Self {
        let result = self.add_resource_write::<T>();
        self.keep_violation(result)
    }

    /// Declare a shared borrow of component `T`
    pub fn reads_component<T: Component>(mut self) -> Self {
        let mut query = QueryAccess::new();
        query.read::<T>();
        let result = self.add_query(&query);
        self.keep_violation(result)
    }

    /// Declare an exclusive borrow of component `T`
    pub fn writes_component<T: Component>(mut self) -> Self {
        let mut query = QueryAccess::new();
        query.write::<T>();
        let result = self.add_query(&query);
        self.keep_violation(result)
    }

    /// Declare that the system issues commands
    pub fn with_commands(mut self) -> Self {
        self.add_commands();
        self
    }

    fn keep_violation(mut self, result: Result<(), AccessError>) -> Self {
        if let Err(err) = result {
            self.invalid.get_or_insert(err);
        }
        self
    }

    /// First violation recorded through the builder methods, if any
    pub fn validate(&self) -> Result<(), AccessError> {
        match &self.invalid {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Whether running alongside `other` could race on shared data
    pub fn conflicts_with(&self, other: &SystemAccess) -> bool {
        !self.conflicting_names(other).is_empty()
    }

    /// Names of the resources and components the two systems race on
    pub fn conflicting_names(&self, other: &SystemAccess) -> Vec<&'static str> {
        let mut names = Vec::new();
        collect_conflicts(
            &self.resource_reads,
            &self.resource_writes,
            &other.resource_reads,
            &other.resource_writes,
            &mut names,
        );
        collect_conflicts(
            &self.component_reads,
            &self.component_writes,
            &other.component_reads,
            &other.component_writes,
            &mut names,
        );
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Whether the system reads the resource type `id`
    pub fn reads_resource_type(&self, id: TypeId) -> bool {
        self.resource_reads.contains_key(&id)
    }

    /// Whether the system writes the resource type `id`
    pub fn writes_resource_type(&self, id: TypeId) -> bool {
        self.resource_writes.contains_key(&id)
    }

    /// Whether the system reads the component type `id`
    pub fn reads_component_type(&self, id: TypeId) -> bool {
        self.component_reads.contains_key(&id)
    }

    /// Whether the system writes the component type `id`
    pub fn writes_component_type(&self, id: TypeId) -> bool {
        self.component_writes.contains_key(&id)
    }

    /// Whether a component type appears in a filter
    pub fn filters_component_type(&self, id: TypeId) -> bool {
        self.filters.contains_key(&id)
    }

    /// Whether the system issues commands
    pub fn uses_commands(&self) -> bool {
        self.commands
    }

    /// Whether the system owns local state
    pub fn has_local(&self) -> bool {
        self.local
    }

    /// Whether the system touches no shared data at all
    pub fn is_empty(&self) -> bool {
        self.resource_reads.is_empty()
            && self.resource_writes.is_empty()
            && self.component_reads.is_empty()
            && self.component_writes.is_empty()
    }
}

fn collect_conflicts(
    reads: &TypeSet,
    writes: &TypeSet,
    other_reads: &TypeSet,
    other_writes: &TypeSet,
    names: &mut Vec<&'static str>,
) {
    for (id, name) in writes {
        if other_reads.contains_key(id) || other_writes.contains_key(id) {
            names.push(*name);
        }
    }
    for (id, name) in reads {
        if other_writes.contains_key(id) {
            names.push(*name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position;
    impl Component for Position {}
    struct Velocity;
    impl Component for Velocity {}
    struct Frozen;
    impl Component for Frozen {}

    struct Time;

    #[test]
    fn test_resource_read_write_aliasing() {
        let mut access = SystemAccess::new();
        access.add_resource_read::<Time>().unwrap();
        access.add_resource_read::<Time>().unwrap();
        assert_eq!(
            access.add_resource_write::<Time>(),
            Err(AccessError::ResourceAliasing(type_name::<Time>()))
        );

        let mut access = SystemAccess::new();
        access.add_resource_write::<Time>().unwrap();
        assert!(access.add_resource_write::<Time>().is_err());
        assert!(access.add_resource_read::<Time>().is_err());
    }

    #[test]
    fn test_query_aliasing_within_query() {
        let mut query = QueryAccess::new();
        query.write::<Position>();
        query.read::<Position>();
        let mut access = SystemAccess::new();
        assert!(matches!(
            access.add_query(&query),
            Err(AccessError::ComponentAliasing(_))
        ));
    }

    #[test]
    fn test_query_aliasing_across_queries() {
        let mut first = QueryAccess::new();
        first.read::<Position>();
        let mut second = QueryAccess::new();
        second.write::<Position>();

        let mut access = SystemAccess::new();
        access.add_query(&first).unwrap();
        assert!(access.add_query(&second).is_err());

        let mut reader = QueryAccess::new();
        reader.read::<Position>();
        let mut access = SystemAccess::new();
        access.add_query(&first).unwrap();
        assert!(access.add_query(&reader).is_ok());
    }

    #[test]
    fn test_fetch_excluded_and_contradiction() {
        let mut query = QueryAccess::new();
        query.read::<Position>();
        query.without::<Position>();
        assert!(matches!(
            SystemAccess::new().add_query(&query),
            Err(AccessError::FetchExcluded(_))
        ));

        let mut query = QueryAccess::new();
        query.with::<Frozen>();
        query.without::<Frozen>();
        assert!(matches!(
            SystemAccess::new().add_query(&query),
            Err(AccessError::FilterContradiction(_))
        ));
    }

    #[test]
    fn test_conflict_rules() {
        let reader = SystemAccess::new().reads_component::<Position>();
        let other_reader = SystemAccess::new().reads_component::<Position>();
        let writer = SystemAccess::new().writes_component::<Position>();
        let unrelated = SystemAccess::new().writes_component::<Velocity>();

        assert!(!reader.conflicts_with(&other_reader));
        assert!(reader.conflicts_with(&writer));
        assert!(writer.conflicts_with(&reader));
        assert!(!writer.conflicts_with(&unrelated));

        let res_reader = SystemAccess::new().reads_resource::<Time>();
        let res_writer = SystemAccess::new().writes_resource::<Time>();
        assert!(res_reader.conflicts_with(&res_writer));
        assert_eq!(res_reader.conflicting_names(&res_writer), vec![type_name::<Time>()]);
    }

    #[test]
    fn test_filters_do_not_conflict() {
        let mut filtered = QueryAccess::new();
        filtered.read::<Velocity>();
        filtered.with::<Position>();
        let mut access = SystemAccess::new();
        access.add_query(&filtered).unwrap();

        let writer = SystemAccess::new().writes_component::<Position>();
        assert!(!access.conflicts_with(&writer));
        assert!(access.filters_component_type(TypeId::of::<Position>()));
    }

    #[test]
    fn test_builder_keeps_first_violation() {
        let access = SystemAccess::new()
            .writes_resource::<Time>()
            .reads_resource::<Time>();
        assert!(matches!(
            access.validate(),
            Err(AccessError::ResourceAliasing(_))
        ));
    }
}
