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
//! Component queries
//!
//! A [`Query`] borrows the columns named by its data type for as long as the
//! system runs and walks the entities that match its filters:
//!
//! ```
//! use ecs_scheduler::ecs::{Component, Get, Query, With, Without, World};
//!
//! #[derive(Debug, PartialEq)]
//! struct Position(f32);
//! impl Component for Position {}
//! struct Velocity(f32);
//! impl Component for Velocity {}
//! struct Frozen;
//! impl Component for Frozen {}
//!
//! let mut world = World::new();
//! world.spawn((Position(0.0), Velocity(2.0)));
//! world.spawn((Position(5.0), Velocity(1.0), Frozen));
//!
//! let mut query =
//!     Query::<Get<(&mut Position, &Velocity)>, With<()>, Without<(Frozen,)>>::from_world(&world)
//!         .unwrap();
//! query.for_each(|_, (position, velocity)| position.0 += velocity.0);
//! assert_eq!(query.len(), 1);
//! ```
//!
//! Matching entities are snapshotted when the query is created and visited
//! in ascending entity order, so every pass over the same query sees the
//! same rows.

use crate::ecs::{Component, ComponentStorage, ComponentStore, DenseStorage, Entity, QueryAccess, SystemAccess, World};
use crate::error::AccessError;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;
use std::any::type_name;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

/// Data fetched by a query for each matching entity
pub trait QueryData {
    /// Borrow held for the lifetime of the query
    type Fetch;

    /// Per-entity item handed to the caller
    type Item<'a>;

    /// Record the component access of this data
    fn declare(access: &mut QueryAccess);

    /// Borrow the needed columns; `None` if a column does not exist yet
    fn fetch(store: &ComponentStore) -> Result<Option<Self::Fetch>, AccessError>;

    /// Produce the item of one entity
    fn item<'a>(fetch: &'a mut Self::Fetch, entity: Entity) -> Option<Self::Item<'a>>;
}

/// Query data that never hands out mutable borrows
pub trait ReadOnlyQueryData: QueryData {
    /// Produce the item of one entity through a shared borrow
    fn read<'a>(fetch: &'a Self::Fetch, entity: Entity) -> Option<Self::Item<'a>>;
}

impl<'r, T: Component> QueryData for &'r T {
    type Fetch = ArcRwLockReadGuard<RawRwLock, DenseStorage<T>>;
    type Item<'a> = &'a T;

    fn declare(access: &mut QueryAccess) {
        access.read::<T>();
    }

    fn fetch(store: &ComponentStore) -> Result<Option<Self::Fetch>, AccessError> {
        match store.storage::<T>() {
            Some(storage) => storage
                .try_read_arc()
                .map(Some)
                .ok_or(AccessError::Contended(type_name::<T>())),
            None => Ok(None),
        }
    }

    fn item<'a>(fetch: &'a mut Self::Fetch, entity: Entity) -> Option<&'a T> {
        fetch.get(entity)
    }
}

impl<'r, T: Component> ReadOnlyQueryData for &'r T {
    fn read<'a>(fetch: &'a Self::Fetch, entity: Entity) -> Option<&'a T> {
        fetch.get(entity)
    }
}

impl<'r, T: Component> QueryData for &'r mut T {
    type Fetch = ArcRwLockWriteGuard<RawRwLock, DenseStorage<T>>;
    type Item<'a> = &'a mut T;

    fn declare(access: &mut QueryAccess) {
        access.write::<T>();
    }

    fn fetch(store: &ComponentStore) -> Result<Option<Self::Fetch>, AccessError> {
        match store.storage::<T>() {
            Some(storage) => storage
                .try_write_arc()
                .map(Some)
                .ok_or(AccessError::Contended(type_name::<T>())),
            None => Ok(None),
        }
    }

    fn item<'a>(fetch: &'a mut Self::Fetch, entity: Entity) -> Option<&'a mut T> {
        fetch.get_mut(entity)
    }
}

// Entity-only queries: matching is driven by the filters alone.
impl QueryData for () {
    type Fetch = ();
    type Item<'a> = ();

    fn declare(_access: &mut QueryAccess) {}

    fn fetch(_store: &ComponentStore) -> Result<Option<()>, AccessError> {
        Ok(Some(()))
    }

    fn item<'a>(_fetch: &'a mut (), _entity: Entity) -> Option<()> {
        Some(())
    }
}

impl ReadOnlyQueryData for () {
    fn read<'a>(_fetch: &'a (), _entity: Entity) -> Option<()> {
        Some(())
    }
}

macro_rules! impl_query_data_tuple {
    ($($P:ident),+) => {
        impl<$($P: QueryData),+> QueryData for ($($P,)+) {
            type Fetch = ($($P::Fetch,)+);
            type Item<'a> = ($($P::Item<'a>,)+);

            fn declare(access: &mut QueryAccess) {
                $($P::declare(access);)+
            }

            #[allow(non_snake_case)]
            fn fetch(store: &ComponentStore) -> Result<Option<Self::Fetch>, AccessError> {
                $(
                    let Some($P) = $P::fetch(store)? else {
                        return Ok(None);
                    };
                )+
                Ok(Some(($($P,)+)))
            }

            #[allow(non_snake_case)]
            fn item<'a>(fetch: &'a mut Self::Fetch, entity: Entity) -> Option<Self::Item<'a>> {
                let ($($P,)+) = fetch;
                Some(($($P::item($P, entity)?,)+))
            }
        }

        impl<$($P: ReadOnlyQueryData),+> ReadOnlyQueryData for ($($P,)+) {
            #[allow(non_snake_case)]
            fn read<'a>(fetch: &'a Self::Fetch, entity: Entity) -> Option<Self::Item<'a>> {
                let ($($P,)+) = fetch;
                Some(($($P::read($P, entity)?,)+))
            }
        }
    };
}

impl_query_data_tuple!(A);
impl_query_data_tuple!(A, B);
impl_query_data_tuple!(A, B, C);
impl_query_data_tuple!(A, B, C, D);
impl_query_data_tuple!(A, B, C, D, E);
impl_query_data_tuple!(A, B, C, D, E, F);
impl_query_data_tuple!(A, B, C, D, E, F, G);
impl_query_data_tuple!(A, B, C, D, E, F, G, H);

/// The component data a query fetches, e.g. `Get<(&Position, &mut Velocity)>`
pub struct Get<D>(PhantomData<fn() -> D>);

impl<D: QueryData> QueryData for Get<D> {
    type Fetch = D::Fetch;
    type Item<'a> = D::Item<'a>;

    fn declare(access: &mut QueryAccess) {
        D::declare(access);
    }

    fn fetch(store: &ComponentStore) -> Result<Option<Self::Fetch>, AccessError> {
        D::fetch(store)
    }

    fn item<'a>(fetch: &'a mut Self::Fetch, entity: Entity) -> Option<Self::Item<'a>> {
        D::item(fetch, entity)
    }
}

impl<D: ReadOnlyQueryData> ReadOnlyQueryData for Get<D> {
    fn read<'a>(fetch: &'a Self::Fetch, entity: Entity) -> Option<Self::Item<'a>> {
        D::read(fetch, entity)
    }
}

/// A tuple of component types used by filters
pub trait ComponentList {
    /// Require every listed component
    fn require(access: &mut QueryAccess);

    /// Exclude every listed component
    fn exclude(access: &mut QueryAccess);
}

impl ComponentList for () {
    fn require(_access: &mut QueryAccess) {}

    fn exclude(_access: &mut QueryAccess) {}
}

macro_rules! impl_component_list_tuple {
    ($($C:ident),+) => {
        impl<$($C: Component),+> ComponentList for ($($C,)+) {
            fn require(access: &mut QueryAccess) {
                $(access.with::<$C>();)+
            }

            fn exclude(access: &mut QueryAccess) {
                $(access.without::<$C>();)+
            }
        }
    };
}

impl_component_list_tuple!(A);
impl_component_list_tuple!(A, B);
impl_component_list_tuple!(A, B, C);
impl_component_list_tuple!(A, B, C, D);
impl_component_list_tuple!(A, B, C, D, E);
impl_component_list_tuple!(A, B, C, D, E, F);

/// A restriction on which entities a query visits
pub trait QueryFilter {
    /// Record the filter
    fn declare(access: &mut QueryAccess);
}

/// Only visit entities that have every listed component
pub struct With<L = ()>(PhantomData<fn() -> L>);

impl<L: ComponentList> QueryFilter for With<L> {
    fn declare(access: &mut QueryAccess) {
        L::require(access);
    }
}

/// Skip entities that have any listed component
pub struct Without<L = ()>(PhantomData<fn() -> L>);

impl<L: ComponentList> QueryFilter for Without<L> {
    fn declare(access: &mut QueryAccess) {
        L::exclude(access);
    }
}

/// Iteration over entities matching a component pattern
pub struct Query<G: QueryData, W: QueryFilter = With<()>, N: QueryFilter = Without<()>> {
    fetch: Option<G::Fetch>,
    matches: Vec<Entity>,
    _filters: PhantomData<fn() -> (W, N)>,
}

impl<G: QueryData, W: QueryFilter, N: QueryFilter> Query<G, W, N> {
    /// Describe the access this query type needs
    pub fn access() -> QueryAccess {
        let mut access = QueryAccess::new();
        G::declare(&mut access);
        W::declare(&mut access);
        N::declare(&mut access);
        access
    }

    /// Build a query directly against a world
    ///
    /// The returned handle borrows `world`, so the world cannot change
    /// structurally while the query holds its columns:
    ///
    /// ```compile_fail
    /// use ecs_scheduler::ecs::{Component, Get, Query, World};
    ///
    /// struct Position(f32);
    /// impl Component for Position {}
    ///
    /// let mut world = World::new();
    /// let entity = world.spawn((Position(0.0),));
    /// let query = Query::<Get<(&Position,)>>::from_world(&world).unwrap();
    /// world.despawn(entity);
    /// assert_eq!(query.len(), 1);
    /// ```
    pub fn from_world(world: &World) -> Result<WorldQuery<'_, G, W, N>, AccessError> {
        let access = Self::access();
        SystemAccess::new().add_query(&access)?;
        Ok(WorldQuery {
            query: Self::fetch_with(&access, world)?,
            _world: PhantomData,
        })
    }

    pub(crate) fn fetch_with(access: &QueryAccess, world: &World) -> Result<Self, AccessError> {
        let fetch = G::fetch(world.components())?;
        let matches = if fetch.is_some() {
            matching_entities(access, world)
        } else {
            Vec::new()
        };
        Ok(Query {
            fetch,
            matches,
            _filters: PhantomData,
        })
    }

    /// Number of matching entities
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// Whether no entity matches
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Matching entities in ascending order
    pub fn entities(&self) -> &[Entity] {
        &self.matches
    }

    /// Whether `entity` matches the query
    pub fn contains(&self, entity: Entity) -> bool {
        self.matches.binary_search(&entity).is_ok()
    }

    /// The item of one matching entity
    pub fn get(&mut self, entity: Entity) -> Option<G::Item<'_>> {
        if !self.contains(entity) {
            return None;
        }
        G::item(self.fetch.as_mut()?, entity)
    }

    /// Visit every matching entity
    pub fn for_each<F>(&mut self, mut f: F)
    where
        F: FnMut(Entity, G::Item<'_>),
    {
        let Some(fetch) = self.fetch.as_mut() else {
            return;
        };
        for &entity in &self.matches {
            if let Some(item) = G::item(fetch, entity) {
                f(entity, item);
            }
        }
    }
}

impl<G: ReadOnlyQueryData, W: QueryFilter, N: QueryFilter> Query<G, W, N> {
    /// Iterate over matching entities through shared borrows
    pub fn iter(&self) -> impl Iterator<Item = (Entity, G::Item<'_>)> + '_ {
        let fetch = self.fetch.as_ref();
        self.matches.iter().filter_map(move |&entity| {
            let item = G::read(fetch?, entity)?;
            Some((entity, item))
        })
    }
}

fn matching_entities(access: &QueryAccess, world: &World) -> Vec<Entity> {
    let store = world.components();
    let mut required: Vec<&BTreeSet<Entity>> = Vec::new();
    for type_id in access.required() {
        match store.members(type_id) {
            Some(members) => required.push(members),
            None => return Vec::new(),
        }
    }

    let candidates: Vec<Entity> = match required.iter().min_by_key(|members| members.len()) {
        Some(smallest) => smallest
            .iter()
            .copied()
            .filter(|entity| required.iter().all(|members| members.contains(entity)))
            .collect(),
        None => world.entities(),
    };

    candidates
        .into_iter()
        .filter(|entity| access.excluded().all(|type_id| !store.contains_type(type_id, *entity)))
        .collect()
}

/// A [`Query`] built by [`Query::from_world`], tied to the borrowed world
///
/// Dereferences to the query itself.
pub struct WorldQuery<'w, G: QueryData, W: QueryFilter = With<()>, N: QueryFilter = Without<()>> {
    query: Query<G, W, N>,
    _world: PhantomData<&'w World>,
}

impl<G: QueryData, W: QueryFilter, N: QueryFilter> Deref for WorldQuery<'_, G, W, N> {
    type Target = Query<G, W, N>;

    fn deref(&self) -> &Self::Target {
        &self.query
    }
}

impl<G: QueryData, W: QueryFilter, N: QueryFilter> DerefMut for WorldQuery<'_, G, W, N> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.query
    }
}
