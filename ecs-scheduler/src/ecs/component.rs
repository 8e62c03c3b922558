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
//! Component storage and management
//!
//! Components are data containers that can be attached to entities. Each
//! component type lives in its own [`DenseStorage`] column behind a shared
//! lock so that systems running concurrently can borrow disjoint columns.
//! The set of entities owning a component (its *membership*) is tracked
//! outside the lock: it only changes on exclusive world access, which lets
//! queries evaluate `With`/`Without` filters without borrowing data.
//!
//! Structural changes never wait on a column lock. Inserting or removing a
//! component while a borrow of its column is still alive (a guard obtained
//! through [`ComponentStore::storage`], for instance) panics instead of
//! blocking the thread forever.

use crate::ecs::Entity;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::any::{type_name, Any, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Trait that all components must implement
///
/// Components should be plain data structures without behavior.
pub trait Component: 'static + Send + Sync {}

/// Storage interface for components
pub trait ComponentStorage: Send + Sync {
    /// The component type this storage manages
    type Component: Component;

    /// Insert a component for the given entity
    fn insert(&mut self, entity: Entity, component: Self::Component);

    /// Remove a component for the given entity
    fn remove(&mut self, entity: Entity) -> Option<Self::Component>;

    /// Get a reference to a component for the given entity
    fn get(&self, entity: Entity) -> Option<&Self::Component>;

    /// Get a mutable reference to a component for the given entity
    fn get_mut(&mut self, entity: Entity) -> Option<&mut Self::Component>;

    /// Check if an entity has this component
    fn contains(&self, entity: Entity) -> bool;

    /// Clear all components
    fn clear(&mut self);
}

/// Dense component storage
///
/// A sparse map from entity to slot index in front of two packed vectors.
/// Removal swaps the last element into the hole, so the dense arrays never
/// contain gaps.
///
/// # Example
///
/// ```
/// use ecs_scheduler::ecs::{Component, ComponentStorage, DenseStorage, Entity};
///
/// struct Health(u32);
/// impl Component for Health {}
///
/// let mut storage = DenseStorage::<Health>::new();
/// let entity = Entity::new(1, 0);
///
/// storage.insert(entity, Health(10));
/// assert!(storage.contains(entity));
/// assert_eq!(storage.get(entity).unwrap().0, 10);
/// ```
pub struct DenseStorage<T: Component> {
    /// Mapping from Entity to dense array index
    entity_to_index: HashMap<Entity, usize>,
    /// Mapping from dense array index back to Entity (for swap_remove)
    index_to_entity: Vec<Entity>,
    components: Vec<T>,
}

impl<T: Component> DenseStorage<T> {
    /// Create a new empty storage
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a new storage with the given capacity
    pub fn with_capacity(capacity: usize) -> Self {
        DenseStorage {
            entity_to_index: HashMap::with_capacity(capacity),
            index_to_entity: Vec::with_capacity(capacity),
            components: Vec::with_capacity(capacity),
        }
    }

    /// Get the number of components stored
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Check if the storage is empty
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Get all entities that have components in this storage
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.index_to_entity.iter().copied()
    }

    /// Iterate over (entity, component) pairs in dense order
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> + '_ {
        self.index_to_entity.iter().copied().zip(self.components.iter())
    }
}

impl<T: Component> Default for DenseStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Component> ComponentStorage for DenseStorage<T> {
    type Component = T;

    fn insert(&mut self, entity: Entity, component: Self::Component) {
        if let Some(&index) = self.entity_to_index.get(&entity) {
            self.components[index] = component;
        } else {
            let new_index = self.components.len();
            self.components.push(component);
            self.entity_to_index.insert(entity, new_index);
            self.index_to_entity.push(entity);

            debug_assert_eq!(self.entity_to_index.len(), self.index_to_entity.len());
            debug_assert_eq!(self.entity_to_index.len(), self.components.len());
        }
    }

    fn remove(&mut self, entity: Entity) -> Option<Self::Component> {
        let index = self.entity_to_index.remove(&entity)?;
        let component = self.components.swap_remove(index);
        self.index_to_entity.swap_remove(index);

        // The former last element now sits at `index`
        if let Some(&moved) = self.index_to_entity.get(index) {
            self.entity_to_index.insert(moved, index);
        }

        debug_assert_eq!(self.entity_to_index.len(), self.index_to_entity.len());
        debug_assert_eq!(self.entity_to_index.len(), self.components.len());

        Some(component)
    }

    fn get(&self, entity: Entity) -> Option<&Self::Component> {
        let index = self.entity_to_index.get(&entity)?;
        Some(&self.components[*index])
    }

    fn get_mut(&mut self, entity: Entity) -> Option<&mut Self::Component> {
        let index = self.entity_to_index.get(&entity)?;
        Some(&mut self.components[*index])
    }

    fn contains(&self, entity: Entity) -> bool {
        self.entity_to_index.contains_key(&entity)
    }

    fn clear(&mut self) {
        self.entity_to_index.clear();
        self.index_to_entity.clear();
        self.components.clear();
    }
}

/// A component column shared between the store and outstanding query borrows
pub type SharedStorage<T> = Arc<RwLock<DenseStorage<T>>>;

fn lock_for_change<T: Component>(storage: &SharedStorage<T>) -> RwLockWriteGuard<'_, DenseStorage<T>> {
    match storage.try_write() {
        Some(guard) => guard,
        None => panic!(
            "component `{}` changed structurally while its column is still borrowed",
            type_name::<T>()
        ),
    }
}

trait ErasedColumn: Send + Sync {
    fn remove_entity(&self, entity: Entity) -> bool;

    fn as_any(&self) -> &dyn Any;
}

impl<T: Component> ErasedColumn for SharedStorage<T> {
    fn remove_entity(&self, entity: Entity) -> bool {
        lock_for_change(self).remove(entity).is_some()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Column {
    name: &'static str,
    members: BTreeSet<Entity>,
    storage: Box<dyn ErasedColumn>,
}

/// Type-erased collection of component columns
///
/// Structural changes (insert/remove) take `&mut self`; borrowing component
/// data only needs `&self` plus the column's lock.
#[derive(Default)]
pub struct ComponentStore {
    columns: HashMap<TypeId, Column>,
}

impl ComponentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach (or replace) a component on an entity
    ///
    /// # Panics
    ///
    /// Panics if the column of `T` is borrowed.
    pub fn insert<T: Component>(&mut self, entity: Entity, component: T) {
        let column = self.columns.entry(TypeId::of::<T>()).or_insert_with(|| Column {
            name: std::any::type_name::<T>(),
            members: BTreeSet::new(),
            storage: Box::new(SharedStorage::<T>::default()),
        });
        column.members.insert(entity);

        if let Some(storage) = column.storage.as_any().downcast_ref::<SharedStorage<T>>() {
            lock_for_change(storage).insert(entity, component);
        }
    }

    /// Detach a component from an entity
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Option<T> {
        let column = self.columns.get_mut(&TypeId::of::<T>())?;
        if !column.members.remove(&entity) {
            return None;
        }
        let storage = column.storage.as_any().downcast_ref::<SharedStorage<T>>()?;
        lock_for_change(storage).remove(entity)
    }

    /// Drop every component attached to an entity
    ///
    /// Returns the number of components removed. Panics if one of the
    /// entity's columns is borrowed.
    pub fn remove_entity(&mut self, entity: Entity) -> usize {
        let mut removed = 0;
        for column in self.columns.values_mut() {
            if column.members.remove(&entity) && column.storage.remove_entity(entity) {
                removed += 1;
            }
        }
        removed
    }

    /// Check whether an entity has a component of type `T`
    pub fn contains<T: Component>(&self, entity: Entity) -> bool {
        self.contains_type(TypeId::of::<T>(), entity)
    }

    /// Number of entities carrying a component of type `T`
    pub fn count<T: Component>(&self) -> usize {
        self.members(TypeId::of::<T>()).map(BTreeSet::len).unwrap_or(0)
    }

    /// Shared handle to the column storing `T`, if any entity ever had one
    pub fn storage<T: Component>(&self) -> Option<&SharedStorage<T>> {
        self.columns
            .get(&TypeId::of::<T>())?
            .storage
            .as_any()
            .downcast_ref::<SharedStorage<T>>()
    }

    /// Names of all component types with a column, sorted
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.columns.values().map(|c| c.name).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn contains_type(&self, type_id: TypeId, entity: Entity) -> bool {
        self.members(type_id)
            .map(|members| members.contains(&entity))
            .unwrap_or(false)
    }

    pub(crate) fn members(&self, type_id: TypeId) -> Option<&BTreeSet<Entity>> {
        self.columns.get(&type_id).map(|column| &column.members)
    }
}

/// A group of components inserted together on spawn
pub trait Bundle: Send + 'static {
    /// Move every component of the bundle onto `entity`
    fn insert_into(self, store: &mut ComponentStore, entity: Entity);
}

impl Bundle for () {
    fn insert_into(self, _store: &mut ComponentStore, _entity: Entity) {}
}

macro_rules! impl_bundle_tuple {
    ($($C:ident),+) => {
        impl<$($C: Component),+> Bundle for ($($C,)+) {
            #[allow(non_snake_case)]
            fn insert_into(self, store: &mut ComponentStore, entity: Entity) {
                let ($($C,)+) = self;
                $(store.insert(entity, $C);)+
            }
        }
    };
}

impl_bundle_tuple!(A);
impl_bundle_tuple!(A, B);
impl_bundle_tuple!(A, B, C);
impl_bundle_tuple!(A, B, C, D);
impl_bundle_tuple!(A, B, C, D, E);
impl_bundle_tuple!(A, B, C, D, E, F);
impl_bundle_tuple!(A, B, C, D, E, F, G);
impl_bundle_tuple!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Health(u32);
    impl Component for Health {}

    #[derive(Debug, Clone, PartialEq)]
    struct Name(&'static str);
    impl Component for Name {}

    #[test]
    fn test_dense_storage_swap_remove_keeps_index() {
        let mut storage = DenseStorage::<Health>::new();
        let e0 = Entity::new(0, 0);
        let e1 = Entity::new(1, 0);
        let e2 = Entity::new(2, 0);
        storage.insert(e0, Health(10));
        storage.insert(e1, Health(20));
        storage.insert(e2, Health(30));

        assert_eq!(storage.remove(e0), Some(Health(10)));
        assert_eq!(storage.len(), 2);
        assert_eq!(storage.get(e2), Some(&Health(30)));
        assert_eq!(storage.get(e1), Some(&Health(20)));
        assert!(!storage.contains(e0));
    }

    #[test]
    fn test_dense_storage_insert_replaces() {
        let mut storage = DenseStorage::<Health>::new();
        let entity = Entity::new(3, 1);
        storage.insert(entity, Health(1));
        storage.insert(entity, Health(2));
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get(entity), Some(&Health(2)));
    }

    #[test]
    fn test_store_membership_tracks_inserts() {
        let mut store = ComponentStore::new();
        let entity = Entity::new(0, 0);
        store.insert(entity, Health(5));

        assert!(store.contains::<Health>(entity));
        assert!(!store.contains::<Name>(entity));
        assert_eq!(store.count::<Health>(), 1);

        assert_eq!(store.remove::<Health>(entity), Some(Health(5)));
        assert!(!store.contains::<Health>(entity));
        assert_eq!(store.remove::<Health>(entity), None);
    }

    #[test]
    fn test_store_remove_entity_drops_all_components() {
        let mut store = ComponentStore::new();
        let entity = Entity::new(0, 0);
        let other = Entity::new(1, 0);
        (Health(1), Name("a")).insert_into(&mut store, entity);
        store.insert(other, Health(2));

        assert_eq!(store.remove_entity(entity), 2);
        assert_eq!(store.remove_entity(entity), 0);
        assert!(store.contains::<Health>(other));
        let storage = store.storage::<Health>().unwrap();
        assert_eq!(storage.read().len(), 1);
    }

    #[test]
    #[should_panic(expected = "still borrowed")]
    fn test_structural_change_on_borrowed_column_panics() {
        let mut store = ComponentStore::new();
        let entity = Entity::new(0, 0);
        store.insert(entity, Health(5));

        let column = store.storage::<Health>().unwrap().clone();
        let _guard = column.read_arc();
        store.remove_entity(entity);
    }

    #[test]
    fn test_structural_change_after_borrow_released() {
        let mut store = ComponentStore::new();
        let entity = Entity::new(0, 0);
        store.insert(entity, Health(5));

        let column = store.storage::<Health>().unwrap().clone();
        drop(column.read_arc());
        assert_eq!(store.remove::<Health>(entity), Some(Health(5)));
    }
}
