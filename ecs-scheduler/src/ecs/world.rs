//! World management
//!
//! The World is the central container for all ECS data: the entity
//! allocator, the component store and the resource table. Systems see it
//! through `&World` and can only borrow data; structural changes require
//! `&mut World` and happen when the executor flushes command queues.

use crate::ecs::{
    Bundle, Children, CommandQueue, Component, ComponentStorage, ComponentStore, Entity,
    EntityAllocator, FlushStats, Parent, Res, ResMut, Resource, ResourceTable,
};
use crate::error::AccessError;
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashSet;
use std::sync::Arc;

/// The main ECS world container
///
/// World manages entity lifecycles and serves as the central
/// access point for all ECS operations.
#[derive(Default)]
pub struct World {
    entities: Arc<Mutex<EntityAllocator>>,
    components: ComponentStore,
    resources: ResourceTable,
}

impl World {
    /// Create a new empty world
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entity carrying `bundle`
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Entity {
        let entity = self.entities.lock().alloc();
        bundle.insert_into(&mut self.components, entity);
        entity
    }

    /// Create an entity without components
    pub fn spawn_empty(&mut self) -> Entity {
        self.spawn(())
    }

    /// Attach (or replace) a component on a live entity
    pub fn insert<C: Component>(&mut self, entity: Entity, component: C) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        self.components.insert(entity, component);
        true
    }

    /// Detach a component from an entity
    pub fn remove<C: Component>(&mut self, entity: Entity) -> Option<C> {
        self.components.remove(entity)
    }

    /// Borrow a component of an entity
    ///
    /// Returns `None` if the entity has no such component or the column is
    /// exclusively borrowed by a running system.
    pub fn get<C: Component>(&self, entity: Entity) -> Option<MappedRwLockReadGuard<'_, C>> {
        let guard = self.components.storage::<C>()?.try_read()?;
        RwLockReadGuard::try_map(guard, |storage| storage.get(entity)).ok()
    }

    /// Mutably borrow a component of an entity
    pub fn get_mut<C: Component>(&mut self, entity: Entity) -> Option<MappedRwLockWriteGuard<'_, C>> {
        let guard = self.components.storage::<C>()?.try_write()?;
        RwLockWriteGuard::try_map(guard, |storage| storage.get_mut(entity)).ok()
    }

    /// Check whether an entity has a component of type `C`
    pub fn has<C: Component>(&self, entity: Entity) -> bool {
        self.components.contains::<C>(entity)
    }

    /// Destroy an entity and drop its components
    ///
    /// The entity is detached from its parent; its children stay alive and
    /// lose their [`Parent`]. Destroying an entity that is not alive is a
    /// no-op returning `false`.
    ///
    /// # Panics
    ///
    /// Panics if one of the entity's component columns is still borrowed,
    /// for instance by a query fetched through [`SystemParam::fetch`]
    /// that outlived its system run.
    ///
    /// [`SystemParam::fetch`]: crate::ecs::SystemParam::fetch
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        self.detach_from_parent(entity);
        for child in self.children(entity) {
            self.components.remove::<Parent>(child);
        }
        self.destroy(entity)
    }

    /// Destroy an entity and every entity reachable through [`Children`]
    ///
    /// Children are destroyed before their parents. An entity without a
    /// `Children` component is given an empty one first. Returns the number
    /// of entities destroyed; entities already gone are skipped.
    pub fn despawn_recursive(&mut self, root: Entity) -> usize {
        if !self.is_alive(root) {
            return 0;
        }
        self.detach_from_parent(root);

        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![(root, false)];
        while let Some((entity, expanded)) = stack.pop() {
            if expanded {
                order.push(entity);
                continue;
            }
            if !visited.insert(entity) || !self.is_alive(entity) {
                continue;
            }
            if !self.components.contains::<Children>(entity) {
                self.components.insert(entity, Children::new());
            }
            stack.push((entity, true));
            for child in self.children(entity).into_iter().rev() {
                stack.push((child, false));
            }
        }

        order.into_iter().filter(|entity| self.destroy(*entity)).count()
    }

    /// Make `child` a child of `parent`
    ///
    /// A child already attached elsewhere is moved. Fails if either entity
    /// is dead or the two are the same entity.
    pub fn add_child(&mut self, parent: Entity, child: Entity) -> bool {
        if parent == child || !self.is_alive(parent) || !self.is_alive(child) {
            return false;
        }
        self.detach_from_parent(child);

        if !self.components.contains::<Children>(parent) {
            self.components.insert(parent, Children::new());
        }
        if let Some(mut children) = self.get_mut::<Children>(parent) {
            children.push(child);
        }
        self.components.insert(child, Parent(parent));
        true
    }

    /// The children of an entity, in insertion order
    pub fn children(&self, entity: Entity) -> Vec<Entity> {
        self.get::<Children>(entity)
            .map(|children| children.as_slice().to_vec())
            .unwrap_or_default()
    }

    /// The parent of an entity
    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.get::<Parent>(entity).map(|parent| parent.0)
    }

    /// Check if an entity is alive
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.lock().is_alive(entity)
    }

    /// Get the number of alive entities
    pub fn entity_count(&self) -> usize {
        self.entities.lock().alive_count()
    }

    /// All live entities in ascending order
    pub fn entities(&self) -> Vec<Entity> {
        self.entities.lock().alive_entities()
    }

    /// Insert or replace a resource
    pub fn insert_resource<R: Resource>(&mut self, value: R) -> bool {
        self.resources.insert(value)
    }

    /// Remove a resource
    pub fn remove_resource<R: Resource>(&mut self) -> bool {
        self.resources.remove::<R>()
    }

    /// Check whether a resource is present
    pub fn contains_resource<R: Resource>(&self) -> bool {
        self.resources.contains::<R>()
    }

    /// Borrow a resource for reading
    pub fn resource<R: Resource>(&self) -> Result<Res<R>, AccessError> {
        self.resources.read::<R>()
    }

    /// Borrow a resource for writing
    pub fn resource_mut<R: Resource>(&self) -> Result<ResMut<R>, AccessError> {
        self.resources.write::<R>()
    }

    /// Apply a command queue
    pub fn flush(&mut self, queue: CommandQueue) -> FlushStats {
        queue.apply(self)
    }

    /// The component store
    pub fn components(&self) -> &ComponentStore {
        &self.components
    }

    /// The resource table
    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    pub(crate) fn components_mut(&mut self) -> &mut ComponentStore {
        &mut self.components
    }

    pub(crate) fn resources_mut(&mut self) -> &mut ResourceTable {
        &mut self.resources
    }

    pub(crate) fn entity_allocator(&self) -> &Arc<Mutex<EntityAllocator>> {
        &self.entities
    }

    pub(crate) fn materialize(&mut self, entity: Entity) -> bool {
        self.entities.lock().materialize(entity)
    }

    fn detach_from_parent(&mut self, child: Entity) {
        if let Some(Parent(parent)) = self.components.remove::<Parent>(child) {
            if let Some(mut children) = self.get_mut::<Children>(parent) {
                children.remove(child);
            }
        }
    }

    fn destroy(&mut self, entity: Entity) -> bool {
        if !self.entities.lock().free(entity) {
            return false;
        }
        self.components.remove_entity(entity);
        true
    }
}
