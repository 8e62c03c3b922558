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
//! Deferred structural mutation
//!
//! Systems never change the world's structure while they run. Instead they
//! record spawns, component inserts, despawns and resource insertions in a
//! [`CommandQueue`] through the [`Command`] parameter. The executor merges
//! the queues of a stage and applies them with [`World::flush`] once every
//! system of the stage has finished.
//!
//! A flush applies, in order:
//!
//! 1. spawns (reserved entities become alive with their bundle),
//! 2. component inserts and parent/child links,
//! 3. recursive despawns,
//! 4. plain despawns,
//! 5. resource insertions, in submission order.
//!
//! Despawns are kept in sets, so marking the same entity twice, or marking
//! it both plainly and recursively, destroys it exactly once.

use crate::ecs::{Bundle, Component, ComponentStore, Entity, EntityAllocator, Resource, ResourceTable, World};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

type ComponentWrite = Box<dyn FnOnce(&mut ComponentStore, Entity) + Send>;
type ResourceWrite = Box<dyn FnOnce(&mut ResourceTable) + Send>;

struct PendingWrite {
    entity: Entity,
    write: ComponentWrite,
}

/// Counters describing what a flush changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Entities made alive
    pub spawned: usize,
    /// Component inserts and links applied to live entities
    pub inserted: usize,
    /// Entities destroyed
    pub despawned: usize,
    /// Resources inserted
    pub resources: usize,
}

/// Append-only log of deferred world mutations
#[derive(Default)]
pub struct CommandQueue {
    spawns: Vec<PendingWrite>,
    inserts: Vec<PendingWrite>,
    links: Vec<(Entity, Entity)>,
    despawn_recursive: BTreeSet<Entity>,
    despawn: BTreeSet<Entity>,
    resources: Vec<ResourceWrite>,
}

impl CommandQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a bundle for a reserved entity
    pub fn push_spawn<B: Bundle>(&mut self, entity: Entity, bundle: B) {
        self.spawns.push(PendingWrite {
            entity,
            write: Box::new(move |store, entity| bundle.insert_into(store, entity)),
        });
    }

    /// Queue a component insert
    pub fn push_insert<C: Component>(&mut self, entity: Entity, component: C) {
        self.inserts.push(PendingWrite {
            entity,
            write: Box::new(move |store, entity| store.insert(entity, component)),
        });
    }

    /// Queue a parent/child link
    pub fn push_link(&mut self, parent: Entity, child: Entity) {
        self.links.push((parent, child));
    }

    /// Mark an entity for destruction
    pub fn push_despawn(&mut self, entity: Entity) {
        self.despawn.insert(entity);
    }

    /// Mark an entity and everything below it for destruction
    pub fn push_despawn_recursive(&mut self, entity: Entity) {
        self.despawn_recursive.insert(entity);
    }

    /// Queue a resource insertion
    pub fn push_resource<R: Resource>(&mut self, value: R) {
        self.resources.push(Box::new(move |table| {
            table.insert(value);
        }));
    }

    /// Move every command of `other` to the end of this queue
    pub fn append(&mut self, other: &mut CommandQueue) {
        self.spawns.append(&mut other.spawns);
        self.inserts.append(&mut other.inserts);
        self.links.append(&mut other.links);
        self.despawn_recursive.append(&mut other.despawn_recursive);
        self.despawn.append(&mut other.despawn);
        self.resources.append(&mut other.resources);
    }

    /// Number of queued commands
    pub fn len(&self) -> usize {
        self.spawns.len()
            + self.inserts.len()
            + self.links.len()
            + self.despawn_recursive.len()
            + self.despawn.len()
            + self.resources.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entities reserved by queued spawns
    pub fn reserved(&self) -> impl Iterator<Item = Entity> + '_ {
        self.spawns.iter().map(|spawn| spawn.entity)
    }

    /// Drop every queued command, handing reservations back to the allocator
    ///
    /// Returns the number of commands dropped.
    pub fn discard(&mut self, allocator: &mut EntityAllocator) -> usize {
        let dropped = self.len();
        for spawn in self.spawns.drain(..) {
            allocator.release(spawn.entity);
        }
        *self = CommandQueue::default();
        dropped
    }

    /// Apply every queued command to the world
    pub fn apply(self, world: &mut World) -> FlushStats {
        let mut stats = FlushStats::default();

        for spawn in self.spawns {
            if world.materialize(spawn.entity) {
                (spawn.write)(world.components_mut(), spawn.entity);
                stats.spawned += 1;
            }
        }

        for insert in self.inserts {
            if world.is_alive(insert.entity) {
                (insert.write)(world.components_mut(), insert.entity);
                stats.inserted += 1;
            }
        }
        for (parent, child) in self.links {
            if world.add_child(parent, child) {
                stats.inserted += 1;
            }
        }

        for entity in &self.despawn_recursive {
            stats.despawned += world.despawn_recursive(*entity);
        }
        for entity in &self.despawn {
            if world.despawn(*entity) {
                stats.despawned += 1;
            }
        }

        for write in self.resources {
            write(world.resources_mut());
            stats.resources += 1;
        }

        stats
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("spawns", &self.spawns.len())
            .field("inserts", &self.inserts.len())
            .field("links", &self.links.len())
            .field("despawn_recursive", &self.despawn_recursive)
            .field("despawn", &self.despawn)
            .field("resources", &self.resources.len())
            .finish()
    }
}

/// Deferred mutation handle given to systems
///
/// Every registered system owns its own queue; commands become visible only
/// after the stage the system runs in has been flushed.
pub struct Command {
    queue: Arc<Mutex<CommandQueue>>,
    entities: Arc<Mutex<EntityAllocator>>,
}

impl Command {
    pub(crate) fn new(queue: Arc<Mutex<CommandQueue>>, entities: Arc<Mutex<EntityAllocator>>) -> Self {
        Command { queue, entities }
    }

    /// Spawn an entity with a bundle of components
    ///
    /// The handle is usable immediately for further commands; the entity
    /// itself becomes visible at the next flush.
    pub fn spawn<B: Bundle>(&self, bundle: B) -> EntityCommand<'_> {
        let entity = self.entities.lock().reserve();
        self.queue.lock().push_spawn(entity, bundle);
        EntityCommand { commands: self, entity }
    }

    /// Spawn an entity without components
    pub fn spawn_empty(&self) -> EntityCommand<'_> {
        self.spawn(())
    }

    /// Target an existing entity
    pub fn entity(&self, entity: Entity) -> EntityCommand<'_> {
        EntityCommand { commands: self, entity }
    }

    /// Insert or replace a resource at the next flush
    pub fn insert_resource<R: Resource>(&self, value: R) {
        self.queue.lock().push_resource(value);
    }
}

/// Commands targeting a single entity
pub struct EntityCommand<'c> {
    commands: &'c Command,
    entity: Entity,
}

impl<'c> EntityCommand<'c> {
    /// The targeted entity
    pub fn id(&self) -> Entity {
        self.entity
    }

    /// Attach a component at the next flush
    pub fn insert<C: Component>(self, component: C) -> Self {
        self.commands.queue.lock().push_insert(self.entity, component);
        self
    }

    /// Make `child` a child of this entity at the next flush
    pub fn add_child(self, child: Entity) -> Self {
        self.commands.queue.lock().push_link(self.entity, child);
        self
    }

    /// Destroy the entity at the next flush
    pub fn despawn(self) {
        self.commands.queue.lock().push_despawn(self.entity);
    }

    /// Destroy the entity and all of its descendants at the next flush
    pub fn despawn_recurse(self) {
        self.commands.queue.lock().push_despawn_recursive(self.entity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::Children;

    #[derive(Debug, Clone, PartialEq)]
    struct Tag(u32);
    impl Component for Tag {}

    fn command_for(world: &World) -> (Command, Arc<Mutex<CommandQueue>>) {
        let queue = Arc::new(Mutex::new(CommandQueue::new()));
        let command = Command::new(queue.clone(), world.entity_allocator().clone());
        (command, queue)
    }

    fn take(queue: &Arc<Mutex<CommandQueue>>) -> CommandQueue {
        std::mem::take(&mut *queue.lock())
    }

    #[test]
    fn test_spawn_visible_after_flush() {
        let mut world = World::new();
        let (command, queue) = command_for(&world);

        let entity = command.spawn((Tag(7),)).id();
        assert!(!world.is_alive(entity));

        let stats = world.flush(take(&queue));
        assert_eq!(stats.spawned, 1);
        assert!(world.is_alive(entity));
        assert_eq!(*world.get::<Tag>(entity).unwrap(), Tag(7));
    }

    #[test]
    fn test_double_despawn_destroys_once() {
        let mut world = World::new();
        let entity = world.spawn((Tag(1),));
        let (command, queue) = command_for(&world);

        command.entity(entity).despawn();
        command.entity(entity).despawn();
        command.entity(entity).despawn_recurse();

        let stats = world.flush(take(&queue));
        assert_eq!(stats.despawned, 1);
        assert!(!world.is_alive(entity));
    }

    #[test]
    fn test_despawn_of_dead_entity_is_noop() {
        let mut world = World::new();
        let entity = world.spawn(());
        world.despawn(entity);
        let (command, queue) = command_for(&world);

        command.entity(entity).despawn();
        let stats = world.flush(take(&queue));
        assert_eq!(stats.despawned, 0);
    }

    #[test]
    fn test_spawn_then_despawn_same_flush() {
        let mut world = World::new();
        let (command, queue) = command_for(&world);

        let entity = command.spawn_empty().id();
        command.entity(entity).despawn();
        world.flush(take(&queue));

        assert!(!world.is_alive(entity));
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn test_insert_and_link_before_despawn() {
        let mut world = World::new();
        let (command, queue) = command_for(&world);

        let parent = command.spawn_empty().id();
        let child = command.spawn((Tag(2),)).id();
        command.entity(parent).insert(Tag(1)).add_child(child);
        world.flush(take(&queue));

        assert_eq!(world.children(parent), vec![child]);
        assert_eq!(*world.get::<Tag>(parent).unwrap(), Tag(1));
        assert!(world.get::<Children>(child).is_none());
    }

    #[test]
    fn test_resource_last_insert_wins() {
        let mut world = World::new();
        let (command, queue) = command_for(&world);

        command.insert_resource(1u64);
        command.insert_resource(2u64);
        let stats = world.flush(take(&queue));

        assert_eq!(stats.resources, 2);
        assert_eq!(*world.resource::<u64>().unwrap(), 2);
    }

    #[test]
    fn test_discard_releases_reservations() {
        let world = World::new();
        let (command, queue) = command_for(&world);
        let reserved = command.spawn_empty().id();
        command.insert_resource(5u8);

        let mut pending = take(&queue);
        assert_eq!(pending.reserved().collect::<Vec<_>>(), vec![reserved]);
        assert_eq!(pending.discard(&mut world.entity_allocator().lock()), 2);
        assert!(pending.is_empty());
        assert!(!world.entity_allocator().lock().is_reserved(reserved));
    }

    #[test]
    fn test_append_preserves_submission_order() {
        let mut world = World::new();
        let mut first = CommandQueue::new();
        let mut second = CommandQueue::new();
        first.push_resource(String::from("first"));
        second.push_resource(String::from("second"));

        first.append(&mut second);
        assert!(second.is_empty());
        world.flush(first);
        assert_eq!(world.resource::<String>().unwrap().as_str(), "second");
    }
}
