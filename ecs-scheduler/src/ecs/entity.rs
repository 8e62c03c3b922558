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
//! Entity management
//!
//! Entities are generational handles: an index into the allocator's slot
//! table plus the generation the slot had when the handle was issued. A slot
//! is only handed out again after its generation has been bumped, so a stale
//! handle never observes a newer entity.

use std::collections::VecDeque;
use std::fmt;

/// Index part of an entity handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(u64);

impl EntityId {
    /// Create a new EntityId from a raw u64 value
    pub fn new(id: u64) -> Self {
        EntityId(id)
    }

    /// Get the raw u64 value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

/// Entity handle with generational index support for safe references
///
/// Equality, ordering and hashing use the full (index, generation) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity {
    id: EntityId,
    generation: u32,
}

impl Entity {
    /// Create a new entity with the given ID and generation
    pub fn new(id: u64, generation: u32) -> Self {
        Entity {
            id: EntityId::new(id),
            generation,
        }
    }

    /// Get the entity ID
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Get the generation number
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}, gen: {})", self.id.0, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Reserved,
    Alive,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    state: SlotState,
}

/// Allocator handing out entity handles
///
/// Handles go through up to three states: reserved (issued by a command
/// buffer, not yet visible to queries), alive, and free. Freed slots are
/// recycled in FIFO order after their generation is bumped.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    slots: Vec<Slot>,
    free: VecDeque<u64>,
    alive: usize,
}

impl EntityAllocator {
    /// Create an empty allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a handle without making it alive
    pub fn reserve(&mut self) -> Entity {
        if let Some(index) = self.free.pop_front() {
            let slot = &mut self.slots[index as usize];
            slot.state = SlotState::Reserved;
            return Entity::new(index, slot.generation);
        }

        let index = self.slots.len() as u64;
        self.slots.push(Slot {
            generation: 0,
            state: SlotState::Reserved,
        });
        Entity::new(index, 0)
    }

    /// Turn a reserved handle into a live entity
    ///
    /// Returns `false` if the handle is not currently reserved.
    pub fn materialize(&mut self, entity: Entity) -> bool {
        match self.slot_mut(entity) {
            Some(slot) if slot.state == SlotState::Reserved => {
                slot.state = SlotState::Alive;
                self.alive += 1;
                true
            }
            _ => false,
        }
    }

    /// Allocate a live entity immediately
    pub fn alloc(&mut self) -> Entity {
        let entity = self.reserve();
        self.materialize(entity);
        entity
    }

    /// Free a live entity
    ///
    /// Freeing an entity that is not alive is a no-op and returns `false`.
    pub fn free(&mut self, entity: Entity) -> bool {
        match self.slot_mut(entity) {
            Some(slot) if slot.state == SlotState::Alive => {
                self.alive -= 1;
                self.retire(entity);
                true
            }
            _ => false,
        }
    }

    /// Give back a reservation that will never be materialized
    pub fn release(&mut self, entity: Entity) -> bool {
        match self.slot_mut(entity) {
            Some(slot) if slot.state == SlotState::Reserved => {
                self.retire(entity);
                true
            }
            _ => false,
        }
    }

    /// Check whether the handle refers to a live entity
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.slots
            .get(entity.id().raw() as usize)
            .map(|slot| slot.generation == entity.generation() && slot.state == SlotState::Alive)
            .unwrap_or(false)
    }

    /// Check whether the handle is reserved but not yet alive
    pub fn is_reserved(&self, entity: Entity) -> bool {
        self.slots
            .get(entity.id().raw() as usize)
            .map(|slot| slot.generation == entity.generation() && slot.state == SlotState::Reserved)
            .unwrap_or(false)
    }

    /// Number of live entities
    pub fn alive_count(&self) -> usize {
        self.alive
    }

    /// Snapshot of all live entities in ascending order
    pub fn alive_entities(&self) -> Vec<Entity> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state == SlotState::Alive)
            .map(|(index, slot)| Entity::new(index as u64, slot.generation))
            .collect()
    }

    fn slot_mut(&mut self, entity: Entity) -> Option<&mut Slot> {
        self.slots
            .get_mut(entity.id().raw() as usize)
            .filter(|slot| slot.generation == entity.generation())
    }

    // A slot whose generation cannot be bumped again is never recycled.
    fn retire(&mut self, entity: Entity) {
        let index = entity.id().raw();
        let slot = &mut self.slots[index as usize];
        slot.state = SlotState::Free;
        if let Some(next) = slot.generation.checked_add(1) {
            slot.generation = next;
            self.free.push_back(index);
        }
    }
}
