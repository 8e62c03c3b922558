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
//! Parent/child relationships
//!
//! [`Children`] lists the entities an entity owns; it is what recursive
//! despawn walks. [`Parent`] points back so a despawned subtree can be
//! detached from the entity above it.

use crate::ecs::{Component, Entity};

/// Marks an entity as a child of another entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parent(pub Entity);

impl Component for Parent {}

/// The entities owned by a parent, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Children(Vec<Entity>);

impl Component for Children {}

impl Children {
    /// Create an empty child list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a child, ignoring duplicates
    pub fn push(&mut self, child: Entity) {
        if !self.0.contains(&child) {
            self.0.push(child);
        }
    }

    /// Remove a child if present
    pub fn remove(&mut self, child: Entity) -> bool {
        let before = self.0.len();
        self.0.retain(|&c| c != child);
        self.0.len() != before
    }

    /// Iterate over the children
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.0.iter().copied()
    }

    /// Number of children
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The children as a slice
    pub fn as_slice(&self) -> &[Entity] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_dedup() {
        let mut children = Children::new();
        let child = Entity::new(4, 0);
        children.push(child);
        children.push(child);
        assert_eq!(children.len(), 1);
        assert!(children.remove(child));
        assert!(!children.remove(child));
        assert!(children.is_empty());
    }
}
