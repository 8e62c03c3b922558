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
//! Singleton resources keyed by type
//!
//! Each resource lives in its own shared slot. [`Res`] and [`ResMut`] hold
//! an owning guard on that slot, so replacing a resource in the table only
//! drops the old value once the last outstanding accessor is gone.

use crate::error::AccessError;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Marker for values that can be stored as resources
pub trait Resource: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Resource for T {}

/// A resource slot shared between the table and outstanding accessors
pub type SharedResource<T> = Arc<RwLock<T>>;

struct ResourceSlot {
    name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

/// Mapping from resource type to its single instance
#[derive(Default)]
pub struct ResourceTable {
    slots: HashMap<TypeId, ResourceSlot>,
}

impl ResourceTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a resource, replacing any previous instance of the same type
    ///
    /// Returns `true` if a previous instance was replaced.
    pub fn insert<T: Resource>(&mut self, value: T) -> bool {
        let slot = ResourceSlot {
            name: type_name::<T>(),
            value: Box::new(SharedResource::new(RwLock::new(value))),
        };
        self.slots.insert(TypeId::of::<T>(), slot).is_some()
    }

    /// Remove the resource of type `T`
    pub fn remove<T: Resource>(&mut self) -> bool {
        self.slots.remove(&TypeId::of::<T>()).is_some()
    }

    /// Check whether a resource of type `T` is present
    pub fn contains<T: Resource>(&self) -> bool {
        self.slots.contains_key(&TypeId::of::<T>())
    }

    /// Number of resources
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the table holds no resources
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Names of the stored resource types, sorted
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.slots.values().map(|slot| slot.name).collect();
        names.sort_unstable();
        names
    }

    /// The shared slot holding `T`
    pub fn shared<T: Resource>(&self) -> Option<&SharedResource<T>> {
        self.slots
            .get(&TypeId::of::<T>())?
            .value
            .downcast_ref::<SharedResource<T>>()
    }

    /// Borrow `T` for reading
    ///
    /// An absent resource yields an empty [`Res`]; a resource currently
    /// borrowed mutably yields [`AccessError::Contended`].
    pub fn read<T: Resource>(&self) -> Result<Res<T>, AccessError> {
        let guard = match self.shared::<T>() {
            Some(shared) => Some(
                shared
                    .try_read_arc()
                    .ok_or(AccessError::Contended(type_name::<T>()))?,
            ),
            None => None,
        };
        Ok(Res { guard })
    }

    /// Borrow `T` for writing
    pub fn write<T: Resource>(&self) -> Result<ResMut<T>, AccessError> {
        let guard = match self.shared::<T>() {
            Some(shared) => Some(
                shared
                    .try_write_arc()
                    .ok_or(AccessError::Contended(type_name::<T>()))?,
            ),
            None => None,
        };
        Ok(ResMut { guard })
    }
}

impl fmt::Debug for ResourceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTable")
            .field("resources", &self.type_names())
            .finish()
    }
}

/// Read-only access to a resource
///
/// Dereferencing an empty `Res` panics; use [`Res::get`] or
/// [`Res::is_empty`] when the resource may be absent.
pub struct Res<T: Resource> {
    guard: Option<ArcRwLockReadGuard<RawRwLock, T>>,
}

impl<T: Resource> Res<T> {
    /// The resource value, if present
    pub fn get(&self) -> Option<&T> {
        self.guard.as_deref()
    }

    /// Whether the resource was absent when this accessor was created
    pub fn is_empty(&self) -> bool {
        self.guard.is_none()
    }
}

impl<T: Resource> Deref for Res<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.guard.as_deref() {
            Some(value) => value,
            None => panic!("resource `{}` is not present", type_name::<T>()),
        }
    }
}

impl<T: Resource + fmt::Debug> fmt::Debug for Res<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Res").field(&self.get()).finish()
    }
}

/// Exclusive write access to a resource
pub struct ResMut<T: Resource> {
    guard: Option<ArcRwLockWriteGuard<RawRwLock, T>>,
}

impl<T: Resource> ResMut<T> {
    /// The resource value, if present
    pub fn get(&self) -> Option<&T> {
        self.guard.as_deref()
    }

    /// Mutable access to the resource value, if present
    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.guard.as_deref_mut()
    }

    /// Whether the resource was absent when this accessor was created
    pub fn is_empty(&self) -> bool {
        self.guard.is_none()
    }
}

impl<T: Resource> Deref for ResMut<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.guard.as_deref() {
            Some(value) => value,
            None => panic!("resource `{}` is not present", type_name::<T>()),
        }
    }
}

impl<T: Resource> DerefMut for ResMut<T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.guard.as_deref_mut() {
            Some(value) => value,
            None => panic!("resource `{}` is not present", type_name::<T>()),
        }
    }
}

impl<T: Resource + fmt::Debug> fmt::Debug for ResMut<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResMut").field(&self.get()).finish()
    }
}
