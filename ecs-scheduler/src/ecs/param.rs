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
//! System parameters
//!
//! A system parameter declares its access once, when the system is
//! registered, and is fetched from the world each time the system runs.
//! Every parameter owns what it borrows, so a fetched parameter never
//! holds a reference into the world.

use crate::ecs::{
    Command, CommandQueue, Query, QueryAccess, QueryData, QueryFilter, Res, ResMut, Resource,
    SystemAccess, World,
};
use crate::error::AccessError;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A value a system can take as an argument
pub trait SystemParam: Sized {
    /// State kept by the system between runs
    type State: Send + Sync + 'static;

    /// Declare access and build the initial state
    fn init_state(access: &mut SystemAccess) -> Result<Self::State, AccessError>;

    /// Borrow the parameter for one run
    ///
    /// The result holds column and resource locks and must be dropped
    /// before the world changes structurally.
    fn fetch(state: &mut Self::State, world: &World) -> Result<Self, AccessError>;

    /// Move deferred work produced during the run into `queue`
    fn apply_deferred(_state: &mut Self::State, _queue: &mut CommandQueue) {}
}

impl<T: Resource> SystemParam for Res<T> {
    type State = ();

    fn init_state(access: &mut SystemAccess) -> Result<(), AccessError> {
        access.add_resource_read::<T>()
    }

    fn fetch(_state: &mut (), world: &World) -> Result<Self, AccessError> {
        world.resources().read::<T>()
    }
}

impl<T: Resource> SystemParam for ResMut<T> {
    type State = ();

    fn init_state(access: &mut SystemAccess) -> Result<(), AccessError> {
        access.add_resource_write::<T>()
    }

    fn fetch(_state: &mut (), world: &World) -> Result<Self, AccessError> {
        world.resources().write::<T>()
    }
}

impl<G: QueryData, W: QueryFilter, N: QueryFilter> SystemParam for Query<G, W, N> {
    type State = QueryAccess;

    fn init_state(access: &mut SystemAccess) -> Result<QueryAccess, AccessError> {
        let query = Self::access();
        access.add_query(&query)?;
        Ok(query)
    }

    fn fetch(state: &mut QueryAccess, world: &World) -> Result<Self, AccessError> {
        Self::fetch_with(state, world)
    }
}

impl SystemParam for Command {
    type State = Arc<Mutex<CommandQueue>>;

    fn init_state(access: &mut SystemAccess) -> Result<Self::State, AccessError> {
        access.add_commands();
        Ok(Arc::new(Mutex::new(CommandQueue::new())))
    }

    fn fetch(state: &mut Self::State, world: &World) -> Result<Self, AccessError> {
        Ok(Command::new(state.clone(), world.entity_allocator().clone()))
    }

    fn apply_deferred(state: &mut Self::State, queue: &mut CommandQueue) {
        queue.append(&mut state.lock());
    }
}

/// Private state owned by one registered system
///
/// Two registrations of the same function get independent values. The
/// value is created with `Default` on the system's first run and kept
/// until the system is dropped.
pub struct Local<T: Default + Send + 'static> {
    guard: ArcMutexGuard<RawMutex, T>,
}

impl<T: Default + Send + 'static> Deref for Local<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T: Default + Send + 'static> DerefMut for Local<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: Default + Send + fmt::Debug + 'static> fmt::Debug for Local<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Local").field(&*self.guard).finish()
    }
}

impl<T: Default + Send + 'static> SystemParam for Local<T> {
    type State = Option<Arc<Mutex<T>>>;

    fn init_state(access: &mut SystemAccess) -> Result<Self::State, AccessError> {
        access.add_local();
        Ok(None)
    }

    fn fetch(state: &mut Self::State, _world: &World) -> Result<Self, AccessError> {
        let guard = state
            .get_or_insert_with(|| Arc::new(Mutex::new(T::default())))
            .try_lock_arc()
            .ok_or(AccessError::Contended(std::any::type_name::<T>()))?;
        Ok(Local { guard })
    }
}

macro_rules! impl_system_param_tuple {
    ($($P:ident),*) => {
        impl<$($P: SystemParam),*> SystemParam for ($($P,)*) {
            type State = ($($P::State,)*);

            #[allow(unused_variables, clippy::unused_unit)]
            fn init_state(access: &mut SystemAccess) -> Result<Self::State, AccessError> {
                Ok(($($P::init_state(access)?,)*))
            }

            #[allow(non_snake_case, unused_variables, clippy::unused_unit)]
            fn fetch(state: &mut Self::State, world: &World) -> Result<Self, AccessError> {
                let ($($P,)*) = state;
                Ok(($($P::fetch($P, world)?,)*))
            }

            #[allow(non_snake_case, unused_variables)]
            fn apply_deferred(state: &mut Self::State, queue: &mut CommandQueue) {
                let ($($P,)*) = state;
                $($P::apply_deferred($P, queue);)*
            }
        }
    };
}

impl_system_param_tuple!();
impl_system_param_tuple!(P0);
impl_system_param_tuple!(P0, P1);
impl_system_param_tuple!(P0, P1, P2);
impl_system_param_tuple!(P0, P1, P2, P3);
impl_system_param_tuple!(P0, P1, P2, P3, P4);
impl_system_param_tuple!(P0, P1, P2, P3, P4, P5);
impl_system_param_tuple!(P0, P1, P2, P3, P4, P5, P6);
impl_system_param_tuple!(P0, P1, P2, P3, P4, P5, P6, P7);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{Component, Get};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Score(u32);

    #[derive(Debug)]
    struct Marker;
    impl Component for Marker {}

    #[test]
    fn test_res_and_res_mut_in_one_system_rejected() {
        let mut access = SystemAccess::new();
        let result = <(Res<Score>, ResMut<Score>)>::init_state(&mut access);
        assert!(matches!(result, Err(AccessError::ResourceAliasing(_))));
    }

    #[test]
    fn test_tuple_fetch_reads_resource() {
        let mut world = World::new();
        world.insert_resource(Score(3));
        world.spawn((Marker,));

        let mut access = SystemAccess::new();
        let mut state = <(Res<Score>, Query<Get<(&Marker,)>>)>::init_state(&mut access).unwrap();
        let (score, query) = <(Res<Score>, Query<Get<(&Marker,)>>)>::fetch(&mut state, &world).unwrap();
        assert_eq!(score.0, 3);
        assert_eq!(query.len(), 1);
    }

    #[test]
    fn test_local_persists_between_fetches() {
        let world = World::new();
        let mut access = SystemAccess::new();
        let mut state = Local::<u32>::init_state(&mut access).unwrap();
        assert!(access.has_local());
        assert!(access.is_empty());

        for _ in 0..3 {
            let mut local = Local::<u32>::fetch(&mut state, &world).unwrap();
            *local += 1;
        }
        assert_eq!(*Local::<u32>::fetch(&mut state, &world).unwrap(), 3);
    }

    #[test]
    fn test_local_created_on_first_fetch() {
        static CREATED: AtomicUsize = AtomicUsize::new(0);

        struct Counter(u32);

        impl Default for Counter {
            fn default() -> Self {
                CREATED.fetch_add(1, Ordering::SeqCst);
                Counter(0)
            }
        }

        let world = World::new();
        let mut access = SystemAccess::new();
        let mut state = Local::<Counter>::init_state(&mut access).unwrap();
        assert_eq!(CREATED.load(Ordering::SeqCst), 0);

        Local::<Counter>::fetch(&mut state, &world).unwrap().0 += 1;
        assert_eq!(CREATED.load(Ordering::SeqCst), 1);

        assert_eq!(Local::<Counter>::fetch(&mut state, &world).unwrap().0, 1);
        assert_eq!(CREATED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_command_deferred_moves_queue() {
        let world = World::new();
        let mut access = SystemAccess::new();
        let mut state = Command::init_state(&mut access).unwrap();
        assert!(access.uses_commands());

        let command = Command::fetch(&mut state, &world).unwrap();
        command.insert_resource(Score(1));
        command.spawn_empty();

        let mut queue = CommandQueue::new();
        Command::apply_deferred(&mut state, &mut queue);
        assert_eq!(queue.len(), 2);
        assert!(state.lock().is_empty());
    }
}
