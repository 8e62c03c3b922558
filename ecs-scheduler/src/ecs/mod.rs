//! Entity Component System (ECS) core implementation
//!
//! This module provides the scheduler and the data it schedules over:
//! - Entity management and typed component storage
//! - Singleton resources and deferred commands
//! - Systems with access derived from their parameters
//! - Stage graphs and an executor with optional parallel dispatch via Rayon

mod entity;
mod component;
mod hierarchy;
mod resource;
mod access;
mod command;
mod world;
mod query;
mod param;
mod system;
mod scheduler;
mod graph;
mod executor;

pub use entity::{Entity, EntityAllocator, EntityId};
pub use component::{Bundle, Component, ComponentStorage, ComponentStore, DenseStorage, SharedStorage};
pub use hierarchy::{Children, Parent};
pub use resource::{Res, ResMut, Resource, ResourceTable, SharedResource};
pub use access::{QueryAccess, SystemAccess};
pub use command::{Command, CommandQueue, EntityCommand, FlushStats};
pub use world::World;
pub use query::{ComponentList, Get, Query, QueryData, QueryFilter, ReadOnlyQueryData, With, Without, WorldQuery};
pub use param::{Local, SystemParam};
pub use system::{FunctionSystem, IntoSystem, IsFunctionSystem, System, SystemOutput, SystemParamFunction};
pub use scheduler::{OrderTarget, Schedule, SetBuilder, SetChain, Stage, StageClass, SystemBuilder, SystemSet};
pub use graph::StageGraph;
pub use executor::{Executor, ExecutorPhase};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_creation() {
        let world = World::new();
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn test_entity_creation() {
        let mut world = World::new();
        let entity = world.spawn_empty();
        assert_eq!(world.entity_count(), 1);
        assert!(world.is_alive(entity));
    }
}
