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
//! Deferred command tests
//!
//! Covers flush visibility between stages, despawn idempotence and
//! hierarchical destruction.

use ecs_scheduler::ecs::{Command, CommandQueue, Component, Entity, Get, Query, Res, ResMut, Stage, World};
use ecs_scheduler::App;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
struct Marker(u32);
impl Component for Marker {}

#[test]
fn test_despawn_idempotent_within_flush() {
    let mut world = World::new();
    let target = world.spawn((Marker(1),));
    let bystander = world.spawn((Marker(2),));

    let mut queue = CommandQueue::new();
    queue.push_despawn(target);
    queue.push_despawn(target);
    queue.push_despawn_recursive(target);
    queue.push_despawn_recursive(target);
    let stats = queue.apply(&mut world);

    assert_eq!(stats.despawned, 1);
    assert!(!world.is_alive(target));
    assert!(world.is_alive(bystander));
    assert_eq!(world.entity_count(), 1);
}

#[test]
fn test_despawn_of_dead_entity_is_noop() {
    let mut world = World::new();
    let entity = world.spawn((Marker(7),));
    assert!(world.despawn(entity));

    let mut queue = CommandQueue::new();
    queue.push_despawn(entity);
    queue.push_insert(entity, Marker(8));
    let stats = queue.apply(&mut world);

    assert_eq!(stats.despawned, 0);
    assert_eq!(stats.inserted, 0);
    assert!(!world.has::<Marker>(entity));
}

static DROP_LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

struct Tracked(&'static str);
impl Component for Tracked {}

impl Drop for Tracked {
    fn drop(&mut self) {
        if let Ok(mut log) = DROP_LOG.lock() {
            log.push(self.0);
        }
    }
}

#[test]
fn test_recursive_despawn_children_first() {
    let mut world = World::new();
    let root = world.spawn((Tracked("root"),));
    let left = world.spawn((Tracked("left"),));
    let right = world.spawn((Tracked("right"),));
    let leaf = world.spawn((Tracked("leaf"),));
    let outsider = world.spawn((Marker(0),));
    assert!(world.add_child(root, left));
    assert!(world.add_child(root, right));
    assert!(world.add_child(left, leaf));

    let mut queue = CommandQueue::new();
    queue.push_despawn_recursive(root);
    queue.push_despawn(left);
    queue.push_despawn_recursive(leaf);
    let stats = queue.apply(&mut world);

    assert_eq!(stats.despawned, 4);
    assert_eq!(world.entity_count(), 1);
    assert!(world.is_alive(outsider));

    let log = DROP_LOG.lock().unwrap().clone();
    assert_eq!(log.len(), 4);
    let position = |name| log.iter().position(|entry| *entry == name).unwrap();
    assert!(position("leaf") < position("left"));
    assert!(position("left") < position("root"));
    assert!(position("right") < position("root"));
}

#[test]
fn test_plain_despawn_orphans_children() {
    let mut world = World::new();
    let parent = world.spawn((Marker(1),));
    let child = world.spawn((Marker(2),));
    world.add_child(parent, child);

    let mut queue = CommandQueue::new();
    queue.push_despawn(parent);
    queue.apply(&mut world);

    assert!(world.is_alive(child));
    assert_eq!(world.parent(child), None);
}

#[derive(Debug, Clone, Copy)]
struct Family {
    parent: Entity,
    child: Entity,
}

#[test]
fn test_spawn_and_link_visible_next_stage() {
    fn build_family(command: Command) {
        let parent = command.spawn((Marker(1),)).id();
        let child = command.spawn_empty().insert(Marker(2)).id();
        command.entity(parent).add_child(child);
        command.insert_resource(Family { parent, child });
    }

    fn check_family(family: Res<Family>, query: Query<Get<(&Marker,)>>) -> Result<(), String> {
        if query.len() != 2 {
            return Err(format!("expected 2 markers, saw {}", query.len()));
        }
        if !query.contains(family.parent) || !query.contains(family.child) {
            return Err("family members missing".to_string());
        }
        Ok(())
    }

    let mut app = App::new();
    app.add_system(Stage::Startup, build_family);
    app.add_system(Stage::Update, check_family);
    app.update().unwrap();

    let family = *app.world().resource::<Family>().unwrap();
    assert_eq!(app.world().children(family.parent), vec![family.child]);
    assert_eq!(app.world().parent(family.child), Some(family.parent));
}

#[derive(Debug, PartialEq)]
struct Level(u32);

#[derive(Debug, Default)]
struct Observed {
    same_stage: Vec<u32>,
    next_stage: Vec<u32>,
}

#[test]
fn test_resource_insert_visible_next_stage_last_wins() {
    fn propose(command: Command, level: Res<Level>) {
        command.insert_resource(Level(level.0 + 10));
        command.insert_resource(Level(level.0 + 20));
    }
    fn observe_now(level: Res<Level>, mut observed: ResMut<Observed>) {
        observed.same_stage.push(level.0);
    }
    fn observe_later(level: Res<Level>, mut observed: ResMut<Observed>) {
        observed.next_stage.push(level.0);
    }

    let mut app = App::new();
    app.insert_resource(Level(0));
    app.insert_resource(Observed::default());
    app.add_system(Stage::Update, observe_now).after("propose");
    app.add_system(Stage::Update, propose);
    app.add_system(Stage::PostUpdate, observe_later);
    app.run_for(2).unwrap();

    let observed = app.world().resource::<Observed>().unwrap();
    assert_eq!(observed.same_stage, vec![0, 20]);
    assert_eq!(observed.next_stage, vec![20, 40]);
    assert_eq!(*app.world().resource::<Level>().unwrap(), Level(40));
}

#[test]
fn test_commands_from_parallel_systems_all_applied() {
    fn spawn_a(command: Command) {
        for i in 0..50 {
            command.spawn((Marker(i),));
        }
    }
    fn spawn_b(command: Command) {
        for i in 50..100 {
            command.spawn((Marker(i),));
        }
    }

    let mut app = App::new();
    app.add_system(Stage::Update, spawn_a);
    app.add_system(Stage::Update, spawn_b);
    app.run_for(3).unwrap();

    assert_eq!(app.world().entity_count(), 300);
    let mut ids: Vec<_> = app.world().entities();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 300);
}
