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
//! Basic example demonstrating the scheduler
//!
//! This example registers systems across the lifecycle stages, orders them
//! with sets, pins a "render" system to the `single` worker and spawns
//! entities through deferred commands.
//!
//! Run with `RUST_LOG=ecs_scheduler=debug` to see stage transitions.

use ecs_scheduler::ecs::{
    Command, Component, Get, Query, Res, ResMut, Stage, SystemSet, With,
};
use ecs_scheduler::plugins::{Plugin, PluginContext};
use ecs_scheduler::{App, AppError, ExecutorConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct Position {
    x: f32,
    y: f32,
}

impl Component for Position {}

#[derive(Debug)]
struct Velocity {
    dx: f32,
    dy: f32,
}

impl Component for Velocity {}

struct Player;

impl Component for Player {}

struct DeltaTime(f32);

#[derive(Default)]
struct FrameStats {
    frames: u32,
    drawn: usize,
}

fn spawn_world(command: Command) {
    let player = command
        .spawn((Position { x: 0.0, y: 0.0 }, Velocity { dx: 1.0, dy: 0.5 }))
        .insert(Player)
        .id();
    for i in 0..4 {
        let satellite = command
            .spawn((Position { x: i as f32, y: 0.0 }, Velocity { dx: 0.0, dy: -1.0 }))
            .id();
        command.entity(player).add_child(satellite);
    }
    println!("  [spawn_world] queued player {:?} and 4 satellites", player);
}

fn apply_velocity(mut query: Query<Get<(&mut Position, &Velocity)>>, dt: Res<DeltaTime>) {
    query.for_each(|_, (position, velocity)| {
        position.x += velocity.dx * dt.0;
        position.y += velocity.dy * dt.0;
    });
}

fn clamp_to_ground(mut query: Query<Get<(&mut Position,)>>) {
    query.for_each(|_, (position,)| position.y = position.y.max(-2.0));
}

fn follow_player(query: Query<Get<(&Position,)>, With<(Player,)>>) {
    for (entity, (position,)) in query.iter() {
        println!("  [follow_player] camera on {:?} at ({:.2}, {:.2})", entity, position.x, position.y);
    }
}

fn draw(query: Query<Get<(&Position,)>>, mut stats: ResMut<FrameStats>) {
    stats.frames += 1;
    stats.drawn = query.len();
}

struct RenderPlugin;

impl Plugin for RenderPlugin {
    fn name(&self) -> &str {
        "render"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn build(&self, ctx: &mut PluginContext) {
        ctx.insert_resource(FrameStats::default());
        ctx.add_system(Stage::Render, draw).use_worker("single");
    }
}

fn main() -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== ECS Scheduler Basic Example ===\n");

    let physics = SystemSet::new("physics");
    let mut app = App::with_config(ExecutorConfig::from_env());
    app.add_plugin(RenderPlugin)?;
    app.insert_resource(DeltaTime(1.0 / 60.0));

    app.add_system(Stage::Startup, spawn_world);
    app.configure_set(Stage::Update, physics.clone());
    app.add_system(Stage::Update, apply_velocity).in_set(physics.clone());
    app.add_system(Stage::Update, clamp_to_ground)
        .in_set(physics)
        .after("apply_velocity");
    app.add_system(Stage::PostUpdate, follow_player);

    for frame in 1..=3 {
        println!("Frame {}:", frame);
        app.update()?;
    }

    if let Ok(stats) = app.world().resource::<FrameStats>() {
        println!("\nRendered {} frames, {} entities in the last one", stats.frames, stats.drawn);
    }

    app.shutdown()?;
    println!("Entities alive at exit: {}", app.world().entity_count());
    println!("\n=== Example Complete ===");
    Ok(())
}
