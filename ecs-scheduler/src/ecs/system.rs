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
//! System execution framework
//!
//! Systems contain the logic that operates on entities and components.
//! Any function whose arguments are all [`SystemParam`]s is a system; its
//! data access is derived from the argument types when it is registered.
//! Types implementing [`System`] directly declare their access by hand.

use crate::ecs::{CommandQueue, SystemAccess, SystemParam, World};
use crate::error::{AccessError, FailureCause};
use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

/// Trait for systems that operate on the ECS world
///
/// Systems only get shared access to the world. Structural changes go
/// through deferred commands, collected by [`take_deferred`](System::take_deferred)
/// once the system's stage has finished.
pub trait System: Send + Sync {
    /// Get the name of this system for debugging and ordering
    fn name(&self) -> &str;

    /// The data this system borrows while it runs
    fn access(&self) -> &SystemAccess;

    /// Validate the declared access; called once at registration
    fn initialize(&mut self) -> Result<(), AccessError> {
        self.access().validate()
    }

    /// Execute the system on the world
    fn run(&mut self, world: &World) -> Result<(), FailureCause>;

    /// Move commands produced by the last run into `queue`
    fn take_deferred(&mut self, _queue: &mut CommandQueue) {}
}

/// Return type of a function system
pub trait SystemOutput {
    /// Convert into the executor's failure representation
    fn into_result(self) -> Result<(), FailureCause>;
}

impl SystemOutput for () {
    fn into_result(self) -> Result<(), FailureCause> {
        Ok(())
    }
}

impl<E: fmt::Display> SystemOutput for Result<(), E> {
    fn into_result(self) -> Result<(), FailureCause> {
        self.map_err(|err| FailureCause::Error(err.to_string()))
    }
}

/// A function callable with a tuple of system parameters
///
/// `Marker` is the function's signature; it only serves to keep the impls
/// for different arities apart.
pub trait SystemParamFunction<Marker>: Send + Sync + 'static {
    /// All parameters as one tuple
    type Param: SystemParam;

    /// Return type of the function
    type Output: SystemOutput;

    /// Invoke the function
    fn call(&mut self, param: Self::Param) -> Self::Output;
}

macro_rules! impl_system_param_function {
    ($($P:ident),*) => {
        impl<Out, Func, $($P),*> SystemParamFunction<fn($($P,)*) -> Out> for Func
        where
            Func: FnMut($($P),*) -> Out + Send + Sync + 'static,
            Out: SystemOutput,
            $($P: SystemParam,)*
        {
            type Param = ($($P,)*);
            type Output = Out;

            #[allow(non_snake_case, clippy::unused_unit)]
            fn call(&mut self, param: ($($P,)*)) -> Out {
                let ($($P,)*) = param;
                self($($P),*)
            }
        }
    };
}

impl_system_param_function!();
impl_system_param_function!(P0);
impl_system_param_function!(P0, P1);
impl_system_param_function!(P0, P1, P2);
impl_system_param_function!(P0, P1, P2, P3);
impl_system_param_function!(P0, P1, P2, P3, P4);
impl_system_param_function!(P0, P1, P2, P3, P4, P5);
impl_system_param_function!(P0, P1, P2, P3, P4, P5, P6);
impl_system_param_function!(P0, P1, P2, P3, P4, P5, P6, P7);

type ParamState<Marker, F> = <<F as SystemParamFunction<Marker>>::Param as SystemParam>::State;

/// A system backed by a plain function
pub struct FunctionSystem<Marker, F>
where
    F: SystemParamFunction<Marker>,
{
    func: F,
    name: String,
    access: SystemAccess,
    state: Result<ParamState<Marker, F>, AccessError>,
    _marker: PhantomData<fn() -> Marker>,
}

impl<Marker, F> FunctionSystem<Marker, F>
where
    F: SystemParamFunction<Marker>,
{
    fn new(func: F) -> Self {
        let mut access = SystemAccess::new();
        let state = <F::Param as SystemParam>::init_state(&mut access);
        FunctionSystem {
            func,
            name: short_system_name(type_name::<F>()),
            access,
            state,
            _marker: PhantomData,
        }
    }
}

impl<Marker, F> System for FunctionSystem<Marker, F>
where
    Marker: 'static,
    F: SystemParamFunction<Marker>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn access(&self) -> &SystemAccess {
        &self.access
    }

    fn initialize(&mut self) -> Result<(), AccessError> {
        match &self.state {
            Ok(_) => Ok(()),
            Err(err) => Err(err.clone()),
        }
    }

    fn run(&mut self, world: &World) -> Result<(), FailureCause> {
        let state = self
            .state
            .as_mut()
            .map_err(|err| FailureCause::Access(err.clone()))?;
        let param = <F::Param as SystemParam>::fetch(state, world)?;
        self.func.call(param).into_result()
    }

    fn take_deferred(&mut self, queue: &mut CommandQueue) {
        if let Ok(state) = self.state.as_mut() {
            <F::Param as SystemParam>::apply_deferred(state, queue);
        }
    }
}

/// Conversion into a registrable system
pub trait IntoSystem<Marker>: Sized {
    /// The resulting system type
    type System: System + 'static;

    /// Perform the conversion
    fn into_system(self) -> Self::System;
}

/// Marker distinguishing function systems from hand-written ones
pub struct IsFunctionSystem;

impl<Marker, F> IntoSystem<(IsFunctionSystem, Marker)> for F
where
    Marker: 'static,
    F: SystemParamFunction<Marker>,
{
    type System = FunctionSystem<Marker, F>;

    fn into_system(self) -> Self::System {
        FunctionSystem::new(self)
    }
}

impl<S: System + 'static> IntoSystem<()> for S {
    type System = S;

    fn into_system(self) -> S {
        self
    }
}

/// Last path segment of a type name; closures are all named `<closure>`
fn short_system_name(full: &str) -> String {
    if full.contains("{{closure}}") {
        return "<closure>".to_string();
    }
    let mut depth = 0usize;
    let base: String = full
        .chars()
        .filter(|c| match c {
            '<' => {
                depth += 1;
                false
            }
            '>' => {
                depth = depth.saturating_sub(1);
                false
            }
            _ => depth == 0,
        })
        .collect();
    base.rsplit("::").next().unwrap_or(&base).to_string()
}
