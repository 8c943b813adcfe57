// SPDX-License-Identifier: MIT

//! Graph-based workflow execution
//!
//! This module provides the graph definition, its builder and the executor
//! that runs nodes in dependency order, in parallel where the graph fans out.

pub mod builder;
pub mod executor;
pub mod types;

pub use builder::GraphBuilder;
pub use executor::{execute, Executor, Halted, RunEvent};
pub use types::{
    async_work_fn, work_fn, Edge, Graph, Guard, NodeKind, NodeSpec, Passthrough, RouteSpec, Work,
    END, START,
};
