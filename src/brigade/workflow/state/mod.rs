// SPDX-License-Identifier: MIT

//! State management for graph workflows
//!
//! This module provides:
//! - `StateSchema` - defines the shape and types of workflow state
//! - `WorkflowState` - runtime state storage with reducer support
//! - `StateUpdate` - the fields a node returns
//! - `Branch` / `merge_branches` - join semantics for parallel branches

mod merge;
mod schema;
mod store;

pub use merge::{merge_branches, Branch};
pub use schema::{FieldType, ReducerType, StateFieldDef, StateSchema};
pub use store::{StateUpdate, WorkflowState};
