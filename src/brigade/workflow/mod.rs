// SPDX-License-Identifier: MIT

pub mod config;
pub mod gate;
pub mod graph;
pub mod loader;
pub mod process;
pub mod retry;
pub mod run;
pub mod state;

pub use run::{RunReport, RunStatus, Workflow};
