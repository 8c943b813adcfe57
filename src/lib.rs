// SPDX-License-Identifier: MIT

//! brigade-rs: a workflow graph engine and the kitchen workflows built on it

pub mod adk;
pub mod brigade;
