// SPDX-License-Identifier: MIT

pub mod kitchen;
pub mod server;
pub mod workflow;
