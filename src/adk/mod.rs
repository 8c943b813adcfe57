// SPDX-License-Identifier: MIT

pub mod approval;
pub mod error;
pub mod extract;
pub mod model;
