// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The HSX executive: scheduler, task lifecycle, debugger, event bus,
//! session model, and value/command registry (spec §3, §4, §5, §6).
//!
//! This crate owns everything `kern` deliberately does not: which task runs
//! next, what a blocked `recv` wakes up to, what an attached debugger sees,
//! and the RPC surface a client session drives it through.

pub mod commands;
pub mod debugger;
pub mod events;
pub mod executive;
pub mod fs;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod svc_host;
pub mod task_table;

pub use executive::{Executive, ExecutiveConfig, LoadError, StepOutcome};
