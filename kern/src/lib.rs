// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The HSX VM core: per-task architectural state, the instruction
//! interpreter, and the SVC dispatch surface (spec §4.4).
//!
//! This crate knows nothing about the scheduler, the mailbox manager's
//! internals, or RPC; it executes one task's instruction stream and reports
//! faults, blocking requests, and lifecycle requests (yield/sleep/exit) to
//! its caller. The executive owns everything above that line.

pub mod context;
pub mod interp;
pub mod memory;
pub mod svc;

pub use context::TaskContext;
pub use interp::{step, StepEvent};
pub use memory::Memory;
pub use svc::{SvcHost, SvcOutcome};
