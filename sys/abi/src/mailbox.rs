// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared mailbox types (spec §3, §4.3, §7).
//!
//! These are shared between `hsx-mailbox` (which owns the descriptors) and
//! `kern` (whose `MAILBOX` SVC family returns these codes into R0), so they
//! live in the ABI crate rather than either.

/// Mailbox endpoint namespace.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Namespace {
    Pid,
    Svc,
    App,
    Shared,
}

bitflags::bitflags! {
    /// Descriptor delivery mode mask.
    #[derive(Default)]
    pub struct ModeMask: u8 {
        const RDONLY       = 0b0000_0001;
        const RDWR         = 0b0000_0010;
        const FANOUT       = 0b0000_0100;
        const FANOUT_DROP  = 0b0000_1000;
        const FANOUT_BLOCK = 0b0001_0000;
        const TAP          = 0b0010_0000;
    }
}

impl ModeMask {
    /// Validates the "at most one FANOUT_DROP|FANOUT_BLOCK when FANOUT is
    /// set" invariant from spec §3.
    pub fn is_valid(self) -> bool {
        if !self.contains(ModeMask::FANOUT) {
            return !self.intersects(ModeMask::FANOUT_DROP | ModeMask::FANOUT_BLOCK);
        }
        self.contains(ModeMask::FANOUT_DROP) ^ self.contains(ModeMask::FANOUT_BLOCK)
    }

    pub fn is_fanout(self) -> bool {
        self.contains(ModeMask::FANOUT)
    }

    pub fn is_fanout_drop(self) -> bool {
        self.is_fanout() && self.contains(ModeMask::FANOUT_DROP)
    }

    pub fn is_fanout_block(self) -> bool {
        self.is_fanout() && self.contains(ModeMask::FANOUT_BLOCK)
    }
}

bitflags::bitflags! {
    /// Message flags, OR'd into the `flags` field of a delivered message.
    #[derive(Default)]
    pub struct MsgFlags: u8 {
        /// Set by `recv` when a fanout reader skipped one or more dropped
        /// messages since its last receive.
        const OVERRUN = 0b0000_0001;
    }
}

/// Status codes returned by mailbox SVC operations (spec §4.3, §7). The set
/// is fixed; do not introduce new codes, per spec §9.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MailboxStatus {
    Ok,
    NoDescriptor,
    InvalidHandle,
    MsgTooLarge,
    WouldBlock,
    Timeout,
    NoData,
}

impl MailboxStatus {
    pub fn code(self) -> u32 {
        match self {
            MailboxStatus::Ok => 0,
            MailboxStatus::NoDescriptor => 1,
            MailboxStatus::InvalidHandle => 2,
            MailboxStatus::MsgTooLarge => 3,
            MailboxStatus::WouldBlock => 4,
            MailboxStatus::Timeout => 5,
            MailboxStatus::NoData => 6,
        }
    }

    pub fn category(self) -> &'static str {
        match self {
            MailboxStatus::Ok => "ok",
            MailboxStatus::NoDescriptor => "no_descriptor",
            MailboxStatus::InvalidHandle => "invalid_handle",
            MailboxStatus::MsgTooLarge => "msg_too_large",
            MailboxStatus::WouldBlock => "would_block",
            MailboxStatus::Timeout => "timeout",
            MailboxStatus::NoData => "no_data",
        }
    }
}

impl core::fmt::Display for MailboxStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.category())
    }
}
