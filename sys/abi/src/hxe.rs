// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HXE image header layouts (spec §4.2, §6).
//!
//! Header fields are big-endian on the wire; parsing/validation lives in
//! `hsx-image`, this module only carries the shapes and constants that must
//! be shared with the executive (app identity, metadata section types).

pub const MAGIC: u32 = 0x4853_5845; // "HSXE"

bitflags::bitflags! {
    /// v2 header flags.
    #[derive(Default)]
    pub struct HxeFlags: u16 {
        /// When set, the executive permits more than one concurrent instance
        /// of this app name; otherwise `load` is rejected with
        /// `app_exists:<name>` while an instance is alive.
        const ALLOW_MULTIPLE = 0b0000_0001;
    }
}

/// Supported HXE versions.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Version {
    V1,
    V2,
}

impl Version {
    pub fn from_u16(v: u16) -> Option<Version> {
        match v {
            1 => Some(Version::V1),
            2 => Some(Version::V2),
            _ => None,
        }
    }

    pub fn header_len(self) -> usize {
        match self {
            Version::V1 => 36,
            Version::V2 => 96,
        }
    }
}

/// Metadata table section kinds (v2 only).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MetaSectionType {
    Values,
    Commands,
    MailboxBindings,
}

impl MetaSectionType {
    pub fn from_u8(v: u8) -> Option<MetaSectionType> {
        match v {
            1 => Some(MetaSectionType::Values),
            2 => Some(MetaSectionType::Commands),
            3 => Some(MetaSectionType::MailboxBindings),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            MetaSectionType::Values => 1,
            MetaSectionType::Commands => 2,
            MetaSectionType::MailboxBindings => 3,
        }
    }
}

/// Auth levels gating value writes and command invocation (metadata tables).
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum AuthLevel {
    Public,
    Operator,
    Admin,
}

bitflags::bitflags! {
    /// Command descriptor flags.
    #[derive(Default)]
    pub struct CommandFlags: u8 {
        /// Requires a token validated by a host-installed callback.
        const PIN = 0b0000_0001;
        /// Result is posted to a caller-supplied mailbox rather than
        /// returned synchronously.
        const ASYNC = 0b0000_0010;
    }
}
