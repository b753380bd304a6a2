// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! v2 metadata table decoding (spec §4.2).
//!
//! The metadata table is an array of `(section_type, offset, length,
//! entry_count)` descriptors; each section's bytes are interpreted according
//! to fixed-width records keyed by `section_type`. The loader parses these
//! into the descriptor types below but does not bind mailboxes or register
//! values itself -- that is the executive's job on successful task creation
//! (spec §4.2).

use abi::hxe::{AuthLevel, CommandFlags, MetaSectionType};
use abi::mailbox::ModeMask;
use byteorder::{BigEndian, ByteOrder};

use crate::error::ImageError;

const TABLE_ENTRY_LEN: usize = 16;
const VALUE_RECORD_LEN: usize = 100;
const COMMAND_RECORD_LEN: usize = 104;
const MAILBOX_BINDING_RECORD_LEN: usize = 72;

#[derive(Clone, Debug)]
pub struct ValueDescriptor {
    pub group: u8,
    pub id: u8,
    pub flags: u8,
    pub auth_level: AuthLevel,
    pub init_value: i32,
    pub name: String,
    pub unit: String,
    pub epsilon: f32,
    pub min: f32,
    pub max: f32,
    pub persist_key: String,
}

#[derive(Clone, Debug)]
pub struct CommandDescriptor {
    pub group: u8,
    pub id: u8,
    pub flags: CommandFlags,
    pub auth_level: AuthLevel,
    pub handler_offset: u32,
    pub name: String,
    pub help: String,
}

#[derive(Clone, Debug)]
pub struct MailboxBindingDescriptor {
    pub target: String,
    pub capacity: Option<u32>,
    pub mode_mask: ModeMask,
    pub flags: u8,
}

#[derive(Clone, Debug, Default)]
pub struct Metadata {
    pub values: Vec<ValueDescriptor>,
    pub commands: Vec<CommandDescriptor>,
    pub mailbox_bindings: Vec<MailboxBindingDescriptor>,
}

fn read_fixed_str(bytes: &[u8]) -> String {
    let nul = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..nul]).into_owned()
}

fn auth_level(v: u8) -> AuthLevel {
    match v {
        0 => AuthLevel::Public,
        1 => AuthLevel::Operator,
        _ => AuthLevel::Admin,
    }
}

pub fn parse(bytes: &[u8], meta_offset: u32, meta_count: u32) -> Result<Metadata, ImageError> {
    let mut metadata = Metadata::default();
    let table_start = meta_offset as usize;
    let table_len = meta_count as usize * TABLE_ENTRY_LEN;
    let table_end = table_start
        .checked_add(table_len)
        .ok_or(ImageError::SectionsExceedFile)?;
    if table_end > bytes.len() {
        return Err(ImageError::SectionsExceedFile);
    }

    for i in 0..meta_count as usize {
        let entry = &bytes[table_start + i * TABLE_ENTRY_LEN..table_start + (i + 1) * TABLE_ENTRY_LEN];
        let section_type = entry[0];
        let offset = BigEndian::read_u32(&entry[4..8]) as usize;
        let length = BigEndian::read_u32(&entry[8..12]) as usize;
        let entry_count = BigEndian::read_u32(&entry[12..16]) as usize;

        let section_end = offset.checked_add(length).ok_or(ImageError::SectionsExceedFile)?;
        if section_end > bytes.len() {
            return Err(ImageError::SectionsExceedFile);
        }
        let section = &bytes[offset..section_end];

        match MetaSectionType::from_u8(section_type) {
            Some(MetaSectionType::Values) => {
                for r in 0..entry_count {
                    let rec = slice_record(section, r, VALUE_RECORD_LEN)?;
                    metadata.values.push(ValueDescriptor {
                        group: rec[0],
                        id: rec[1],
                        flags: rec[2],
                        auth_level: auth_level(rec[3]),
                        init_value: BigEndian::read_i32(&rec[4..8]),
                        name: read_fixed_str(&rec[8..40]),
                        unit: read_fixed_str(&rec[40..56]),
                        epsilon: f32::from_bits(BigEndian::read_u32(&rec[56..60])),
                        min: f32::from_bits(BigEndian::read_u32(&rec[60..64])),
                        max: f32::from_bits(BigEndian::read_u32(&rec[64..68])),
                        persist_key: read_fixed_str(&rec[68..100]),
                    });
                }
            }
            Some(MetaSectionType::Commands) => {
                for r in 0..entry_count {
                    let rec = slice_record(section, r, COMMAND_RECORD_LEN)?;
                    metadata.commands.push(CommandDescriptor {
                        group: rec[0],
                        id: rec[1],
                        flags: CommandFlags::from_bits_truncate(rec[2]),
                        auth_level: auth_level(rec[3]),
                        handler_offset: BigEndian::read_u32(&rec[4..8]),
                        name: read_fixed_str(&rec[8..40]),
                        help: read_fixed_str(&rec[40..104]),
                    });
                }
            }
            Some(MetaSectionType::MailboxBindings) => {
                for r in 0..entry_count {
                    let rec = slice_record(section, r, MAILBOX_BINDING_RECORD_LEN)?;
                    let capacity = BigEndian::read_u32(&rec[64..68]);
                    metadata.mailbox_bindings.push(MailboxBindingDescriptor {
                        target: read_fixed_str(&rec[0..64]),
                        capacity: if capacity == 0 { None } else { Some(capacity) },
                        mode_mask: ModeMask::from_bits_truncate(rec[68]),
                        flags: rec[69],
                    });
                }
            }
            None => {
                // Unknown section types are ignored; the loader only rejects
                // structural problems (bounds, truncation), not forward
                // compatibility extensions.
            }
        }
    }

    Ok(metadata)
}

fn slice_record(section: &[u8], index: usize, record_len: usize) -> Result<&[u8], ImageError> {
    let start = index * record_len;
    let end = start + record_len;
    if end > section.len() {
        return Err(ImageError::SectionsExceedFile);
    }
    Ok(&section[start..end])
}
