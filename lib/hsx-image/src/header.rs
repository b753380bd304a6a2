// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HXE header parsing (spec §4.2, §6).

use abi::hxe::{HxeFlags, Version, MAGIC};
use byteorder::{BigEndian, ByteOrder};

use crate::error::ImageError;

pub const V1_HEADER_LEN: usize = 36;
pub const V2_HEADER_LEN: usize = 96;
const APP_NAME_LEN: usize = 32;
const V2_RESERVED_LEN: usize = 20;

/// A parsed, validated HXE header (fields common to v1 and v2, plus the v2
/// extensions when present).
#[derive(Clone, Debug)]
pub struct Header {
    pub version: Version,
    pub flags: HxeFlags,
    pub entry: u32,
    pub code_len: u32,
    pub ro_len: u32,
    pub bss_size: u32,
    pub req_caps: u32,
    pub crc32: u32,
    /// `None` for v1 images.
    pub app_name: Option<String>,
    pub meta_offset: u32,
    pub meta_count: u32,
}

impl Header {
    pub fn header_len(&self) -> usize {
        self.version.header_len()
    }

    pub fn allow_multiple(&self) -> bool {
        self.flags.contains(HxeFlags::ALLOW_MULTIPLE)
    }

    pub fn has_metadata(&self) -> bool {
        matches!(self.version, Version::V2) && self.meta_count > 0
    }
}

/// Parses and validates the header, returning it alongside the detected
/// version. Does not validate CRC (the caller needs the fully-parsed header
/// to know which bytes the CRC covers, and needs to zero the CRC field in a
/// scratch copy first).
pub fn parse(bytes: &[u8]) -> Result<Header, ImageError> {
    if bytes.len() < 4 {
        return Err(ImageError::HeaderTruncated);
    }
    let magic = BigEndian::read_u32(&bytes[0..4]);
    if magic != MAGIC {
        return Err(ImageError::BadMagic);
    }
    if bytes.len() < 6 {
        return Err(ImageError::HeaderTruncated);
    }
    let version_raw = BigEndian::read_u16(&bytes[4..6]);
    let version = Version::from_u16(version_raw).ok_or(ImageError::UnsupportedVersion)?;

    let header_len = version.header_len();
    if bytes.len() < header_len {
        return Err(ImageError::HeaderTruncated);
    }

    let flags = HxeFlags::from_bits_truncate(BigEndian::read_u16(&bytes[6..8]));
    let entry = BigEndian::read_u32(&bytes[8..12]);
    let code_len = BigEndian::read_u32(&bytes[12..16]);
    let ro_len = BigEndian::read_u32(&bytes[16..20]);
    let bss_size = BigEndian::read_u32(&bytes[20..24]);
    let req_caps = BigEndian::read_u32(&bytes[24..28]);
    let crc32 = BigEndian::read_u32(&bytes[28..32]);
    // bytes[32..36] reserved in v1 (kept for 4-byte header alignment).

    let (app_name, meta_offset, meta_count) = if let Version::V2 = version {
        let name_bytes = &bytes[36..36 + APP_NAME_LEN];
        let nul = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
        let name = String::from_utf8_lossy(&name_bytes[..nul]).into_owned();
        let meta_offset_off = 36 + APP_NAME_LEN;
        let meta_offset = BigEndian::read_u32(&bytes[meta_offset_off..meta_offset_off + 4]);
        let meta_count = BigEndian::read_u32(&bytes[meta_offset_off + 4..meta_offset_off + 8]);
        debug_assert_eq!(meta_offset_off + 8 + V2_RESERVED_LEN, V2_HEADER_LEN);
        (Some(name), meta_offset, meta_count)
    } else {
        (None, 0, 0)
    };

    Ok(Header {
        version,
        flags,
        entry,
        code_len,
        ro_len,
        bss_size,
        req_caps,
        crc32,
        app_name,
        meta_offset,
        meta_count,
    })
}
