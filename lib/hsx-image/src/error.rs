// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Image load failure kinds (spec §4.2, §7).

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ImageError {
    BadMagic,
    UnsupportedVersion,
    HeaderTruncated,
    MisalignedCode,
    EntryOutOfRange,
    SectionsExceedFile,
    CodeTooLarge,
    RodataTooLarge,
    BssTooLarge,
    CrcMismatch,
}

impl ImageError {
    /// The RPC/dmesg error category string (spec §6).
    pub fn category(self) -> &'static str {
        match self {
            ImageError::BadMagic => "bad_magic",
            ImageError::UnsupportedVersion => "unsupported_version",
            ImageError::HeaderTruncated => "header_truncated",
            ImageError::MisalignedCode => "misaligned_code",
            ImageError::EntryOutOfRange => "entry_out_of_range",
            ImageError::SectionsExceedFile => "sections_exceed_file",
            ImageError::CodeTooLarge => "code_too_large",
            ImageError::RodataTooLarge => "rodata_too_large",
            ImageError::BssTooLarge => "bss_too_large",
            ImageError::CrcMismatch => "crc_mismatch",
        }
    }
}

impl std::fmt::Display for ImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.category())
    }
}

impl std::error::Error for ImageError {}
