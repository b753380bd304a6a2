// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HXE loadable image parser (spec §4.2).
//!
//! [`load`] validates the header, checks the CRC32, and (for v2 images)
//! decodes the metadata table. It returns the parsed pieces; binding
//! mailboxes and registering values/commands from that metadata is the
//! executive's job once a task has actually been created from the image.

pub mod error;
pub mod header;
pub mod metadata;

pub use error::ImageError;
pub use header::Header;
pub use metadata::Metadata;

use abi::ADDRESS_SPACE_SIZE;

/// VM-imposed size limits (spec §4.2 `CodeTooLarge`/`RodataTooLarge`/
/// `BssTooLarge`): no section may exceed the address space, and the three
/// sections together must fit within it.
pub const MAX_SECTION_LEN: u32 = ADDRESS_SPACE_SIZE as u32;

#[derive(Clone, Debug)]
pub struct LoadedImage {
    pub header: Header,
    pub code: Vec<u8>,
    pub rodata: Vec<u8>,
    pub metadata: Option<Metadata>,
}

/// Parses and validates an HXE image.
pub fn load(bytes: &[u8]) -> Result<LoadedImage, ImageError> {
    let hdr = header::parse(bytes)?;

    if hdr.code_len % 4 != 0 || hdr.entry % 4 != 0 {
        return Err(ImageError::MisalignedCode);
    }
    if hdr.entry >= hdr.code_len {
        return Err(ImageError::EntryOutOfRange);
    }

    let header_len = hdr.header_len();
    let code_start = header_len;
    let rodata_start = header_len
        .checked_add(hdr.code_len as usize)
        .ok_or(ImageError::SectionsExceedFile)?;
    let data_end = rodata_start
        .checked_add(hdr.ro_len as usize)
        .ok_or(ImageError::SectionsExceedFile)?;
    if data_end > bytes.len() {
        return Err(ImageError::SectionsExceedFile);
    }

    if hdr.code_len > MAX_SECTION_LEN {
        return Err(ImageError::CodeTooLarge);
    }
    if hdr.ro_len > MAX_SECTION_LEN {
        return Err(ImageError::RodataTooLarge);
    }
    let sections_total = (hdr.code_len as u64) + (hdr.ro_len as u64) + (hdr.bss_size as u64);
    if hdr.bss_size > MAX_SECTION_LEN || sections_total > ADDRESS_SPACE_SIZE as u64 {
        return Err(ImageError::BssTooLarge);
    }

    verify_crc(bytes, &hdr)?;

    let metadata = if hdr.has_metadata() {
        Some(metadata::parse(bytes, hdr.meta_offset, hdr.meta_count)?)
    } else {
        None
    };

    let code = bytes[code_start..rodata_start].to_vec();
    let rodata = bytes[rodata_start..data_end].to_vec();

    Ok(LoadedImage { header: hdr, code, rodata, metadata })
}

fn verify_crc(bytes: &[u8], hdr: &Header) -> Result<(), ImageError> {
    use byteorder::{BigEndian, ByteOrder};

    let mut scratch = bytes.to_vec();
    // CRC is stored at a fixed offset (28..32) in both header versions.
    BigEndian::write_u32(&mut scratch[28..32], 0);

    const CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
    let computed = CRC.checksum(&scratch);
    if computed != hdr.crc32 {
        return Err(ImageError::CrcMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::hxe::{HxeFlags, MAGIC};
    use byteorder::{BigEndian, ByteOrder};

    fn build_v1(code: &[u8], rodata: &[u8], entry: u32, bss: u32) -> Vec<u8> {
        let mut buf = vec![0u8; header::V1_HEADER_LEN];
        BigEndian::write_u32(&mut buf[0..4], MAGIC);
        BigEndian::write_u16(&mut buf[4..6], 1);
        BigEndian::write_u16(&mut buf[6..8], 0);
        BigEndian::write_u32(&mut buf[8..12], entry);
        BigEndian::write_u32(&mut buf[12..16], code.len() as u32);
        BigEndian::write_u32(&mut buf[16..20], rodata.len() as u32);
        BigEndian::write_u32(&mut buf[20..24], bss);
        BigEndian::write_u32(&mut buf[24..28], 0); // req_caps
        // crc32 field (28..32) left zero for the checksum pass.
        buf.extend_from_slice(code);
        buf.extend_from_slice(rodata);

        const CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
        let sum = CRC.checksum(&buf);
        BigEndian::write_u32(&mut buf[28..32], sum);
        buf
    }

    #[test]
    fn loads_minimal_v1_image() {
        let code = [0x30, 0, 0, 0]; // one NOP-ish SVC-family word, 4 bytes
        let image = build_v1(&code, &[], 0, 0);
        let loaded = load(&image).expect("image should load");
        assert_eq!(loaded.code, code);
        assert!(loaded.metadata.is_none());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut image = build_v1(&[0u8; 4], &[], 0, 0);
        image[0] = 0; // corrupt magic
        assert_eq!(load(&image), Err(ImageError::BadMagic));
    }

    #[test]
    fn rejects_truncated_header() {
        assert_eq!(load(&[0x48, 0x53]), Err(ImageError::HeaderTruncated));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut image = build_v1(&[0u8; 4], &[], 0, 0);
        BigEndian::write_u16(&mut image[4..6], 9);
        assert_eq!(load(&image), Err(ImageError::UnsupportedVersion));
    }

    #[test]
    fn rejects_misaligned_code_len() {
        let mut image = build_v1(&[0u8; 4], &[], 0, 0);
        BigEndian::write_u32(&mut image[12..16], 5);
        assert_eq!(load(&image), Err(ImageError::MisalignedCode));
    }

    #[test]
    fn rejects_entry_out_of_range() {
        let code = [0u8; 8];
        let mut image = build_v1(&code, &[], 0, 0);
        BigEndian::write_u32(&mut image[8..12], 8); // entry == code_len
        assert_eq!(load(&image), Err(ImageError::EntryOutOfRange));
    }

    #[test]
    fn rejects_crc_mismatch() {
        let mut image = build_v1(&[0u8; 4], &[], 0, 0);
        let last = image.len() - 1;
        image[last] ^= 0xFF;
        assert_eq!(load(&image), Err(ImageError::CrcMismatch));
    }

    #[test]
    fn rejects_sections_exceeding_file() {
        let mut image = build_v1(&[0u8; 4], &[], 0, 0);
        BigEndian::write_u32(&mut image[16..20], 1000); // rodata longer than file
        assert_eq!(load(&image), Err(ImageError::SectionsExceedFile));
    }

    #[test]
    fn v2_header_carries_app_name_and_allow_multiple() {
        let mut buf = vec![0u8; header::V2_HEADER_LEN];
        BigEndian::write_u32(&mut buf[0..4], MAGIC);
        BigEndian::write_u16(&mut buf[4..6], 2);
        BigEndian::write_u16(&mut buf[6..8], HxeFlags::ALLOW_MULTIPLE.bits());
        BigEndian::write_u32(&mut buf[8..12], 0);
        BigEndian::write_u32(&mut buf[12..16], 4);
        BigEndian::write_u32(&mut buf[16..20], 0);
        BigEndian::write_u32(&mut buf[20..24], 0);
        buf[36..36 + 4].copy_from_slice(b"demo");
        BigEndian::write_u32(&mut buf[68..72], 0); // meta_offset
        BigEndian::write_u32(&mut buf[72..76], 0); // meta_count
        buf.extend_from_slice(&[0x60, 0, 0, 0]); // code

        const CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
        let sum = CRC.checksum(&buf);
        BigEndian::write_u32(&mut buf[28..32], sum);

        let loaded = load(&buf).expect("v2 image should load");
        assert_eq!(loaded.header.app_name.as_deref(), Some("demo"));
        assert!(loaded.header.allow_multiple());
    }
}
