// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decoding of IPMI Platform Management FRU Information Storage data.
//!
//! A FRU image begins with an 8-byte common header: a format version, five
//! area offsets (in multiples of 8 bytes), a pad byte, and a zero-sum
//! checksum. Each present area carries its own format version and length,
//! followed by a sequence of type/length-prefixed fields. This crate knows
//! nothing about how the bytes were obtained; it only validates and decodes
//! them.

use chrono::DateTime;
use indexmap::IndexMap;
use thiserror::Error;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
};

/// Largest FRU image we will decode or write, in bytes.
pub const MAX_FRU_SIZE: usize = 512;

/// Size of the common header, in bytes.
pub const COMMON_HEADER_SIZE: usize = 8;

/// A type/length byte of `0xC1` ends an area's field list.
const FIELD_TERMINATOR: u8 = 0xC1;

/// 1996-01-01T00:00:00Z, the epoch for the board manufacture timestamp.
const FRU_EPOCH_UNIX: i64 = 820_454_400;

/// The five FRU areas, in the order their offsets appear in the common
/// header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FruArea {
    Internal,
    Chassis,
    Board,
    Product,
    MultiRecord,
}

impl FruArea {
    pub const ALL: [FruArea; 5] = [
        FruArea::Internal,
        FruArea::Chassis,
        FruArea::Board,
        FruArea::Product,
        FruArea::MultiRecord,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FruArea::Internal => "INTERNAL",
            FruArea::Chassis => "CHASSIS",
            FruArea::Board => "BOARD",
            FruArea::Product => "PRODUCT",
            FruArea::MultiRecord => "MULTIRECORD",
        }
    }
}

/// Field names for the chassis area, in storage order.
const CHASSIS_FIELDS: &[&str] =
    &["PART_NUMBER", "SERIAL_NUMBER", "INFO_AM1", "INFO_AM2"];

/// Field names for the board area, in storage order.
const BOARD_FIELDS: &[&str] = &[
    "MANUFACTURER",
    "PRODUCT_NAME",
    "SERIAL_NUMBER",
    "PART_NUMBER",
    "FRU_VERSION_ID",
    "INFO_AM1",
    "INFO_AM2",
];

/// Field names for the product area, in storage order.
const PRODUCT_FIELDS: &[&str] = &[
    "MANUFACTURER",
    "PRODUCT_NAME",
    "PART_NUMBER",
    "VERSION",
    "SERIAL_NUMBER",
    "ASSET_TAG",
    "FRU_VERSION_ID",
    "INFO_AM1",
    "INFO_AM2",
];

/// The 8-byte common header at the start of every FRU image.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    FromBytes,
    IntoBytes,
    Unaligned,
    Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct CommonHeader {
    pub format_version: u8,
    /// Area offsets in multiples of 8 bytes from the start of the image;
    /// zero means the area is absent.
    pub offsets: [u8; 5],
    pub pad: u8,
    pub checksum: u8,
}

impl CommonHeader {
    /// Reinterprets the first 8 bytes of `bytes` as a common header, without
    /// validating the contents. Returns `None` if fewer than 8 bytes are
    /// given.
    pub fn parse(bytes: &[u8]) -> Option<&Self> {
        Self::ref_from_prefix(bytes).ok().map(|(header, _)| header)
    }

    /// Checks whether this is a plausible FRU common header: format version
    /// 1, zero pad, no two non-zero area offsets equal, and a correct
    /// checksum. Performs no allocation.
    pub fn validate(&self) -> bool {
        if self.format_version != 1 {
            return false;
        }
        if self.pad != 0 {
            return false;
        }
        // Offsets must be zero or unique; two areas cannot share a start.
        for i in 1..self.offsets.len() {
            if self.offsets[i] == 0 {
                continue;
            }
            if self.offsets[..i].contains(&self.offsets[i]) {
                return false;
            }
        }
        checksum(&self.as_bytes()[..7]) == self.checksum
    }
}

/// Computes the IPMI zero-sum checksum: the two's complement of the byte sum
/// of `bytes`, so that the sum of `bytes` plus the checksum is 0 mod 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |sum, &b| sum.wrapping_add(b))
        .wrapping_neg()
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("FRU image does not extend past the common header")]
    TooShort,
    #[error("{0} area runs past the end of the FRU image")]
    Truncated(&'static str),
}

/// Decoded FRU contents: `<AREA>_<FIELD>` keys in area order, plus
/// `Common_Format_Version` and the per-area type/language/date entries.
pub type FieldMap = IndexMap<String, String>;

/// Decodes a raw FRU image into its field map.
///
/// Values are built byte-for-byte (each stored byte becomes one `char`), with
/// trailing NULs stripped; substitution of non-printable bytes is left to
/// [`sanitize`] so that the decoded map itself stays faithful to the EEPROM
/// contents.
pub fn decode(raw: &[u8]) -> Result<FieldMap, DecodeError> {
    if raw.len() <= COMMON_HEADER_SIZE {
        return Err(DecodeError::TooShort);
    }

    let mut out = FieldMap::new();
    out.insert("Common_Format_Version".to_string(), raw[0].to_string());

    for (slot, area) in FruArea::ALL.iter().enumerate() {
        let offset = usize::from(raw[1 + slot]) * 8;
        if offset == 0 {
            continue;
        }

        // Skip the area's own format version and length bytes.
        let mut cursor = offset + 2;
        if cursor >= raw.len() {
            return Err(DecodeError::Truncated(area.name()));
        }

        let fields: &[&str] = match area {
            FruArea::Chassis => {
                out.insert(
                    "CHASSIS_TYPE".to_string(),
                    raw[cursor].to_string(),
                );
                cursor += 1;
                CHASSIS_FIELDS
            }
            FruArea::Board => {
                out.insert(
                    "BOARD_LANGUAGE_CODE".to_string(),
                    raw[cursor].to_string(),
                );
                cursor += 1;
                if cursor + 3 > raw.len() {
                    return Err(DecodeError::Truncated(area.name()));
                }
                let minutes = u32::from(raw[cursor])
                    | u32::from(raw[cursor + 1]) << 8
                    | u32::from(raw[cursor + 2]) << 16;
                out.insert(
                    "BOARD_MANUFACTURE_DATE".to_string(),
                    manufacture_date(minutes),
                );
                cursor += 3;
                BOARD_FIELDS
            }
            FruArea::Product => {
                out.insert(
                    "PRODUCT_LANGUAGE_CODE".to_string(),
                    raw[cursor].to_string(),
                );
                cursor += 1;
                PRODUCT_FIELDS
            }
            // Internal-use and multirecord areas carry no typed fields.
            FruArea::Internal | FruArea::MultiRecord => continue,
        };

        for field in fields {
            if cursor >= raw.len() {
                return Err(DecodeError::Truncated(area.name()));
            }
            if raw[cursor] == FIELD_TERMINATOR {
                break;
            }
            // Low six bits are the value length; the two type bits are not
            // interpreted here.
            let len = usize::from(raw[cursor] & 0x3f);
            cursor += 1;
            if cursor >= raw.len() {
                return Err(DecodeError::Truncated(area.name()));
            }
            let end = cursor + len;
            // A field reaching the last byte leaves no room for the
            // terminator, so the declared area length was a lie.
            if end >= raw.len() {
                return Err(DecodeError::Truncated(area.name()));
            }
            let value: String =
                raw[cursor..end].iter().map(|&b| b as char).collect();
            out.insert(
                format!("{}_{}", area.name(), field),
                value.trim_end_matches('\0').to_string(),
            );
            cursor = end;
        }
    }

    Ok(out)
}

/// Renders a board manufacture timestamp: minutes since 1996-01-01T00:00:00Z
/// as a UTC calendar string.
pub fn manufacture_date(minutes: u32) -> String {
    let secs = FRU_EPOCH_UNIX + i64::from(minutes) * 60;
    match DateTime::from_timestamp(secs, 0) {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        // Unreachable for a 24-bit minute count, which tops out in 2027.
        None => String::new(),
    }
}

/// Replaces every character outside 0x01..=0x7F with an underscore, for
/// values headed to the object bus. Decoded map values are left untouched.
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if ('\x01'..='\x7f').contains(&c) { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn check_header(bytes: [u8; 8], expected: bool) {
        let header = CommonHeader::parse(&bytes).unwrap();
        assert_eq!(
            header.validate(),
            expected,
            "validating header: {bytes:02x?}"
        );
    }

    /// Builds an area image: format version, length-in-multiples-of-8, the
    /// given body, padded with zeros to a multiple of 8.
    fn build_area(body: &[u8]) -> Vec<u8> {
        let total = (body.len() + 2).div_ceil(8) * 8;
        let mut area = vec![0x01, (total / 8) as u8];
        area.extend_from_slice(body);
        area.resize(total, 0);
        area
    }

    /// Assembles a full FRU image from optional area bodies, computing
    /// offsets and the header checksum.
    fn build_fru(
        chassis: Option<&[u8]>,
        board: Option<&[u8]>,
        product: Option<&[u8]>,
    ) -> Vec<u8> {
        let mut header = vec![0x01u8, 0, 0, 0, 0, 0, 0];
        let mut image = Vec::new();
        let mut next = COMMON_HEADER_SIZE;
        for (slot, body) in
            [(2, chassis), (3, board), (4, product)]
        {
            if let Some(body) = body {
                let area = build_area(body);
                header[slot] = (next / 8) as u8;
                next += area.len();
                image.extend_from_slice(&area);
            }
        }
        header.push(checksum(&header));
        let mut fru = header;
        fru.extend_from_slice(&image);
        fru
    }

    #[test]
    fn header_valid() {
        check_header([0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0xFE], true);
    }

    #[test]
    fn header_bad_version() {
        check_header([0x02, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0xFE], false);
    }

    #[test]
    fn header_bad_pad() {
        check_header([0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0xFE], false);
    }

    #[test]
    fn header_duplicate_offsets() {
        // Bytes 1 and 2 both 0x01; checksum adjusted to be correct so the
        // duplicate check is what rejects.
        check_header([0x01, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0xFD], false);
    }

    #[test]
    fn header_bad_checksum() {
        check_header([0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0xFF], false);
    }

    #[test]
    fn header_zero_offsets_ok() {
        // All areas absent is still a valid header.
        check_header([0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF], true);
    }

    #[test]
    fn checksum_zero_sums() {
        let bytes = [0x01, 0x02, 0x03];
        let ck = checksum(&bytes);
        let total: u8 = bytes
            .iter()
            .fold(0u8, |a, &b| a.wrapping_add(b))
            .wrapping_add(ck);
        assert_eq!(total, 0);
    }

    #[test]
    fn decode_full_image() {
        let fru = build_fru(
            Some(&[0x17, 0xC3, b'P', b'N', b'1', 0xC2, b'S', b'N', 0xC1]),
            Some(&[
                0x00, 0x10, 0x27, 0x00, // language 0, minutes 10000
                0xC4, b'A', b'C', b'M', b'E', // manufacturer
                0xC7, b'G', b'I', b'M', b'L', b'E', b'T', b'1', 0xC1,
            ]),
            Some(&[
                0x19, // language 25
                0xC4, b'A', b'C', b'M', b'E', 0xC5, b'W', b'I', b'D', b'G',
                b'T', 0xC1,
            ]),
        );
        let map = decode(&fru).unwrap();

        assert_eq!(map["Common_Format_Version"], "1");
        assert_eq!(map["CHASSIS_TYPE"], "23");
        assert_eq!(map["CHASSIS_PART_NUMBER"], "PN1");
        assert_eq!(map["CHASSIS_SERIAL_NUMBER"], "SN");
        assert_eq!(map["BOARD_LANGUAGE_CODE"], "0");
        assert_eq!(map["BOARD_MANUFACTURE_DATE"], "1996-01-07 22:40:00");
        assert_eq!(map["BOARD_MANUFACTURER"], "ACME");
        assert_eq!(map["BOARD_PRODUCT_NAME"], "GIMLET1");
        assert_eq!(map["PRODUCT_LANGUAGE_CODE"], "25");
        assert_eq!(map["PRODUCT_MANUFACTURER"], "ACME");
        assert_eq!(map["PRODUCT_PRODUCT_NAME"], "WIDGT");
        assert!(!map.contains_key("BOARD_SERIAL_NUMBER"));
    }

    #[test]
    fn decode_terminator_stops_field_walk() {
        // ACME followed by the 0xC1 terminator; trailing junk after the
        // terminator must not be decoded as further fields.
        let fru = build_fru(
            None,
            Some(&[
                0x00, 0x00, 0x00, 0x00, 0xC4, b'A', b'C', b'M', b'E', 0xC1,
                0xC2, b'X', b'X',
            ]),
            None,
        );
        let map = decode(&fru).unwrap();
        assert_eq!(map["BOARD_MANUFACTURER"], "ACME");
        assert!(!map.contains_key("BOARD_PRODUCT_NAME"));
    }

    #[test]
    fn decode_strips_trailing_nuls() {
        let fru = build_fru(
            None,
            None,
            Some(&[0x00, 0xC4, b'A', b'B', 0x00, 0x00, 0xC1]),
        );
        let map = decode(&fru).unwrap();
        assert_eq!(map["PRODUCT_MANUFACTURER"], "AB");
    }

    #[test]
    fn decode_fails_mid_field() {
        // A chassis field whose declared length runs past the end of the
        // image.
        let mut fru = build_fru(
            Some(&[0x17, 0xC8, b'P', b'N', 0xC1]),
            None,
            None,
        );
        fru.truncate(13);
        assert_eq!(decode(&fru), Err(DecodeError::Truncated("CHASSIS")));
    }

    #[test]
    fn decode_fails_field_at_exact_end() {
        // Field data that consumes the final byte leaves no room for a
        // terminator.
        let mut fru = build_fru(Some(&[0x17, 0xC3, b'P', b'N', b'1']), None, None);
        fru.truncate(15);
        assert!(decode(&fru).is_err());
    }

    #[test]
    fn decode_header_only_too_short() {
        let fru = [0x01, 0, 0, 0, 0, 0, 0, 0xFF];
        assert_eq!(decode(&fru), Err(DecodeError::TooShort));
    }

    #[test]
    fn decode_no_areas() {
        let mut fru = vec![0x01u8, 0, 0, 0, 0, 0, 0];
        fru.push(checksum(&fru));
        fru.push(0);
        let map = decode(&fru).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["Common_Format_Version"], "1");
    }

    #[test]
    fn manufacture_date_epoch() {
        assert_eq!(manufacture_date(0), "1996-01-01 00:00:00");
    }

    #[test]
    fn manufacture_date_minutes_add() {
        // 10000 minutes is 6 days, 22 hours, 40 minutes.
        assert_eq!(manufacture_date(10000), "1996-01-07 22:40:00");
    }

    #[test]
    fn sanitize_replaces_out_of_range() {
        let raw: String = [0x41u8, 0xFF, 0x42, 0x00, 0x7F]
            .iter()
            .map(|&b| b as char)
            .collect();
        assert_eq!(sanitize(&raw), "A_B_\x7f");
    }

    #[test]
    fn sanitize_leaves_ascii() {
        assert_eq!(sanitize("Board-Rev 2!"), "Board-Rev 2!");
    }
}
