//! The canonical representation of wire field types and string padding rules.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The type of a single field on the wire. All multi-byte values are little-endian.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    /// 1 byte, zero-extended.
    Byte,
    /// 4 byte IEEE-754.
    Float,
    /// 8 byte IEEE-754.
    Double,
    /// 2 bytes, zero-extended.
    Short,
    /// 4 bytes, read as unsigned and widened to 64 bits.
    Integer,
    /// 8 bytes, signed.
    Long,
    /// 1 byte, exposed as a one-character string.
    Char,
    /// 2 byte length prefix, NUL-terminated payload, then padding.
    String,
    /// Fields of a nested schema, inline and without a header.
    Object,
}

impl FieldType {
    /// Byte width for fixed-size types; `None` for `String` and `Object`.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            FieldType::Byte | FieldType::Char => Some(1),
            FieldType::Short => Some(2),
            FieldType::Integer | FieldType::Float => Some(4),
            FieldType::Long | FieldType::Double => Some(8),
            FieldType::String | FieldType::Object => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Byte => "BYTE",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Short => "SHORT",
            FieldType::Integer => "INTEGER",
            FieldType::Long => "LONG",
            FieldType::Char => "CHAR",
            FieldType::String => "STRING",
            FieldType::Object => "OBJECT",
        };
        f.write_str(name)
    }
}

/// Bytes skipped after a string payload.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PaddingType {
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "ALIGN_2")]
    Align2,
    #[serde(rename = "ALIGN_4")]
    #[default]
    Align4,
    #[serde(rename = "FIXED_1")]
    Fixed1,
    #[serde(rename = "FIXED_2")]
    Fixed2,
    #[serde(rename = "FIXED_3")]
    Fixed3,
}

/// Width of the `u16` length prefix in front of every string.
pub const STRING_LENGTH_PREFIX: usize = 2;

impl PaddingType {
    /// Padding following a string whose declared length is `string_len`.
    ///
    /// Alignment is computed over prefix + payload + terminator, so for
    /// `Align4` the full string always occupies a multiple of four bytes.
    pub fn padding_for(self, string_len: usize) -> usize {
        let used = STRING_LENGTH_PREFIX + string_len + 1;
        match self {
            PaddingType::None => 0,
            PaddingType::Fixed1 => 1,
            PaddingType::Fixed2 => 2,
            PaddingType::Fixed3 => 3,
            PaddingType::Align2 => (2 - used % 2) % 2,
            PaddingType::Align4 => (4 - used % 4) % 4,
        }
    }

    /// Total bytes a string of `string_len` occupies on the wire.
    pub fn encoded_len(self, string_len: usize) -> usize {
        STRING_LENGTH_PREFIX + string_len + 1 + self.padding_for(string_len)
    }
}
