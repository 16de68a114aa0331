//! Text encodings supported by text mode files.

use std::fmt;

/// Encoding used to convert between text and the bytes stored in a file.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Encoding {
    /// UTF-8, the default.
    #[default]
    Utf8,
    /// UTF-16, little endian.
    Utf16Le,
    /// UTF-16, big endian.
    Utf16Be,
}

impl Encoding {
    /// Maximum number of additional bytes read when a chunk ends inside a
    /// character.
    ///
    /// A UTF-8 character is at most four bytes, a UTF-16 character (a
    /// surrogate pair) at most four, but an odd length chunk can leave a half
    /// code unit on both sides of the pair, hence eight.
    pub const fn max_extra_bytes(self) -> usize {
        match self {
            Encoding::Utf8 => 4,
            Encoding::Utf16Le | Encoding::Utf16Be => 8,
        }
    }

    /// Encode `text`.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            Encoding::Utf16Be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
        }
    }

    /// Returns the number of bytes `text` takes up once encoded.
    pub fn encoded_len(self, text: &str) -> usize {
        match self {
            Encoding::Utf8 => text.len(),
            Encoding::Utf16Le | Encoding::Utf16Be => text.encode_utf16().count() * 2,
        }
    }

    /// Decode `bytes`.
    ///
    /// On error this returns the number of bytes that were valid.
    pub fn decode(self, bytes: &[u8]) -> Result<String, usize> {
        match self {
            Encoding::Utf8 => match std::str::from_utf8(bytes) {
                Ok(text) => Ok(text.to_owned()),
                Err(err) => Err(err.valid_up_to()),
            },
            Encoding::Utf16Le => decode_utf16(bytes, u16::from_le_bytes),
            Encoding::Utf16Be => decode_utf16(bytes, u16::from_be_bytes),
        }
    }
}

fn decode_utf16(bytes: &[u8], from_bytes: fn([u8; 2]) -> u16) -> Result<String, usize> {
    let units = bytes.chunks_exact(2).map(|b| from_bytes([b[0], b[1]]));
    let mut text = String::with_capacity(bytes.len() / 2);
    let mut valid = 0;
    for c in char::decode_utf16(units) {
        match c {
            Ok(c) => {
                text.push(c);
                valid += c.len_utf16() * 2;
            }
            Err(..) => return Err(valid),
        }
    }
    if bytes.len() % 2 != 0 {
        // Half a code unit left.
        return Err(valid);
    }
    Ok(text)
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Utf16Le => "utf-16le",
            Encoding::Utf16Be => "utf-16be",
        })
    }
}
