//! Encoding normalization for tailed files.
//!
//! Files may be declared as UTF-8, GBK, or UTF-16; everything downstream of
//! the reader operates on UTF-8. Decoding is greedy: a read that ends in the
//! middle of a multi-byte character consumes only up to the last complete
//! character and leaves the tail for the next read, so a fixed-size buffer
//! never splits a character.

use serde::{Deserialize, Serialize};

/// Declared on-disk encoding of a tailed file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEncoding {
    #[default]
    Utf8,
    Gbk,
    Utf16Le,
    Utf16Be,
}

impl FileEncoding {
    /// Parses the configuration spelling. `utf16` means little-endian.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Some(FileEncoding::Utf8),
            "gbk" => Some(FileEncoding::Gbk),
            "utf16" | "utf16le" | "utf-16le" => Some(FileEncoding::Utf16Le),
            "utf16be" | "utf-16be" => Some(FileEncoding::Utf16Be),
            _ => None,
        }
    }

    fn encoding(self) -> &'static encoding_rs::Encoding {
        match self {
            FileEncoding::Utf8 => encoding_rs::UTF_8,
            FileEncoding::Gbk => encoding_rs::GBK,
            FileEncoding::Utf16Le => encoding_rs::UTF_16LE,
            FileEncoding::Utf16Be => encoding_rs::UTF_16BE,
        }
    }
}

/// Result of one normalization pass: UTF-8 output plus the number of input
/// bytes consumed. `consumed < input.len()` means the input ended with a
/// partial character the caller must re-feed on the next read.
#[derive(Debug)]
pub struct Transcoded {
    pub utf8: Vec<u8>,
    pub consumed: usize,
    pub had_errors: bool,
}

/// Returns the largest `m <= n` such that `buf[..m]` ends on a character
/// boundary for the declared encoding.
#[must_use]
pub fn align_last_character(buf: &[u8], n: usize, encoding: FileEncoding) -> usize {
    let n = n.min(buf.len());
    match encoding {
        FileEncoding::Utf8 => align_utf8(buf, n),
        FileEncoding::Gbk => align_gbk(buf, n),
        FileEncoding::Utf16Le => align_utf16(buf, n, false),
        FileEncoding::Utf16Be => align_utf16(buf, n, true),
    }
}

fn align_utf8(buf: &[u8], n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    // Walk back at most 3 bytes looking for a lead byte; if the sequence it
    // opens would run past n, cut before it.
    let mut i = n - 1;
    let lookback = n.saturating_sub(4);
    loop {
        let b = buf[i];
        if b < 0x80 {
            return n;
        }
        if b >= 0xC0 {
            let width = if b >= 0xF0 {
                4
            } else if b >= 0xE0 {
                3
            } else {
                2
            };
            return if i + width > n { i } else { n };
        }
        // continuation byte, keep walking
        if i == lookback || i == 0 {
            return n;
        }
        i -= 1;
    }
}

fn align_gbk(buf: &[u8], n: usize) -> usize {
    // GBK characters are one byte (< 0x80) or two bytes (lead 0x81..=0xFE).
    // Pair boundaries are only known from the front, so scan forward.
    let mut i = 0;
    while i < n {
        let b = buf[i];
        if (0x81..=0xFE).contains(&b) {
            if i + 2 > n {
                return i;
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    n
}

fn align_utf16(buf: &[u8], n: usize, big_endian: bool) -> usize {
    let mut m = n - (n % 2);
    if m < 2 {
        return m;
    }
    // A trailing high surrogate starts a pair whose low half has not arrived.
    let unit = if big_endian {
        u16::from_be_bytes([buf[m - 2], buf[m - 1]])
    } else {
        u16::from_le_bytes([buf[m - 2], buf[m - 1]])
    };
    if (0xD800..0xDC00).contains(&unit) {
        m -= 2;
    }
    m
}

/// Converts `input` to UTF-8 under the declared encoding.
///
/// The conversion first aligns to the last complete character, then decodes
/// the aligned prefix; malformed sequences inside the prefix are replaced
/// with U+FFFD and reported via `had_errors`.
#[must_use]
pub fn decode_to_utf8(input: &[u8], encoding: FileEncoding) -> Transcoded {
    let consumed = align_last_character(input, input.len(), encoding);
    if encoding == FileEncoding::Utf8 {
        return Transcoded {
            utf8: input[..consumed].to_vec(),
            consumed,
            had_errors: false,
        };
    }
    let (decoded, had_errors) = encoding
        .encoding()
        .decode_without_bom_handling(&input[..consumed]);
    Transcoded {
        utf8: decoded.into_owned().into_bytes(),
        consumed,
        had_errors,
    }
}
