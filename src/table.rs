//! The byte-substitution table shared by path and content transforms.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

/// Fixed 256-entry byte-to-byte mapping.
///
/// ASCII letters are rotated 13 positions forward within their own case;
/// every other byte maps to itself. A 13-rotation over a 26-letter alphabet
/// is self-inverse, so a single table serves both directions: applying it
/// to plaintext obfuscates, applying it to obfuscated bytes reveals.
///
/// Built once at startup and shared read-only by every operation. The type
/// is `Copy`, so handlers take it by value with no synchronization.
#[derive(Debug, Clone, Copy)]
pub struct SubstitutionTable {
    entries: [u8; 256],
}

impl SubstitutionTable {
    /// Builds the table: identity everywhere, then the 13-rotation over
    /// both alphabets.
    pub fn new() -> Self {
        let mut entries: [u8; 256] = std::array::from_fn(|i| i as u8);
        for i in 0..26u8 {
            let offset = (i + 13) % 26;
            entries[usize::from(b'A' + i)] = b'A' + offset;
            entries[usize::from(b'a' + i)] = b'a' + offset;
        }
        Self { entries }
    }

    /// Maps a single byte.
    #[inline]
    pub fn apply(&self, byte: u8) -> u8 {
        self.entries[usize::from(byte)]
    }

    /// Maps a buffer into a new owned buffer.
    pub fn transform(&self, input: &[u8]) -> Vec<u8> {
        input.iter().map(|&b| self.apply(b)).collect()
    }

    /// Maps a buffer in place. Used on the read path so the bytes the
    /// backing store produced are revealed without a second copy.
    pub fn transform_in_place(&self, buffer: &mut [u8]) {
        for byte in buffer {
            *byte = self.apply(*byte);
        }
    }

    /// Maps a path component or directory-entry name byte-wise.
    ///
    /// Operates on raw Unix bytes; names are not required to be UTF-8.
    pub fn transform_os(&self, name: &OsStr) -> OsString {
        OsString::from_vec(self.transform(name.as_bytes()))
    }
}

impl Default for SubstitutionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_involution_over_all_bytes() {
        let table = SubstitutionTable::new();
        for b in 0..=255u8 {
            assert_eq!(table.apply(table.apply(b)), b, "byte {b} must round-trip");
        }
    }

    #[test]
    fn test_non_letters_are_fixed_points() {
        let table = SubstitutionTable::new();
        for b in 0..=255u8 {
            if !b.is_ascii_alphabetic() {
                assert_eq!(table.apply(b), b, "non-letter byte {b} must map to itself");
            }
        }
    }

    #[test]
    fn test_known_letter_mappings() {
        let table = SubstitutionTable::new();
        assert_eq!(table.apply(b'a'), b'n');
        assert_eq!(table.apply(b'n'), b'a');
        assert_eq!(table.apply(b'A'), b'N');
        assert_eq!(table.apply(b'Z'), b'M');
        assert_eq!(table.apply(b'm'), b'z');
    }

    #[test]
    fn test_case_is_preserved() {
        let table = SubstitutionTable::new();
        for b in b'a'..=b'z' {
            assert!(table.apply(b).is_ascii_lowercase());
        }
        for b in b'A'..=b'Z' {
            assert!(table.apply(b).is_ascii_uppercase());
        }
    }

    #[test]
    fn test_transform_buffer() {
        let table = SubstitutionTable::new();
        assert_eq!(table.transform(b"abc"), b"nop");
        assert_eq!(table.transform(b"XYZ"), b"KLM");
        assert_eq!(table.transform(b"A1."), b"N1.");
        assert_eq!(table.transform(b"/path/sep.txt"), b"/cngu/frc.gkg");
    }

    #[test]
    fn test_transform_in_place_matches_transform() {
        let table = SubstitutionTable::new();
        let mut buf = b"Hello, World! 123".to_vec();
        let expected = table.transform(&buf);
        table.transform_in_place(&mut buf);
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_transform_os_non_utf8() {
        let table = SubstitutionTable::new();
        let raw = OsStr::from_bytes(&[b'a', 0xff, b'Z']);
        let out = table.transform_os(raw);
        assert_eq!(out.as_bytes(), &[b'n', 0xff, b'M']);
    }
}
