//! A1-style cell addresses
//!
//! Rows and columns are 1-based, matching what users see in a spreadsheet.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest row index in an .xlsx worksheet
pub const MAX_ROW: u32 = 1_048_576;
/// Largest column index in an .xlsx worksheet (XFD)
pub const MAX_COL: u32 = 16_384;

/// A sheet-relative cell address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellAddress {
    /// 1-based row
    pub row: u32,
    /// 1-based column
    pub col: u32,
}

impl CellAddress {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Parse "A1", "$B$12" or "xfd1048576". Returns None for anything else.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let bytes = text.as_bytes();
        let mut i = 0;

        if bytes.get(i) == Some(&b'$') {
            i += 1;
        }
        let col_start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
            i += 1;
        }
        let letters = &text[col_start..i];
        if letters.is_empty() || letters.len() > 3 {
            return None;
        }

        if bytes.get(i) == Some(&b'$') {
            i += 1;
        }
        let digits = &text[i..];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let col = column_index(letters)?;
        let row: u32 = digits.parse().ok()?;
        if row == 0 || row > MAX_ROW || col > MAX_COL {
            return None;
        }
        Some(Self { row, col })
    }

    /// The column part of the address ("A", "AB", ...)
    pub fn column_letters(&self) -> String {
        column_letters(self.col)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letters(self.col), self.row)
    }
}

/// Convert a 1-based column number to letters (1 → A, 27 → AA)
pub fn column_letters(col: u32) -> String {
    let mut result = String::new();
    let mut n = col;
    while n > 0 {
        let remainder = (n - 1) % 26;
        result.insert(0, (b'A' + remainder as u8) as char);
        n = (n - 1) / 26;
    }
    result
}

/// Convert column letters to a 1-based column number (A → 1, AA → 27)
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    let mut col: u32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u8 - b'A' + 1) as u32;
        col = col.checked_mul(26)?.checked_add(digit)?;
    }
    Some(col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters_round_trip_edges() {
        assert_eq!(column_letters(1), "A");
        assert_eq!(column_letters(26), "Z");
        assert_eq!(column_letters(27), "AA");
        assert_eq!(column_letters(MAX_COL), "XFD");
        assert_eq!(column_index("xfd"), Some(MAX_COL));
    }

    #[test]
    fn test_parse_absolute_and_relative() {
        assert_eq!(CellAddress::parse("A1"), Some(CellAddress::new(1, 1)));
        assert_eq!(CellAddress::parse("$B$12"), Some(CellAddress::new(12, 2)));
        assert_eq!(CellAddress::parse("b$3"), Some(CellAddress::new(3, 2)));
    }

    #[test]
    fn test_parse_rejects_non_addresses() {
        assert_eq!(CellAddress::parse("SUM"), None);
        assert_eq!(CellAddress::parse("A0"), None);
        assert_eq!(CellAddress::parse("ABCD1"), None);
        assert_eq!(CellAddress::parse("A1B"), None);
        assert_eq!(CellAddress::parse("A1048577"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(CellAddress::new(10, 28).to_string(), "AB10");
    }
}
