//! Content digests for stored entities.
//!
//! Digests are SHA-256 hex over a canonical byte stream: a domain label,
//! then labelled sections separated by NUL markers so that adjacent sections
//! cannot collide. Cells are hashed as compact JSON, one cell per line.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::storage_traits::StorageResult;

/// Incremental digest over labelled sections.
pub struct DigestBuilder {
    hasher: Sha256,
}

impl DigestBuilder {
    pub fn new(domain: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"D:");
        hasher.update(domain.as_bytes());
        hasher.update(b"\0");
        Self { hasher }
    }

    /// Start a new named section.
    pub fn section(&mut self, label: &str) {
        self.hasher.update(b"S:");
        self.hasher.update(label.as_bytes());
        self.hasher.update(b"\0");
    }

    /// Hash a sequence of cells in the order given.
    pub fn cells<T: Serialize>(&mut self, cells: &[T]) -> StorageResult<()> {
        self.hasher.update(b"N:");
        self.hasher.update(cells.len().to_string().as_bytes());
        self.hasher.update(b"\0");
        for cell in cells {
            let line = serde_json::to_vec(cell)?;
            self.hasher.update(&line);
            self.hasher.update(b"\n");
        }
        Ok(())
    }

    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Short form of a digest (first 8 hex chars), for file names and logs.
pub fn short(digest: &str) -> &str {
    digest.get(..8).unwrap_or(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CellValue, ParamCell};

    fn cell(v: f64) -> ParamCell {
        ParamCell {
            sub_id: 0,
            dims: vec![],
            value: CellValue::Float(v),
        }
    }

    #[test]
    fn test_same_input_same_digest() {
        let mut a = DigestBuilder::new("run");
        a.section("P1");
        a.cells(&[cell(1.0)]).unwrap();
        let mut b = DigestBuilder::new("run");
        b.section("P1");
        b.cells(&[cell(1.0)]).unwrap();
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn test_section_boundaries_matter() {
        let mut a = DigestBuilder::new("run");
        a.section("AB");
        a.section("C");
        let mut b = DigestBuilder::new("run");
        b.section("A");
        b.section("BC");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_value_change_changes_digest() {
        let mut a = DigestBuilder::new("run");
        a.cells(&[cell(1.0)]).unwrap();
        let mut b = DigestBuilder::new("run");
        b.cells(&[cell(2.0)]).unwrap();
        let da = a.finish();
        assert_eq!(da.len(), 64);
        assert_ne!(da, b.finish());
    }

    #[test]
    fn test_short() {
        assert_eq!(short("0123456789abcdef"), "01234567");
        assert_eq!(short("abc"), "abc");
    }
}
