//! Page-range syntax: `N`, `N-M`, comma separated, 1-indexed, inclusive.
//!
//! Parsing happens in two steps. [`PageRanges::parse`] checks syntax only and
//! runs at the request boundary, before any file is persisted.
//! [`PageRanges::validate`] needs the document's page count and runs once
//! the (normalised) PDF has been opened. Either step rejects the whole
//! request; no range is ever processed partially.
//!
//! Overlapping and repeated ranges are allowed and keep their input order.

use crate::error::FileOpsError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static RE_RANGES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\d+(\s*-\s*\d+)?(\s*,\s*\d+(\s*-\s*\d+)?)*\s*$").unwrap()
});

/// One inclusive, 1-indexed page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Page numbers covered, in order.
    pub fn pages(&self) -> impl Iterator<Item = usize> {
        self.start..=self.end
    }

    /// `"N"` for single pages, `"N-M"` otherwise.
    pub fn label(&self) -> String {
        self.to_string()
    }

    fn check(&self, page_count: usize) -> Result<(), FileOpsError> {
        if self.start < 1 || self.start > self.end || self.end > page_count {
            return Err(FileOpsError::RangeOutOfBounds {
                range: self.label(),
                page_count,
            });
        }
        Ok(())
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// An ordered list of ranges as requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRanges(Vec<PageRange>);

impl PageRanges {
    /// Syntax check and parse. Bounds are not checked here.
    pub fn parse(input: &str) -> Result<Self, FileOpsError> {
        let invalid = || FileOpsError::InvalidPageRange {
            input: input.to_string(),
        };
        if !RE_RANGES.is_match(input) {
            return Err(invalid());
        }

        let mut ranges = Vec::new();
        for part in input.split(',') {
            let (start, end) = match part.split_once('-') {
                Some((s, e)) => (s.trim(), e.trim()),
                None => (part.trim(), part.trim()),
            };
            // The regex guarantees digits; overflow is the only failure left.
            let start: usize = start.parse().map_err(|_| invalid())?;
            let end: usize = end.parse().map_err(|_| invalid())?;
            ranges.push(PageRange::new(start, end));
        }
        Ok(Self(ranges))
    }

    /// Check every range against `page_count`. The first offending range is
    /// reported together with the real page count.
    pub fn validate(&self, page_count: usize) -> Result<(), FileOpsError> {
        self.0.iter().try_for_each(|r| r.check(page_count))
    }

    pub fn as_slice(&self) -> &[PageRange] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PageRange> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a PageRanges {
    type Item = &'a PageRange;
    type IntoIter = std::slice::Iter<'a, PageRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(input: &str) -> Vec<Vec<usize>> {
        PageRanges::parse(input)
            .unwrap()
            .iter()
            .map(|r| r.pages().collect())
            .collect()
    }

    #[test]
    fn parses_mixed_list_in_order() {
        assert_eq!(pages("1,3,5-8"), vec![vec![1], vec![3], vec![5, 6, 7, 8]]);
    }

    #[test]
    fn whitespace_is_tolerated() {
        assert_eq!(pages(" 2 - 3 , 1 "), vec![vec![2, 3], vec![1]]);
    }

    #[test]
    fn order_and_overlap_are_preserved() {
        assert_eq!(pages("4,1-2,2"), vec![vec![4], vec![1, 2], vec![2]]);
    }

    #[test]
    fn syntax_errors() {
        for bad in ["", "1-", "-2", "1,,2", "a", "1-2-3", "1;2", "1.5"] {
            assert!(
                matches!(
                    PageRanges::parse(bad),
                    Err(FileOpsError::InvalidPageRange { .. })
                ),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn bounds_are_checked_per_range() {
        let ranges = PageRanges::parse("1,2-5").unwrap();
        assert!(ranges.validate(5).is_ok());
        match ranges.validate(4) {
            Err(FileOpsError::RangeOutOfBounds { range, page_count }) => {
                assert_eq!(range, "2-5");
                assert_eq!(page_count, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reversed_and_zero_ranges_rejected() {
        assert!(PageRanges::parse("3-2").unwrap().validate(10).is_err());
        assert!(PageRanges::parse("0").unwrap().validate(10).is_err());
    }

    #[test]
    fn labels() {
        assert_eq!(PageRange::new(2, 2).label(), "2");
        assert_eq!(PageRange::new(2, 7).label(), "2-7");
    }
}
