use std::ops::Bound;

use prost::bytes::Bytes;

/// A contiguous range of row keys.
///
/// An empty key used as a bound is the same as an unbounded side, which is how the service
/// interprets it as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRange {
    start: Bound<Bytes>,
    end: Bound<Bytes>,
}

fn normalize(bound: Bound<Bytes>) -> Bound<Bytes> {
    match bound {
        Bound::Included(key) | Bound::Excluded(key) if key.is_empty() => Bound::Unbounded,
        other => other,
    }
}

impl RowRange {
    pub fn new(start: Bound<Bytes>, end: Bound<Bytes>) -> Self {
        Self {
            start: normalize(start),
            end: normalize(end),
        }
    }

    /// The range covering the whole table.
    pub fn unbounded() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    /// `[start, end)`
    pub fn closed_open(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self::new(Bound::Included(start.into()), Bound::Excluded(end.into()))
    }

    /// `[start, end]`
    pub fn closed(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self::new(Bound::Included(start.into()), Bound::Included(end.into()))
    }

    /// `(start, end)`
    pub fn open(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self::new(Bound::Excluded(start.into()), Bound::Excluded(end.into()))
    }

    /// The range of every key starting with `prefix`.
    ///
    /// The end of the range is the smallest key greater than every key with this prefix, which is
    /// the prefix with trailing `0xff` bytes removed and its last byte incremented.
    /// A prefix made only of `0xff` bytes has no such key and the range is unbounded on the right.
    pub fn prefix(prefix: impl Into<Bytes>) -> Self {
        let prefix = prefix.into();
        let end = match prefix_successor(&prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        Self::new(Bound::Included(prefix), end)
    }

    pub fn start(&self) -> &Bound<Bytes> {
        &self.start
    }

    pub fn end(&self) -> &Bound<Bytes> {
        &self.end
    }

    /// Returns true if the range can only contain keys strictly greater than `key`.
    fn starts_after(&self, key: &[u8]) -> bool {
        match &self.start {
            Bound::Unbounded => false,
            Bound::Included(start) | Bound::Excluded(start) => &start[..] > key,
        }
    }

    /// Returns true if the range contains keys strictly greater than `key`.
    fn ends_after(&self, key: &[u8]) -> bool {
        match &self.end {
            Bound::Unbounded => true,
            Bound::Included(end) | Bound::Excluded(end) => key < &end[..],
        }
    }

    /// Narrows this range to the keys strictly greater than `last`.
    ///
    /// Returns `None` when every key of the range is less than or equal to `last`.
    pub fn resume_after(&self, last: &[u8]) -> Option<RowRange> {
        if self.starts_after(last) {
            Some(self.clone())
        } else if self.ends_after(last) {
            Some(RowRange {
                start: Bound::Excluded(Bytes::copy_from_slice(last)),
                end: self.end.clone(),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let after_start = match &self.start {
            Bound::Unbounded => true,
            Bound::Included(start) => key >= &start[..],
            Bound::Excluded(start) => key > &start[..],
        };
        let before_end = match &self.end {
            Bound::Unbounded => true,
            Bound::Included(end) => key <= &end[..],
            Bound::Excluded(end) => key < &end[..],
        };
        after_start && before_end
    }
}

fn prefix_successor(prefix: &[u8]) -> Option<Bytes> {
    let mut end = prefix.to_vec();
    while end.last() == Some(&0xff) {
        end.pop();
    }
    let last = end.last_mut()?;
    *last += 1;
    Some(end.into())
}

/// The canonical set of rows to read: explicit keys and key ranges.
///
/// Note that the service reads the whole table when given an empty set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    keys: Vec<Bytes>,
    ranges: Vec<RowRange>,
}

impl RowSet {
    pub fn new(keys: Vec<Bytes>, ranges: Vec<RowRange>) -> Self {
        Self { keys, ranges }
    }

    pub fn keys(&self) -> &[Bytes] {
        &self.keys
    }

    pub fn ranges(&self) -> &[RowRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.ranges.is_empty()
    }

    /// Returns the subset of this set that contains only keys strictly greater than `last`.
    ///
    /// Applying it twice with the same key is the same as applying it once.
    pub fn resume_after(&self, last: &[u8]) -> RowSet {
        RowSet {
            keys: self
                .keys
                .iter()
                .filter(|key| &key[..] > last)
                .cloned()
                .collect(),
            ranges: self
                .ranges
                .iter()
                .filter_map(|range| range.resume_after(last))
                .collect(),
        }
    }
}

impl From<Vec<Bytes>> for RowSet {
    fn from(keys: Vec<Bytes>) -> Self {
        Self {
            keys,
            ranges: vec![],
        }
    }
}

impl From<RowRange> for RowSet {
    fn from(range: RowRange) -> Self {
        Self {
            keys: vec![],
            ranges: vec![range],
        }
    }
}

/// The shapes in which a caller may describe the rows to read.
///
/// Each shape is normalized into a [`RowSet`] before being sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSelection {
    /// The whole table.
    All,
    /// Explicit keys and ranges.
    Rows(RowSet),
    /// Every key starting with a prefix.
    Prefix(Bytes),
    /// Every key starting with any of the prefixes.
    Prefixes(Vec<Bytes>),
    /// The keys between `start` and `end`, both inclusive. Absent bounds are unbounded.
    Span {
        start: Option<Bytes>,
        end: Option<Bytes>,
    },
}

impl RowSelection {
    pub fn into_row_set(self) -> RowSet {
        match self {
            RowSelection::All => RowSet::default(),
            RowSelection::Rows(row_set) => row_set,
            RowSelection::Prefix(prefix) => RowRange::prefix(prefix).into(),
            RowSelection::Prefixes(prefixes) => RowSet {
                keys: vec![],
                ranges: prefixes.into_iter().map(RowRange::prefix).collect(),
            },
            RowSelection::Span { start, end } => {
                let bound = |key: Option<Bytes>| key.map_or(Bound::Unbounded, Bound::Included);
                RowRange::new(bound(start), bound(end)).into()
            }
        }
    }
}
