use prost::bytes::Bytes;

use crate::{RowRange, RowSet};

/// The rows to ask for on the next attempt of a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeRequest {
    pub row_set: RowSet,
    /// The number of rows still wanted, if the read is limited.
    pub rows_limit: Option<u64>,
}

/// Progress of one read operation across all of its attempts.
///
/// The state only moves forward: the last key never decreases, and the row set only ever shrinks
/// to the part of the original request that was not yet delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumptionState {
    row_set: RowSet,
    limit: Option<u64>,
    rows_read: u64,
    last_row_key: Option<Bytes>,
}

impl ResumptionState {
    /// An empty row set means the whole table; it is represented as a single unbounded range so
    /// that narrowing treats every request alike.
    pub fn new(row_set: RowSet, limit: Option<u64>) -> Self {
        let row_set = if row_set.is_empty() {
            RowSet::from(RowRange::unbounded())
        } else {
            row_set
        };
        Self {
            row_set,
            limit,
            rows_read: 0,
            last_row_key: None,
        }
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn last_row_key(&self) -> Option<&Bytes> {
        self.last_row_key.as_ref()
    }

    pub fn limit_reached(&self) -> bool {
        matches!(self.limit, Some(limit) if self.rows_read >= limit)
    }

    /// Builds the request for the next attempt.
    ///
    /// Returns `None` when nothing is left to read: the limit is reached, or every key and range
    /// of the original request lies at or before the last delivered key.
    pub fn next_request(&mut self) -> Option<ResumeRequest> {
        if self.limit_reached() {
            return None;
        }
        if let Some(last) = &self.last_row_key {
            self.row_set = self.row_set.resume_after(last);
            if self.row_set.is_empty() {
                return None;
            }
        }
        Some(ResumeRequest {
            row_set: self.row_set.clone(),
            rows_limit: self.limit.map(|limit| limit - self.rows_read),
        })
    }

    /// Records a row about to be delivered.
    ///
    /// Returns false if the row was already delivered, or lies at or before a key the server
    /// reported as scanned. Such a row must be dropped.
    pub fn record_row(&mut self, key: &Bytes) -> bool {
        if self.is_behind(key) {
            return false;
        }
        self.last_row_key = Some(key.clone());
        self.rows_read += 1;
        true
    }

    /// Records that the server scanned up to `key` without finding further rows.
    pub fn record_scanned(&mut self, key: Bytes) {
        if !self.is_behind(&key) {
            self.last_row_key = Some(key);
        }
    }

    fn is_behind(&self, key: &Bytes) -> bool {
        matches!(&self.last_row_key, Some(last) if key <= last)
    }
}

#[cfg(test)]
mod test {
    use std::ops::Bound;

    use super::*;

    fn key(k: &str) -> Bytes {
        Bytes::copy_from_slice(k.as_bytes())
    }

    fn keys(ks: &[&str]) -> Vec<Bytes> {
        ks.iter().map(|k| key(k)).collect()
    }

    #[test]
    fn test_full_scan_is_one_unbounded_range() {
        let mut state = ResumptionState::new(RowSet::default(), None);
        assert_eq!(
            state.next_request(),
            Some(ResumeRequest {
                row_set: RowSet::from(RowRange::unbounded()),
                rows_limit: None,
            })
        );
        assert!(state.record_row(&key("c")));
        assert_eq!(
            state.next_request().unwrap().row_set,
            RowSet::from(RowRange::new(Bound::Excluded(key("c")), Bound::Unbounded))
        );
    }

    #[test]
    fn test_first_request_is_unchanged() {
        let row_set = RowSet::new(keys(&["a", "b"]), vec![RowRange::closed("c", "d")]);
        let mut state = ResumptionState::new(row_set.clone(), Some(10));
        assert_eq!(
            state.next_request(),
            Some(ResumeRequest {
                row_set,
                rows_limit: Some(10),
            })
        );
    }

    #[test]
    fn test_narrowing_drops_read_keys_and_ranges() {
        let mut state = ResumptionState::new(
            RowSet::new(
                keys(&["a", "b", "x"]),
                vec![RowRange::closed("a", "b"), RowRange::closed_open("c", "m")],
            ),
            None,
        );
        assert!(state.record_row(&key("a")));
        assert!(state.record_row(&key("b")));
        assert!(state.record_row(&key("d")));
        let request = state.next_request().unwrap();
        assert_eq!(request.row_set.keys(), &keys(&["x"])[..]);
        assert_eq!(request.row_set.ranges(), &[RowRange::open("d", "m")]);
    }

    #[test]
    fn test_complete_when_everything_read() {
        let mut state = ResumptionState::new(RowSet::from(keys(&["a", "b"])), None);
        assert!(state.next_request().is_some());
        assert!(state.record_row(&key("a")));
        assert!(state.next_request().is_some());
        assert!(state.record_row(&key("b")));
        assert_eq!(state.next_request(), None);
    }

    #[test]
    fn test_limit() {
        let mut state = ResumptionState::new(RowSet::default(), Some(5));
        assert!(state.record_row(&key("a")));
        assert!(state.record_row(&key("b")));
        assert_eq!(state.next_request().unwrap().rows_limit, Some(3));
        for k in ["c", "d", "e"] {
            assert!(state.record_row(&key(k)));
        }
        assert!(state.limit_reached());
        assert_eq!(state.next_request(), None);
        assert_eq!(state.rows_read(), 5);
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let mut state = ResumptionState::new(RowSet::default(), None);
        assert!(state.record_row(&key("b")));
        // equal to the last delivered key
        assert!(!state.record_row(&key("b")));
        assert!(!state.record_row(&key("a")));
        assert!(state.record_row(&key("c")));
        assert_eq!(state.rows_read(), 2);
    }

    #[test]
    fn test_scanned_key() {
        let mut state = ResumptionState::new(RowSet::from(RowRange::closed("a", "z")), Some(10));
        assert!(state.record_row(&key("b")));
        state.record_scanned(key("k"));
        // scanned rows are not counted
        assert_eq!(state.rows_read(), 1);
        assert_eq!(state.last_row_key(), Some(&key("k")));
        // a row at the scanned key is not delivered again
        assert!(!state.record_row(&key("k")));
        // a stale scanned key does not move progress back
        state.record_scanned(key("c"));
        assert_eq!(state.last_row_key(), Some(&key("k")));

        let request = state.next_request().unwrap();
        assert_eq!(
            request.row_set.ranges(),
            &[RowRange::new(
                Bound::Excluded(key("k")),
                Bound::Included(key("z"))
            )]
        );
        assert_eq!(request.rows_limit, Some(9));
    }

    #[test]
    fn test_next_request_is_idempotent() {
        let mut state = ResumptionState::new(
            RowSet::new(
                keys(&["b", "e"]),
                vec![RowRange::closed("a", "c"), RowRange::prefix("d")],
            ),
            Some(100),
        );
        assert!(state.record_row(&key("b")));
        let first = state.next_request();
        let second = state.next_request();
        assert_eq!(first, second);

        let mut fresh = ResumptionState::new(state.row_set.clone(), Some(100));
        fresh.rows_read = 1;
        fresh.last_row_key = Some(key("b"));
        assert_eq!(fresh.next_request(), first);
    }
}
