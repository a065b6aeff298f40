//! Synchronization cursor handed out by the server.
//!
//! The cursor is the `SyncKey` list returned by the init exchange and by
//! every sync batch. It only ever moves forward.

use serde::{Deserialize, Serialize};

/// One `Key`/`Val` pair of the server's sync key list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SyncKeyEntry {
    pub key: u32,
    pub val: u64,
}

/// Opaque position in the server's event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SyncCursor {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub list: Vec<SyncKeyEntry>,
}

/// Outcome of offering a new cursor to [`SyncCursor::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorUpdate {
    /// The cursor moved forward.
    Advanced,
    /// The offered cursor equals the current one.
    Unchanged,
    /// The offered cursor is behind the current one and was ignored.
    Stale,
    /// The offered cursor carried no keys and was ignored.
    Empty,
}

impl SyncCursor {
    pub fn new(list: Vec<SyncKeyEntry>) -> Self {
        Self {
            count: list.len(),
            list,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Value stored for `key`, if the server sent one.
    pub fn get(&self, key: u32) -> Option<u64> {
        self.list.iter().find(|e| e.key == key).map(|e| e.val)
    }

    /// Whether any key shared with `other` holds a smaller value here.
    pub fn is_behind(&self, other: &SyncCursor) -> bool {
        self.list
            .iter()
            .any(|e| matches!(other.get(e.key), Some(val) if e.val < val))
    }

    /// Replace the cursor with `update` unless that would rewind it.
    pub fn advance(&mut self, update: SyncCursor) -> CursorUpdate {
        if update.is_empty() {
            return CursorUpdate::Empty;
        }
        if update.is_behind(self) {
            return CursorUpdate::Stale;
        }
        if update.list == self.list {
            return CursorUpdate::Unchanged;
        }
        self.count = update.list.len();
        self.list = update.list;
        CursorUpdate::Advanced
    }

    /// `key_val|key_val` form used by the sync check query string.
    pub fn to_query_value(&self) -> String {
        self.list
            .iter()
            .map(|e| format!("{}_{}", e.key, e.val))
            .collect::<Vec<_>>()
            .join("|")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(pairs: &[(u32, u64)]) -> SyncCursor {
        SyncCursor::new(
            pairs
                .iter()
                .map(|&(key, val)| SyncKeyEntry { key, val })
                .collect(),
        )
    }

    #[test]
    fn test_advance_from_empty() {
        let mut current = SyncCursor::default();
        assert_eq!(current.advance(cursor(&[(1, 10)])), CursorUpdate::Advanced);
        assert_eq!(current.get(1), Some(10));
        assert_eq!(current.count, 1);
    }

    #[test]
    fn test_stale_cursor_is_ignored() {
        let mut current = cursor(&[(1, 10), (2, 20)]);
        assert_eq!(current.advance(cursor(&[(1, 11), (2, 19)])), CursorUpdate::Stale);
        assert_eq!(current, cursor(&[(1, 10), (2, 20)]));
    }

    #[test]
    fn test_empty_and_unchanged_updates() {
        let mut current = cursor(&[(1, 10)]);
        assert_eq!(current.advance(SyncCursor::default()), CursorUpdate::Empty);
        assert_eq!(current.advance(cursor(&[(1, 10)])), CursorUpdate::Unchanged);
        assert_eq!(current.advance(cursor(&[(1, 10), (1000, 5)])), CursorUpdate::Advanced);
        assert_eq!(current.get(1000), Some(5));
    }

    #[test]
    fn test_monotonic_over_sequence() {
        let mut current = SyncCursor::default();
        let offers = [
            cursor(&[(1, 1), (2, 1)]),
            cursor(&[(1, 3), (2, 1)]),
            cursor(&[(1, 2), (2, 5)]),
            cursor(&[(1, 4), (2, 6)]),
        ];
        let mut previous = current.clone();
        for offer in offers {
            current.advance(offer);
            assert!(!current.is_behind(&previous));
            previous = current.clone();
        }
        assert_eq!(current, cursor(&[(1, 4), (2, 6)]));
    }

    #[test]
    fn test_wire_shape() {
        let parsed: SyncCursor =
            serde_json::from_str(r#"{"Count":2,"List":[{"Key":1,"Val":7},{"Key":2,"Val":9}]}"#)
                .unwrap();
        assert_eq!(parsed, cursor(&[(1, 7), (2, 9)]));
        assert_eq!(parsed.to_query_value(), "1_7|2_9");
    }
}
