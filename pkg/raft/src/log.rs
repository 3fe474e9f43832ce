//! The per-server log: a contiguous, 0-indexed sequence of `(term, command)`
//! entries with Raft's continuity/conflict-resolution rules for
//! `AppendEntries`.

use crate::protos::{Index, LogEntry, Term, NO_INDEX, NO_TERM};

/// An in-memory log. No holes, term-monotonic, obeying the match property.
#[derive(Debug, Default, Clone)]
pub struct Log {
    entries: Vec<LogEntry>,
}

impl Log {
    pub fn new() -> Self {
        Log { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the last entry, or `NO_INDEX` if the log is empty.
    pub fn last_index(&self) -> Index {
        self.entries.len() as Index - 1
    }

    /// Term of the last entry, or `NO_TERM` if the log is empty.
    pub fn last_term(&self) -> Term {
        self.term_at(self.last_index())
    }

    /// Term of the entry at `index`, or `NO_TERM` if `index` is `NO_INDEX`
    /// or out of range.
    pub fn term_at(&self, index: Index) -> Term {
        if index == NO_INDEX {
            return NO_TERM;
        }
        self.get(index).map(|e| e.term).unwrap_or(NO_TERM)
    }

    /// Builds a log directly from a previously-saved entry sequence, as
    /// used when restoring from persistence.
    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        Log { entries }
    }

    /// The full entry sequence, as needed to serialize the log to disk.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn get(&self, index: Index) -> Option<&LogEntry> {
        if index < 0 {
            return None;
        }
        self.entries.get(index as usize)
    }

    /// Entries strictly after `index` (used to build replication batches).
    pub fn entries_after(&self, index: Index) -> &[LogEntry] {
        let start = (index + 1).max(0) as usize;
        if start >= self.entries.len() {
            &[]
        } else {
            &self.entries[start..]
        }
    }

    /// The continuity-checked append used by `AppendEntries` handling and by
    /// local `client_append`. Pure over the log: on failure, the log is left
    /// completely unchanged.
    ///
    /// Returns `true` iff the continuity check passed, matching the design
    /// document's `append_entries(log, prev_index, prev_term, entries) ->
    /// bool` signature.
    pub fn append_entries(&mut self, prev_index: Index, prev_term: Term, entries: &[LogEntry]) -> bool {
        if prev_index != NO_INDEX {
            if prev_index >= self.len() as Index || self.term_at(prev_index) != prev_term {
                return false;
            }
        }

        for (k, entry) in entries.iter().enumerate() {
            let dst = prev_index + 1 + k as Index;
            debug_assert!(dst >= 0);
            let dst_usize = dst as usize;

            if dst_usize >= self.entries.len() {
                self.entries.push(entry.clone());
            } else if self.entries[dst_usize].term != entry.term {
                // Conflict: everything from here on is superseded.
                self.entries.truncate(dst_usize);
                self.entries.push(entry.clone());
            }
            // Else: already present and identical by the match property --
            // do not truncate, do not re-append.
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: Term) -> LogEntry {
        LogEntry { term, command: bytes::Bytes::from_static(b"x") }
    }

    fn push(log: &mut Log, terms: &[Term]) {
        for &t in terms {
            let idx = log.last_index();
            let last_term = log.last_term();
            assert!(log.append_entries(idx, last_term, &[entry(t)]));
        }
    }

    #[test]
    fn starts_empty() {
        let log = Log::new();
        assert_eq!(log.len(), 0);
        assert_eq!(log.last_index(), NO_INDEX);
        assert_eq!(log.last_term(), NO_TERM);
    }

    #[test]
    fn continuity_probe_at_start_always_passes() {
        let mut log = Log::new();
        assert!(log.append_entries(NO_INDEX, NO_TERM, &[]));
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn rejects_when_prev_index_beyond_log() {
        let mut log = Log::new();
        assert!(!log.append_entries(0, 1, &[entry(1)]));
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn rejects_on_term_mismatch_at_prev_index() {
        let mut log = Log::new();
        push(&mut log, &[1]);
        assert!(!log.append_entries(0, 2, &[entry(2)]));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn appends_past_the_end() {
        let mut log = Log::new();
        push(&mut log, &[1, 1, 1]);
        assert_eq!(log.len(), 3);
        assert_eq!(log.last_term(), 1);
    }

    #[test]
    fn truncates_on_conflicting_term_and_appends_remainder() {
        let mut log = Log::new();
        push(&mut log, &[1, 1, 1, 4, 4, 5, 5, 6, 6, 6]);
        assert_eq!(log.len(), 10);

        // Figure 7 scenario 2 (0-indexed): overwrite the last two (term 7)
        // entries of a candidate leader log with a single term-8 entry.
        push(&mut log, &[7, 7]);
        assert_eq!(log.len(), 12);

        let ok = log.append_entries(9, 6, &[entry(8)]);
        assert!(ok);
        assert_eq!(log.len(), 11);
        assert_eq!(log.term_at(10), 8);
    }

    #[test]
    fn replay_is_idempotent() {
        let mut log = Log::new();
        push(&mut log, &[1, 1, 1, 4, 4, 5, 5, 6, 6, 6, 7, 7]);

        let before = log.clone_entries();
        assert!(log.append_entries(9, 6, &[entry(8)]));
        let after_first = log.clone_entries();
        assert_ne!(before, after_first);

        assert!(log.append_entries(9, 6, &[entry(8)]));
        let after_second = log.clone_entries();
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn never_truncates_an_already_present_prefix() {
        let mut log = Log::new();
        push(&mut log, &[1, 2, 2]);
        let before = log.clone_entries();

        // Replaying entries that are already present (identical terms) must
        // not touch anything after them, even though they overlap the tail.
        assert!(log.append_entries(0, 1, &[entry(2), entry(2)]));
        assert_eq!(log.clone_entries(), before);
    }

    #[test]
    fn no_holes_after_any_successful_append() {
        let mut log = Log::new();
        push(&mut log, &[1, 1, 2]);
        for i in 0..log.len() as Index {
            assert!(log.get(i).is_some());
        }
    }

    impl Log {
        #[cfg(test)]
        fn clone_entries(&self) -> Vec<LogEntry> {
            self.entries.clone()
        }
    }
}
