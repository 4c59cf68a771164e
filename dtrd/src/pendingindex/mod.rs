// Copyright (C) 2023 Felix Huettner
//
// This file is part of DTRD.
//
// DTRD is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// DTRD is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The in-memory Pending Bundle Index (component 3).
//!
//! Not its own actor: the Bundle Store owns the one actix mailbox that
//! mutates it, which already gives the "single-writer" guarantee §5 asks
//! for, the same way `bundlestorageagent`'s old `Vec<StoredBundle>` scan was
//! only ever touched from within that actor's handlers. This module is a
//! plain indexed structure, generalized from that `Vec` into keyed maps.

use std::collections::HashMap;

use bp7::primaryblock::PrimaryBlock;

/// GBoF-id: source endpoint string ∥ creation timestamp ∥ fragment-offset ∥
/// original-length. Two admissions with the same GBoF-id are the same
/// bundle-or-fragment instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GbofId {
    pub source: String,
    pub creation_time: u64,
    pub creation_sequence: u64,
    pub fragment_offset: Option<u64>,
    pub total_data_length: Option<u64>,
}

impl GbofId {
    pub fn from_primary_block(primary: &PrimaryBlock) -> Self {
        Self {
            source: primary.source_node.to_string(),
            creation_time: primary.creation_timestamp.creation_time.timestamp,
            creation_sequence: primary.creation_timestamp.sequence_number,
            fragment_offset: primary.fragment_offset,
            total_data_length: primary.total_data_length,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub bundle_id: u64,
    pub gbof: GbofId,
    pub destination: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Ok,
    DuplicateGbof,
}

/// In-memory index of currently-live bundles. Mirrors spec §4.3 exactly:
/// `insert`/`lookup`/`lookup_gbof`/`remove`/`iter_filtered`/`size`/`all_ids`.
#[derive(Debug, Default)]
pub struct PendingIndex {
    by_id: HashMap<u64, PendingEntry>,
    by_gbof: HashMap<GbofId, u64>,
}

impl PendingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new pending entry. Returns `DuplicateGbof` without mutating
    /// anything if another pending bundle already shares this GBoF-id — the
    /// caller (Bundle Store) decides whether to drop or, after an explicit
    /// `remove` of the existing entry, replace it (I4).
    pub fn insert(&mut self, entry: PendingEntry) -> InsertOutcome {
        if self.by_gbof.contains_key(&entry.gbof) {
            return InsertOutcome::DuplicateGbof;
        }
        self.by_gbof.insert(entry.gbof.clone(), entry.bundle_id);
        self.by_id.insert(entry.bundle_id, entry);
        InsertOutcome::Ok
    }

    pub fn lookup(&self, id: u64) -> Option<&PendingEntry> {
        self.by_id.get(&id)
    }

    pub fn lookup_gbof(&self, gbof: &GbofId) -> Option<&PendingEntry> {
        self.by_gbof.get(gbof).and_then(|id| self.by_id.get(id))
    }

    pub fn remove(&mut self, id: u64) -> Option<PendingEntry> {
        let entry = self.by_id.remove(&id)?;
        self.by_gbof.remove(&entry.gbof);
        Some(entry)
    }

    /// Ordering is undefined, matching spec §4.3. Callers that need to
    /// tolerate concurrent insert/remove during a long iteration (the
    /// registration initial-load task) should resume by last-seen bundle-id
    /// rather than relying on a live iterator surviving across await points.
    pub fn iter_filtered<'a>(
        &'a self,
        predicate: impl Fn(&PendingEntry) -> bool + 'a,
    ) -> impl Iterator<Item = &'a PendingEntry> + 'a {
        self.by_id.values().filter(move |e| predicate(e))
    }

    pub fn size(&self) -> usize {
        self.by_id.len()
    }

    pub fn all_ids(&self) -> Vec<u64> {
        self.by_id.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{GbofId, InsertOutcome, PendingEntry, PendingIndex};

    fn gbof(n: u64) -> GbofId {
        GbofId {
            source: "dtn://a/tx".into(),
            creation_time: 1000,
            creation_sequence: n,
            fragment_offset: None,
            total_data_length: None,
        }
    }

    #[test]
    fn insert_lookup_remove_roundtrip() {
        let mut idx = PendingIndex::new();
        let entry = PendingEntry {
            bundle_id: 1,
            gbof: gbof(1),
            destination: "dtn://b/app".into(),
        };
        assert_eq!(idx.insert(entry.clone()), InsertOutcome::Ok);
        assert_eq!(idx.size(), 1);
        assert!(idx.lookup(1).is_some());
        assert!(idx.lookup_gbof(&gbof(1)).is_some());
        assert_eq!(idx.remove(1).map(|e| e.bundle_id), Some(1));
        assert_eq!(idx.size(), 0);
        assert!(idx.lookup_gbof(&gbof(1)).is_none());
    }

    /// P3: at any instant, at most one bundle with a given GBoF-id is
    /// pending.
    #[test]
    fn duplicate_gbof_is_rejected() {
        let mut idx = PendingIndex::new();
        idx.insert(PendingEntry {
            bundle_id: 1,
            gbof: gbof(7),
            destination: "dtn://b/app".into(),
        });
        let outcome = idx.insert(PendingEntry {
            bundle_id: 2,
            gbof: gbof(7),
            destination: "dtn://b/app".into(),
        });
        assert_eq!(outcome, InsertOutcome::DuplicateGbof);
        assert_eq!(idx.size(), 1);
        assert!(idx.lookup(2).is_none());
    }

    #[test]
    fn replace_requires_explicit_remove_first() {
        let mut idx = PendingIndex::new();
        idx.insert(PendingEntry {
            bundle_id: 1,
            gbof: gbof(7),
            destination: "dtn://b/app".into(),
        });
        idx.remove(1);
        let outcome = idx.insert(PendingEntry {
            bundle_id: 2,
            gbof: gbof(7),
            destination: "dtn://b/app".into(),
        });
        assert_eq!(outcome, InsertOutcome::Ok);
        assert!(idx.lookup(2).is_some());
    }

    #[test]
    fn iter_filtered_matches_destination() {
        let mut idx = PendingIndex::new();
        idx.insert(PendingEntry {
            bundle_id: 1,
            gbof: gbof(1),
            destination: "dtn://b/app".into(),
        });
        idx.insert(PendingEntry {
            bundle_id: 2,
            gbof: gbof(2),
            destination: "dtn://c/app".into(),
        });
        let matches: Vec<u64> = idx
            .iter_filtered(|e| e.destination == "dtn://b/app")
            .map(|e| e.bundle_id)
            .collect();
        assert_eq!(matches, vec![1]);
    }

    #[test]
    fn all_ids_reflects_current_membership() {
        let mut idx = PendingIndex::new();
        idx.insert(PendingEntry {
            bundle_id: 5,
            gbof: gbof(5),
            destination: "dtn://b/app".into(),
        });
        assert_eq!(idx.all_ids(), vec![5]);
    }
}
