//! Raw track id -> local track id cache.
//!
//! A reverse index (local -> raw ids) keeps `remove_all_for_local` from
//! sweeping the whole map when a local track is destroyed.

use crate::track_id::TrackId;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct CorrelationMap {
    forward: BTreeMap<TrackId, TrackId>,
    reverse: BTreeMap<TrackId, BTreeSet<TrackId>>,
}

impl CorrelationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, raw_id: &TrackId) -> Option<&TrackId> {
        self.forward.get(raw_id)
    }

    /// Maps `raw_id` to `local_id`, replacing any earlier mapping.
    ///
    /// Returns the local id it was previously mapped to.
    pub fn insert(&mut self, raw_id: TrackId, local_id: TrackId) -> Option<TrackId> {
        self.reverse
            .entry(local_id.clone())
            .or_default()
            .insert(raw_id.clone());

        let previous = self.forward.insert(raw_id.clone(), local_id.clone());
        if let Some(old) = previous.as_ref().filter(|old| **old != local_id) {
            self.unlink(old, &raw_id);
        }
        previous
    }

    /// Removes the mapping for `raw_id`; a no-op if there is none.
    pub fn remove(&mut self, raw_id: &TrackId) -> Option<TrackId> {
        let local_id = self.forward.remove(raw_id)?;
        self.unlink(&local_id, raw_id);
        Some(local_id)
    }

    /// Removes every raw id mapped to `local_id`, returning them in order.
    pub fn remove_all_for_local(&mut self, local_id: &TrackId) -> Vec<TrackId> {
        let raw_ids = self.reverse.remove(local_id).unwrap_or_default();
        for raw_id in &raw_ids {
            self.forward.remove(raw_id);
        }
        raw_ids.into_iter().collect()
    }

    /// Raw ids currently mapped to `local_id`.
    pub fn raw_ids_for(&self, local_id: &TrackId) -> impl Iterator<Item = &TrackId> {
        self.reverse.get(local_id).into_iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TrackId, &TrackId)> {
        self.forward.iter()
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    fn unlink(&mut self, local_id: &TrackId, raw_id: &TrackId) {
        if let Some(set) = self.reverse.get_mut(local_id) {
            set.remove(raw_id);
            // Clean up empty entries
            if set.is_empty() {
                self.reverse.remove(local_id);
            }
        }
    }
}
