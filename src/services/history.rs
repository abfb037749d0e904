use crate::models::SongId;
use chrono::{DateTime, Utc};
use std::{
    collections::{HashSet, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
};

pub const DEFAULT_HISTORY_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub song_id: SongId,
    /// Snapshot taken from the index at listen time.
    pub embedding: Vec<f32>,
    pub played_at: DateTime<Utc>,
}

/// Bounded FIFO window of recent listens for one process-wide session.
///
/// Not persisted: the window starts empty on every restart. All access goes
/// through one mutex that is never held across an await.
#[derive(Debug)]
pub struct ListenHistory {
    capacity: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl ListenHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<HistoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends and evicts the oldest entries beyond capacity.
    pub fn push(&self, entry: HistoryEntry) {
        let mut entries = self.lock();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    pub fn record(&self, song_id: SongId, embedding: Vec<f32>) {
        self.push(HistoryEntry {
            song_id,
            embedding,
            played_at: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn ids(&self) -> HashSet<SongId> {
        self.lock().iter().map(|e| e.song_id).collect()
    }

    /// Most recent first.
    pub fn ordered(&self, limit: usize) -> Vec<SongId> {
        self.lock()
            .iter()
            .rev()
            .take(limit)
            .map(|e| e.song_id)
            .collect()
    }

    /// Most recent first.
    pub fn with_timestamps(&self, limit: usize) -> Vec<(SongId, DateTime<Utc>)> {
        self.lock()
            .iter()
            .rev()
            .take(limit)
            .map(|e| (e.song_id, e.played_at))
            .collect()
    }

    /// Consistent copy of the window, oldest first.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for ListenHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_eviction() {
        let history = ListenHistory::new(3);
        let ids: Vec<SongId> = (0..5).map(|_| SongId::new()).collect();
        for id in &ids {
            history.record(*id, vec![1.0]);
        }

        assert_eq!(history.len(), 3);
        assert_eq!(history.ordered(10), vec![ids[4], ids[3], ids[2]]);
        assert!(!history.ids().contains(&ids[0]));
        assert!(!history.ids().contains(&ids[1]));
    }

    #[test]
    fn test_ordered_is_most_recent_first_and_truncated() {
        let history = ListenHistory::default();
        let a = SongId::new();
        let b = SongId::new();
        history.record(a, vec![1.0]);
        history.record(b, vec![2.0]);

        assert_eq!(history.ordered(1), vec![b]);
        assert_eq!(history.ordered(5), vec![b, a]);
        let stamped = history.with_timestamps(5);
        assert_eq!(stamped[0].0, b);
        assert!(stamped[0].1 >= stamped[1].1);
    }

    #[test]
    fn test_repeated_song_keeps_both_entries() {
        let history = ListenHistory::new(5);
        let a = SongId::new();
        history.record(a, vec![1.0]);
        history.record(a, vec![1.0]);

        assert_eq!(history.len(), 2);
        assert_eq!(history.ids().len(), 1);
    }

    #[test]
    fn test_size_bound_under_concurrent_appends() {
        let history = Arc::new(ListenHistory::new(10));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let history = history.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        history.record(SongId::new(), vec![0.5, 0.5]);
                        assert!(history.len() <= 10);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(history.len(), 10);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let history = ListenHistory::new(0);
        history.record(SongId::new(), vec![]);
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.len(), 1);
    }
}
