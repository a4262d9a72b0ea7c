use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::types::FrameId;

/// Per-frame access bookkeeping: up to K access timestamps plus the
/// evictable flag.
struct LruKNode {
    /// Timestamps of the most recent accesses, oldest first, capped at K.
    history: VecDeque<u64>,
    is_evictable: bool,
}

struct ReplacerState {
    node_store: HashMap<FrameId, LruKNode>,
    /// Frames with fewer than K recorded accesses, in order of first access.
    cold_list: VecDeque<FrameId>,
    /// Logical clock, bumped on every recorded access.
    current_timestamp: u64,
    /// Number of evictable frames currently tracked.
    curr_size: usize,
}

/// LRU-K page replacement policy.
///
/// Frames with fewer than K accesses ("cold") are evicted first, in FIFO
/// order of their first access. Frames with K or more accesses ("hot") are
/// evicted by largest backward K-distance, i.e. the one whose K-th most
/// recent access is oldest.
pub struct LruKReplacer {
    k: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "LRU-K requires k > 0");
        Self {
            k,
            state: Mutex::new(ReplacerState {
                node_store: HashMap::with_capacity(num_frames),
                cold_list: VecDeque::with_capacity(num_frames),
                current_timestamp: 0,
                curr_size: 0,
            }),
        }
    }

    /// Record an access to a frame, creating its tracking entry on first
    /// access (non-evictable until `set_evictable` says otherwise).
    pub fn record_access(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        state.current_timestamp += 1;
        let now = state.current_timestamp;
        let k = self.k;

        if !state.node_store.contains_key(&frame_id) {
            let mut history = VecDeque::with_capacity(k);
            history.push_back(now);
            state.node_store.insert(
                frame_id,
                LruKNode {
                    history,
                    is_evictable: false,
                },
            );
            if k > 1 {
                state.cold_list.push_back(frame_id);
            }
            return;
        }

        let mut migrated = false;
        if let Some(node) = state.node_store.get_mut(&frame_id) {
            let was_cold = node.history.len() < k;
            if node.history.len() == k {
                node.history.pop_front();
            }
            node.history.push_back(now);
            migrated = was_cold && node.history.len() >= k;
        }
        if migrated {
            // Migrated from the cold cohort to the hot cohort.
            if let Some(pos) = state.cold_list.iter().position(|&id| id == frame_id) {
                state.cold_list.remove(pos);
            }
        }
    }

    /// Toggle whether a frame may be evicted. Unknown frames are ignored.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut state = self.state.lock();
        if let Some(node) = state.node_store.get_mut(&frame_id) {
            if node.is_evictable != evictable {
                node.is_evictable = evictable;
                if evictable {
                    state.curr_size += 1;
                } else {
                    state.curr_size -= 1;
                }
            }
        }
    }

    /// Pick and remove the next eviction victim, or `None` if no tracked
    /// frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.curr_size == 0 {
            return None;
        }

        // Cold frames first, FIFO by first access.
        let cold_victim = state
            .cold_list
            .iter()
            .position(|id| state.node_store[id].is_evictable);
        if let Some(pos) = cold_victim {
            if let Some(frame_id) = state.cold_list.remove(pos) {
                state.node_store.remove(&frame_id);
                state.curr_size -= 1;
                return Some(frame_id);
            }
        }

        // Hot frames by oldest K-th-most-recent access.
        let hot_victim = state
            .node_store
            .iter()
            .filter(|(_, node)| node.is_evictable && node.history.len() >= self.k)
            .min_by_key(|(_, node)| node.history.front().copied())
            .map(|(&frame_id, _)| frame_id);
        if let Some(frame_id) = hot_victim {
            state.node_store.remove(&frame_id);
            state.curr_size -= 1;
            return Some(frame_id);
        }
        None
    }

    /// Drop a frame from tracking entirely.
    ///
    /// # Panics
    ///
    /// Panics if the frame is tracked but not evictable; that is a caller
    /// bug (removing a pinned frame).
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        let Some(node) = state.node_store.get(&frame_id) else {
            return;
        };
        assert!(
            node.is_evictable,
            "cannot remove non-evictable frame {} from replacer",
            frame_id
        );
        state.node_store.remove(&frame_id);
        if let Some(pos) = state.cold_list.iter().position(|&id| id == frame_id) {
            state.cold_list.remove(pos);
        }
        state.curr_size -= 1;
    }

    /// Number of currently evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().curr_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cold_frames_evicted_fifo() {
        let replacer = LruKReplacer::new(8, 2);
        for frame in [1, 2, 3] {
            replacer.record_access(frame);
            replacer.set_evictable(frame, true);
        }
        assert_eq!(replacer.size(), 3);
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_hot_frame_outlives_cold() {
        // K=2: access 1, 2, 3 once (cold), then 1 again (hot).
        let replacer = LruKReplacer::new(8, 2);
        for frame in [1, 2, 3] {
            replacer.record_access(frame);
        }
        replacer.record_access(1);
        for frame in [1, 2, 3] {
            replacer.set_evictable(frame, true);
        }
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_hot_order_by_kth_recent_access() {
        let replacer = LruKReplacer::new(8, 2);
        // Make both hot: 1's 2nd access happens before 2's 2nd access.
        replacer.record_access(1);
        replacer.record_access(2);
        replacer.record_access(1);
        replacer.record_access(2);
        // Touch 1 again: its K-th-most-recent access is now newer than 2's.
        replacer.record_access(1);
        replacer.set_evictable(1, true);
        replacer.set_evictable(2, true);
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_non_evictable_frames_skipped() {
        let replacer = LruKReplacer::new(8, 2);
        replacer.record_access(1);
        replacer.record_access(2);
        replacer.set_evictable(2, true);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_set_evictable_updates_size() {
        let replacer = LruKReplacer::new(8, 3);
        replacer.record_access(7);
        assert_eq!(replacer.size(), 0);
        replacer.set_evictable(7, true);
        assert_eq!(replacer.size(), 1);
        replacer.set_evictable(7, true);
        assert_eq!(replacer.size(), 1);
        replacer.set_evictable(7, false);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_remove_evictable() {
        let replacer = LruKReplacer::new(8, 2);
        replacer.record_access(4);
        replacer.set_evictable(4, true);
        replacer.remove(4);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
        // Removing an untracked frame is a no-op.
        replacer.remove(4);
    }

    #[test]
    #[should_panic(expected = "non-evictable")]
    fn test_remove_non_evictable_panics() {
        let replacer = LruKReplacer::new(8, 2);
        replacer.record_access(5);
        replacer.remove(5);
    }

    #[test]
    fn test_k_equals_one_is_plain_lru() {
        let replacer = LruKReplacer::new(8, 1);
        replacer.record_access(1);
        replacer.record_access(2);
        replacer.record_access(1);
        for frame in [1, 2] {
            replacer.set_evictable(frame, true);
        }
        // With K=1 every frame is hot; 2's single access is older.
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(1));
    }
}
