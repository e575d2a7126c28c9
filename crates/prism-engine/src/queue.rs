//! Priority wait queue.
//!
//! Ordering: higher priority first, FIFO among equal priorities. A session
//! is inserted before the first entry whose priority is strictly lower than
//! its own, which preserves FIFO within a priority band under any sequence
//! of insertions from empty.

use prism_core::SessionId;

#[derive(Clone, Debug)]
struct Entry {
    session_id: SessionId,
    priority: i32,
}

/// Ordered sequence of queued session IDs.
#[derive(Clone, Debug, Default)]
pub struct PriorityQueue {
    entries: Vec<Entry>,
}

impl PriorityQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert per the priority rule. Returns the 1-based position.
    pub fn insert(&mut self, session_id: SessionId, priority: i32) -> usize {
        let index = self
            .entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(
            index,
            Entry {
                session_id,
                priority,
            },
        );
        index + 1
    }

    /// Remove and return the head of the queue.
    pub fn pop_front(&mut self) -> Option<SessionId> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0).session_id)
        }
    }

    /// Remove a session wherever it sits. Returns whether it was present.
    pub fn remove(&mut self, session_id: &SessionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.session_id != session_id);
        self.entries.len() != before
    }

    /// 1-based position of a session, if queued.
    #[must_use]
    pub fn position(&self, session_id: &SessionId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| &e.session_id == session_id)
            .map(|i| i + 1)
    }

    #[must_use]
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.entries.iter().any(|e| &e.session_id == session_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queued session IDs in service order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionId> {
        self.entries.iter().map(|e| e.session_id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> SessionId {
        SessionId::from(s)
    }

    #[test]
    fn fifo_within_equal_priority() {
        let mut q = PriorityQueue::new();
        assert_eq!(q.insert(sid("a"), 0), 1);
        assert_eq!(q.insert(sid("b"), 0), 2);
        assert_eq!(q.insert(sid("c"), 0), 3);
        assert_eq!(q.pop_front(), Some(sid("a")));
        assert_eq!(q.pop_front(), Some(sid("b")));
        assert_eq!(q.pop_front(), Some(sid("c")));
    }

    #[test]
    fn higher_priority_jumps_ahead() {
        let mut q = PriorityQueue::new();
        let _ = q.insert(sid("low"), 0);
        let pos = q.insert(sid("hi"), 10);
        assert_eq!(pos, 1);
        assert_eq!(q.position(&sid("hi")), Some(1));
        assert_eq!(q.position(&sid("low")), Some(2));
    }

    #[test]
    fn equal_priority_inserts_after_existing_band() {
        let mut q = PriorityQueue::new();
        let _ = q.insert(sid("a"), 5);
        let _ = q.insert(sid("b"), 5);
        let _ = q.insert(sid("c"), 10);
        // c ahead of the 5-band, a before b within it
        assert_eq!(q.snapshot(), vec![sid("c"), sid("a"), sid("b")]);
    }

    #[test]
    fn mixed_priorities_interleave_correctly() {
        let mut q = PriorityQueue::new();
        let _ = q.insert(sid("p0_a"), 0);
        let _ = q.insert(sid("p5_a"), 5);
        let _ = q.insert(sid("p0_b"), 0);
        let _ = q.insert(sid("p5_b"), 5);
        let _ = q.insert(sid("p9"), 9);
        assert_eq!(
            q.snapshot(),
            vec![sid("p9"), sid("p5_a"), sid("p5_b"), sid("p0_a"), sid("p0_b")]
        );
    }

    #[test]
    fn negative_priority_goes_last() {
        let mut q = PriorityQueue::new();
        let _ = q.insert(sid("normal"), 0);
        let pos = q.insert(sid("background"), -1);
        assert_eq!(pos, 2);
    }

    #[test]
    fn pop_front_empty() {
        let mut q = PriorityQueue::new();
        assert_eq!(q.pop_front(), None);
    }

    #[test]
    fn remove_present_and_absent() {
        let mut q = PriorityQueue::new();
        let _ = q.insert(sid("a"), 0);
        assert!(q.remove(&sid("a")));
        assert!(!q.remove(&sid("a")));
        assert!(q.is_empty());
    }

    #[test]
    fn remove_middle_preserves_order() {
        let mut q = PriorityQueue::new();
        let _ = q.insert(sid("a"), 0);
        let _ = q.insert(sid("b"), 0);
        let _ = q.insert(sid("c"), 0);
        assert!(q.remove(&sid("b")));
        assert_eq!(q.snapshot(), vec![sid("a"), sid("c")]);
        assert_eq!(q.position(&sid("c")), Some(2));
    }

    #[test]
    fn position_of_unknown_is_none() {
        let q = PriorityQueue::new();
        assert_eq!(q.position(&sid("ghost")), None);
    }

    #[test]
    fn len_and_contains() {
        let mut q = PriorityQueue::new();
        assert_eq!(q.len(), 0);
        let _ = q.insert(sid("a"), 0);
        assert_eq!(q.len(), 1);
        assert!(q.contains(&sid("a")));
        assert!(!q.contains(&sid("b")));
    }

    #[test]
    fn earlier_enqueue_with_geq_priority_leaves_no_later() {
        // For any S1 enqueued before S2 with priority(S1) >= priority(S2),
        // S1 leaves the queue no later than S2.
        let mut q = PriorityQueue::new();
        let _ = q.insert(sid("s1"), 3);
        let _ = q.insert(sid("s2"), 3);
        let _ = q.insert(sid("s3"), 1);
        let mut order = Vec::new();
        while let Some(id) = q.pop_front() {
            order.push(id);
        }
        assert_eq!(order, vec![sid("s1"), sid("s2"), sid("s3")]);
    }
}
