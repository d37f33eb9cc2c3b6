//! Sliding-window statistics.

use std::collections::VecDeque;

/// Moving average / minimum / maximum over a fixed-length window.
///
/// Used by the link meter for jitter tracking. All operations are O(1)
/// amortized: min and max are maintained with monotonic deques.
pub struct SlidingStats {
    window_len: usize,
    values: VecDeque<i64>,
    sum: i64,
    /// Indices into a virtual stream, paired with values, kept monotonic.
    min_deque: VecDeque<(u64, i64)>,
    max_deque: VecDeque<(u64, i64)>,
    next_index: u64,
}

impl SlidingStats {
    pub fn new(window_len: usize) -> Self {
        Self {
            window_len: window_len.max(1),
            values: VecDeque::new(),
            sum: 0,
            min_deque: VecDeque::new(),
            max_deque: VecDeque::new(),
            next_index: 0,
        }
    }

    pub fn add(&mut self, value: i64) {
        let index = self.next_index;
        self.next_index += 1;

        self.values.push_back(value);
        self.sum += value;

        while self.min_deque.back().is_some_and(|&(_, v)| v >= value) {
            self.min_deque.pop_back();
        }
        self.min_deque.push_back((index, value));

        while self.max_deque.back().is_some_and(|&(_, v)| v <= value) {
            self.max_deque.pop_back();
        }
        self.max_deque.push_back((index, value));

        if self.values.len() > self.window_len {
            let expired = self.values.pop_front().unwrap();
            self.sum -= expired;
            let oldest_live = index - self.window_len as u64 + 1;
            if self.min_deque.front().is_some_and(|&(i, _)| i < oldest_live) {
                self.min_deque.pop_front();
            }
            if self.max_deque.front().is_some_and(|&(i, _)| i < oldest_live) {
                self.max_deque.pop_front();
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mov_avg(&self) -> i64 {
        if self.values.is_empty() {
            0
        } else {
            self.sum / self.values.len() as i64
        }
    }

    pub fn mov_min(&self) -> i64 {
        self.min_deque.front().map_or(0, |&(_, v)| v)
    }

    pub fn mov_max(&self) -> i64 {
        self.max_deque.front().map_or(0, |&(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let mut stats = SlidingStats::new(3);
        stats.add(10);
        stats.add(20);
        stats.add(30);

        assert_eq!(stats.mov_avg(), 20);
        assert_eq!(stats.mov_min(), 10);
        assert_eq!(stats.mov_max(), 30);
    }

    #[test]
    fn test_stats_window_expiry() {
        let mut stats = SlidingStats::new(3);
        for v in [100, 1, 2, 3] {
            stats.add(v);
        }

        // 100 fell out of the window.
        assert_eq!(stats.mov_max(), 3);
        assert_eq!(stats.mov_min(), 1);
        assert_eq!(stats.mov_avg(), 2);
    }

    #[test]
    fn test_stats_min_tracking() {
        let mut stats = SlidingStats::new(4);
        for v in [5, 3, 8, 1, 9, 2] {
            stats.add(v);
        }
        // Window is [8, 1, 9, 2].
        assert_eq!(stats.mov_min(), 1);
        assert_eq!(stats.mov_max(), 9);
    }
}
