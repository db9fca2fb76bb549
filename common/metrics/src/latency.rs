use std::collections::VecDeque;
use std::time::Duration;

/// Bounded ring of the most recent latency samples. Percentile extraction
/// sorts a copy so the ring's lock is never held during the O(n log n)
/// phase; the caller takes the copy out with [`LatencyRing::sorted`].
#[derive(Debug)]
pub struct LatencyRing {
    samples: VecDeque<Duration>,
    capacity: usize,
}

pub const DEFAULT_CAPACITY: usize = 10_000;

impl LatencyRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Copy of the current samples, sorted ascending.
    pub fn sorted(&self) -> Vec<Duration> {
        let mut copy: Vec<Duration> = self.samples.iter().copied().collect();
        copy.sort_unstable();
        copy
    }
}

impl Default for LatencyRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Nearest-rank percentile over an ascending-sorted sample set: index
/// `⌊len·p/100⌋` clamped to `len − 1`.
pub fn percentile(sorted: &[Duration], p: f64) -> Option<Duration> {
    if sorted.is_empty() {
        return None;
    }
    let index = ((sorted.len() as f64) * p / 100.0).floor() as usize;
    Some(sorted[index.min(sorted.len() - 1)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_drops_oldest_beyond_capacity() {
        let mut ring = LatencyRing::new(3);
        for ms in 1..=5u64 {
            ring.push(Duration::from_millis(ms));
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(
            ring.sorted(),
            vec![
                Duration::from_millis(3),
                Duration::from_millis(4),
                Duration::from_millis(5)
            ]
        );
    }

    #[test]
    fn nearest_rank_on_known_samples() {
        let sorted: Vec<Duration> = (1..=100u64).map(Duration::from_millis).collect();
        assert_eq!(percentile(&sorted, 50.0), Some(Duration::from_millis(51)));
        assert_eq!(percentile(&sorted, 90.0), Some(Duration::from_millis(91)));
        assert_eq!(percentile(&sorted, 99.0), Some(Duration::from_millis(100)));
        // Clamped to the last sample.
        assert_eq!(percentile(&sorted, 100.0), Some(Duration::from_millis(100)));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn percentiles_are_monotonic() {
        let sorted: Vec<Duration> = [3u64, 1, 4, 1, 5, 9, 2, 6]
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect::<Vec<_>>();
        let mut sorted = sorted;
        sorted.sort_unstable();
        let p50 = percentile(&sorted, 50.0).unwrap();
        let p90 = percentile(&sorted, 90.0).unwrap();
        let p99 = percentile(&sorted, 99.0).unwrap();
        assert!(p50 <= p90);
        assert!(p90 <= p99);
        assert!(p99 <= *sorted.last().unwrap());
    }
}
