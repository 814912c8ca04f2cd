//! Fixed-depth sample ring with simple moving average.

/// Ring of the most recent `N` raw samples. Pushing into a full ring
/// evicts the oldest sample.
#[derive(Debug, Clone)]
pub struct RingBuffer<const N: usize> {
    samples: [i32; N],
    head: usize,
    len: usize,
}

impl<const N: usize> RingBuffer<N> {
    pub const fn new() -> Self {
        Self {
            samples: [0; N],
            head: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, sample: i32) {
        self.samples[self.head] = sample;
        self.head = (self.head + 1) % N;
        if self.len < N {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mean of the currently held samples; 0 before the first push.
    pub fn average(&self) -> i32 {
        if self.len == 0 {
            return 0;
        }
        let sum: i64 = self.samples[..self.len].iter().map(|&s| i64::from(s)).sum();
        (sum / self.len as i64) as i32
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ring_averages_to_zero() {
        let r = RingBuffer::<10>::new();
        assert!(r.is_empty());
        assert_eq!(r.average(), 0);
    }

    #[test]
    fn partial_fill_averages_held_samples() {
        let mut r = RingBuffer::<10>::new();
        for s in [10, 20, 30] {
            r.push(s);
        }
        assert_eq!(r.len(), 3);
        assert_eq!(r.average(), 20);
    }

    #[test]
    fn overfill_evicts_oldest() {
        let mut r = RingBuffer::<3>::new();
        for s in [10, 20, 30, 100] {
            r.push(s);
        }
        assert_eq!(r.len(), 3);
        assert_eq!(r.average(), 50); // (20 + 30 + 100) / 3
    }

    #[test]
    fn negative_samples_average_correctly() {
        let mut r = RingBuffer::<4>::new();
        for s in [-10, -20, 30] {
            r.push(s);
        }
        assert_eq!(r.average(), 0);
    }

    #[test]
    fn clear_resets_to_empty() {
        let mut r = RingBuffer::<3>::new();
        r.push(42);
        r.clear();
        assert!(r.is_empty());
        assert_eq!(r.average(), 0);
    }
}
