use std::collections::VecDeque;

use serde::Serialize;

/// Mean and population standard deviation of a window at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct WindowStats {
    pub mean: f64,
    pub std: f64,
    pub len: usize,
}

impl WindowStats {
    pub fn new(mean: f64, std: f64) -> Self {
        Self { mean, std, len: 0 }
    }
}

/// Fixed-capacity FIFO window with mean/std recomputed over the full window
/// after every mutation.
#[derive(Debug, Clone)]
pub struct SlidingStats {
    capacity: usize,
    samples: VecDeque<f64>,
    mean: f64,
    std: f64,
}

impl SlidingStats {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window capacity must be > 0");
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
            mean: 0.0,
            std: 0.0,
        }
    }

    /// Replace the window wholesale. Only the last `capacity` values are kept.
    pub fn seed<I>(&mut self, values: I)
    where
        I: IntoIterator<Item = f64>,
    {
        self.samples.clear();
        for value in values {
            self.samples.push_back(value);
            if self.samples.len() > self.capacity {
                let _ = self.samples.pop_front();
            }
        }
        self.recompute();
    }

    pub fn push(&mut self, value: f64) -> WindowStats {
        self.samples.push_back(value);
        while self.samples.len() > self.capacity {
            let _ = self.samples.pop_front();
        }
        self.recompute();
        self.snapshot()
    }

    fn recompute(&mut self) {
        if self.samples.is_empty() {
            self.mean = 0.0;
            self.std = 0.0;
            return;
        }
        let n = self.samples.len() as f64;
        let mean = self.samples.iter().sum::<f64>() / n;
        let variance = self
            .samples
            .iter()
            .map(|v| {
                let d = *v - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        self.mean = mean;
        self.std = variance.sqrt();
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std(&self) -> f64 {
        self.std
    }

    pub fn snapshot(&self) -> WindowStats {
        WindowStats {
            mean: self.mean,
            std: self.std,
            len: self.samples.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn population_stats() {
        let mut stats = SlidingStats::new(8);
        stats.seed([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((stats.mean() - 5.0).abs() < f64::EPSILON);
        assert!((stats.std() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn push_evicts_oldest() {
        let mut stats = SlidingStats::new(3);
        stats.push(10.0);
        stats.push(20.0);
        stats.push(30.0);
        assert!(stats.is_full());
        let snap = stats.push(40.0);
        assert_eq!(snap.len, 3);
        assert!((snap.mean - 30.0).abs() < f64::EPSILON);
        assert_eq!(stats.values().collect::<Vec<_>>(), vec![20.0, 30.0, 40.0]);
    }

    #[test]
    fn seed_keeps_most_recent_values() {
        let mut stats = SlidingStats::new(2);
        stats.seed([1.0, 2.0, 3.0]);
        assert_eq!(stats.values().collect::<Vec<_>>(), vec![2.0, 3.0]);
        assert!((stats.mean() - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_window_reports_zero() {
        let stats = SlidingStats::new(4);
        assert!(stats.is_empty());
        assert_eq!(stats.snapshot(), WindowStats::default());
    }

    #[test]
    #[should_panic(expected = "window capacity must be > 0")]
    fn zero_capacity_panics() {
        SlidingStats::new(0);
    }
}
