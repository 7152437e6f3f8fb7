//! Small numeric helpers.

use std::collections::VecDeque;

/// Mean over the most recent `cap` values.
///
/// Used for the online mean episode cost handed to trainers as a baseline.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RollingMean {
    cap: usize,
    buf: VecDeque<f64>,
}

impl RollingMean {
    /// Create an empty window with capacity `cap` (minimum 1).
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            buf: VecDeque::new(),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Push a value, evicting the oldest if at capacity. Non-finite values are ignored.
    pub fn update(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }
        if self.buf.len() == self.cap {
            self.buf.pop_front();
        }
        self.buf.push_back(x);
    }

    /// Mean of retained values (0 when empty).
    pub fn mean(&self) -> f64 {
        if self.buf.is_empty() {
            return 0.0;
        }
        self.buf.iter().sum::<f64>() / self.buf.len() as f64
    }
}

impl Default for RollingMean {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_mean_is_zero() {
        assert_eq!(RollingMean::default().mean(), 0.0);
        assert_eq!(RollingMean::default().cap(), 50);
    }

    #[test]
    fn window_forgets_oldest() {
        let mut m = RollingMean::new(2);
        m.update(10.0);
        m.update(2.0);
        m.update(4.0);
        assert_eq!(m.len(), 2);
        assert_eq!(m.mean(), 3.0);
    }

    #[test]
    fn non_finite_values_are_ignored() {
        let mut m = RollingMean::new(3);
        m.update(1.0);
        m.update(f64::NAN);
        m.update(f64::INFINITY);
        assert_eq!(m.len(), 1);
        assert_eq!(m.mean(), 1.0);
    }
}
