//! Burst Estimation
//!
//! Exponential smoothing of CPU bursts for SJF/SRT.

/// Burst estimator parameterised by the smoothing factor
#[derive(Debug, Clone, Copy)]
pub struct BurstEstimator {
    alpha: f64,
}

impl BurstEstimator {
    pub fn new(alpha: f64) -> Self {
        Self { alpha: alpha.clamp(0.0, 1.0) }
    }

    /// Next estimate after a completed burst: `α·real + (1-α)·previous`
    pub fn smooth(&self, previous: f64, real: f64) -> f64 {
        (self.alpha * real + (1.0 - self.alpha) * previous).max(0.0)
    }

    /// Estimate left after an interrupted burst, never negative
    pub fn after_interrupt(&self, previous: f64, elapsed: f64) -> f64 {
        (previous - elapsed).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smooth() {
        let estimator = BurstEstimator::new(0.5);
        assert_eq!(estimator.smooth(10_000.0, 2_000.0), 6_000.0);

        let all_real = BurstEstimator::new(1.0);
        assert_eq!(all_real.smooth(10_000.0, 2_000.0), 2_000.0);
    }

    #[test]
    fn test_after_interrupt_never_negative() {
        let estimator = BurstEstimator::new(0.5);
        assert_eq!(estimator.after_interrupt(3_000.0, 1_000.0), 2_000.0);
        assert_eq!(estimator.after_interrupt(3_000.0, 5_000.0), 0.0);
    }

    #[test]
    fn test_alpha_clamped() {
        let estimator = BurstEstimator::new(7.0);
        assert_eq!(estimator.smooth(100.0, 40.0), 40.0);
    }
}
