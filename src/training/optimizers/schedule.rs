//! Learning-rate and loss-lambda decay schedules

use serde::{Deserialize, Serialize};

/// Two-phase learning rate: constant until `decay_from`, then linear decay
/// to exactly zero at `total_steps`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecaySchedule {
    base_lr: f64,
    decay_from: usize,
    total_steps: usize,
}

impl DecaySchedule {
    /// Create a schedule over `total_steps` with decay starting at
    /// `decay_from`.
    pub fn new(base_lr: f64, decay_from: usize, total_steps: usize) -> Self {
        Self {
            base_lr,
            decay_from,
            total_steps,
        }
    }

    /// Effective learning rate at a global step.
    pub fn rate(&self, step: usize) -> f64 {
        if step < self.decay_from {
            return self.base_lr;
        }
        let span = self.total_steps.saturating_sub(self.decay_from).max(1);
        let progress = ((step - self.decay_from) as f64 / span as f64).min(1.0);
        self.base_lr * (1.0 - progress)
    }

    /// The configured base learning rate.
    pub fn base_lr(&self) -> f64 {
        self.base_lr
    }
}

/// Linear interpolation of a loss lambda across the step budget.
///
/// Equal endpoints give a constant lambda.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LambdaSchedule {
    start: f64,
    end: f64,
    total_steps: usize,
}

impl LambdaSchedule {
    /// Interpolate from `start` at step 0 to `end` at `total_steps`.
    pub fn new(start: f64, end: f64, total_steps: usize) -> Self {
        Self {
            start,
            end,
            total_steps,
        }
    }

    /// Lambda value at a global step.
    pub fn value(&self, step: usize) -> f64 {
        let progress = (step as f64 / self.total_steps.max(1) as f64).min(1.0);
        self.start + (self.end - self.start) * progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_phase_returns_base_rate_exactly() {
        let schedule = DecaySchedule::new(2e-4, 100_000, 200_000);
        assert_eq!(schedule.rate(0), 2e-4);
        assert_eq!(schedule.rate(99_999), 2e-4);
    }

    #[test]
    fn decay_reaches_exactly_zero_at_final_step() {
        let schedule = DecaySchedule::new(2e-4, 100_000, 200_000);
        assert_eq!(schedule.rate(200_000), 0.0);
        assert_eq!(schedule.rate(250_000), 0.0);
    }

    #[test]
    fn decay_is_linear_between_boundaries() {
        let schedule = DecaySchedule::new(1.0, 100, 200);
        assert!((schedule.rate(150) - 0.5).abs() < 1e-12);
        assert!((schedule.rate(175) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn immediate_decay_from_zero() {
        let schedule = DecaySchedule::new(1.0, 0, 100);
        assert!((schedule.rate(50) - 0.5).abs() < 1e-12);
        assert_eq!(schedule.rate(100), 0.0);
    }

    #[test]
    fn equal_lambda_endpoints_stay_constant() {
        let schedule = LambdaSchedule::new(10.0, 10.0, 1000);
        assert_eq!(schedule.value(0), 10.0);
        assert_eq!(schedule.value(500), 10.0);
        assert_eq!(schedule.value(1000), 10.0);
    }

    #[test]
    fn lambda_interpolates_linearly() {
        let schedule = LambdaSchedule::new(10.0, 2.0, 100);
        assert_eq!(schedule.value(0), 10.0);
        assert!((schedule.value(50) - 6.0).abs() < 1e-12);
        assert!((schedule.value(100) - 2.0).abs() < 1e-12);
        // Clamped past the budget.
        assert!((schedule.value(150) - 2.0).abs() < 1e-12);
    }
}
