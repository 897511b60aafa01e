//! Learning-rate schedules.

use std::f64::consts::PI;

pub trait LrScheduler {
    /// Learning rate for the next optimizer step.
    fn lr(&self) -> f64;
    /// Advance by one optimizer step.
    fn step(&mut self);
}

/// Cosine annealing with warm restarts every `period` steps (SGDR with a fixed period).
///
/// `lr(t) = min + 0.5 * (max - min) * (1 + cos(pi * (t mod period) / period))`
#[derive(Debug, Clone)]
pub struct CosineWarmRestarts {
    lr_max: f64,
    lr_min: f64,
    period: usize,
    current_step: usize,
}

impl CosineWarmRestarts {
    pub fn new(lr_max: f64, period: usize, lr_min: f64) -> Self {
        Self {
            lr_max,
            lr_min,
            period,
            current_step: 0,
        }
    }

    pub fn steps(&self) -> usize {
        self.current_step
    }

    pub fn lr_at(&self, step: usize) -> f64 {
        if self.period == 0 {
            return self.lr_max;
        }
        let t = (step % self.period) as f64 / self.period as f64;
        self.lr_min + 0.5 * (self.lr_max - self.lr_min) * (1.0 + (PI * t).cos())
    }
}

impl LrScheduler for CosineWarmRestarts {
    fn lr(&self) -> f64 {
        self.lr_at(self.current_step)
    }

    fn step(&mut self) {
        self.current_step += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_max_and_restarts_each_period() {
        let mut sched = CosineWarmRestarts::new(1e-4, 4, 0.0);
        let mut lrs = Vec::new();
        for _ in 0..9 {
            lrs.push(sched.lr());
            sched.step();
        }
        assert!((lrs[0] - 1e-4).abs() < 1e-12);
        assert!((lrs[2] - 5e-5).abs() < 1e-12);
        assert!((lrs[4] - 1e-4).abs() < 1e-12);
        assert!((lrs[8] - 1e-4).abs() < 1e-12);
        assert!(lrs[0] > lrs[1] && lrs[1] > lrs[2] && lrs[2] > lrs[3]);
        assert_eq!(sched.steps(), 9);
    }

    #[test]
    fn respects_minimum_lr() {
        let sched = CosineWarmRestarts::new(1.0, 2000, 0.1);
        for step in 0..2000 {
            let lr = sched.lr_at(step);
            assert!((0.1..=1.0).contains(&lr));
        }
        assert!((sched.lr_at(1000) - 0.55).abs() < 1e-12);
    }

    #[test]
    fn zero_period_is_constant() {
        let mut sched = CosineWarmRestarts::new(0.5, 0, 0.0);
        for _ in 0..17 {
            sched.step();
        }
        assert_eq!(sched.lr(), 0.5);
    }
}
