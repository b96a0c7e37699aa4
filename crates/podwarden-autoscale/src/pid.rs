//! Discrete PID step with trapezoidal integration.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Gains {
    pub k_p: f64,
    pub k_i: f64,
    /// Usually negative.
    pub k_d: f64,
}

/// Controller memory carried from one accepted decision to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PidState {
    pub prev_error: f64,
    pub integral: f64,
}

/// Every intermediate value of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PidStep {
    pub error: f64,
    pub integral: f64,
    pub derivative: f64,
    pub control: f64,
    /// `ceil(control / target)`, saturated into `i64`.
    pub pods: i64,
}

impl PidState {
    /// Evaluate the law for `measured` without touching the memory.
    pub fn step(&self, gains: &Gains, target: f64, measured: f64, period: f64) -> PidStep {
        let error = target - measured;
        let integral = self.integral + 0.5 * period * (self.prev_error + error);
        let derivative = (error - self.prev_error) / period;
        let control = gains.k_p * error + gains.k_i * integral + gains.k_d * derivative;

        PidStep {
            error,
            integral,
            derivative,
            control,
            pods: (control / target).ceil() as i64,
        }
    }

    pub fn commit(&mut self, step: &PidStep) {
        self.prev_error = step.error;
        self.integral = step.integral;
    }
}
