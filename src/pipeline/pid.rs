//! PID loop with saturation, anti-windup, and derivative filtering.
//!
//! One [`Pid`] instance drives one control axis. The loop keeps its memory
//! in an explicit [`PidState`] value that starts at zero and is mutated
//! exactly once per update, so a restarted stage always begins from a clean
//! slate and nothing is shared between axes.

use crate::error::{Error, Result};
use serde::Deserialize;

/// Gains and output bounds for one control axis
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Lower saturation bound
    pub output_min: f64,
    /// Upper saturation bound
    pub output_max: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            output_min: -1.0,
            output_max: 1.0,
        }
    }
}

impl PidGains {
    /// Gains for the speed axis (throttle/brake)
    pub fn speed_defaults() -> Self {
        Self {
            kp: 0.5,
            ki: 0.1,
            kd: 0.05,
            output_min: -1.0,
            output_max: 1.0,
        }
    }

    /// Gains for the steering axis
    pub fn steering_defaults() -> Self {
        Self {
            kp: 1.0,
            ki: 0.0,
            kd: 0.1,
            output_min: -1.0,
            output_max: 1.0,
        }
    }

    /// Reject bounds that cannot saturate anything.
    pub fn validate(&self, axis: &str) -> Result<()> {
        if self.output_min >= self.output_max {
            return Err(Error::InvalidParameter(format!(
                "{}: output_min ({}) must be below output_max ({})",
                axis, self.output_min, self.output_max
            )));
        }
        Ok(())
    }
}

/// Loop memory for one axis: integral accumulator, previous error, filtered
/// derivative, and the last valid timestep. Zeroed at stage start.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidState {
    pub integral: f64,
    pub prev_error: f64,
    pub filtered_derivative: f64,
    pub last_dt: f64,
}

/// One PID control loop
#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    /// EMA coefficient for the derivative filter, in (0, 1]
    filter_alpha: f64,
    state: PidState,
}

impl Pid {
    /// Create a loop with zeroed state
    pub fn new(gains: PidGains, filter_alpha: f64) -> Self {
        Self {
            gains,
            filter_alpha,
            state: PidState::default(),
        }
    }

    /// Current loop memory
    pub fn state(&self) -> &PidState {
        &self.state
    }

    /// Zero the loop memory, as after a stage restart
    pub fn reset(&mut self) {
        self.state = PidState::default();
    }

    /// Advance the loop one tick and return the saturated output.
    ///
    /// `dt` is the measured interval between consecutive message timestamps.
    /// `None` means the interval was non-positive or implausibly large
    /// (stale or reordered message): the loop falls back to the last valid
    /// interval and leaves the derivative untouched for this tick.
    ///
    /// Anti-windup: the integral accumulator is frozen whenever the
    /// unclamped output would leave the saturation bounds.
    pub fn update(&mut self, error: f64, dt: Option<f64>) -> f64 {
        let g = self.gains;

        let (dt, fresh) = match dt {
            Some(d) => {
                self.state.last_dt = d;
                (d, true)
            }
            None => (self.state.last_dt, false),
        };

        if fresh && dt > 0.0 {
            let raw = (error - self.state.prev_error) / dt;
            self.state.filtered_derivative =
                self.filter_alpha * raw + (1.0 - self.filter_alpha) * self.state.filtered_derivative;
        }

        let candidate = self.state.integral + error * dt;
        let unclamped = g.kp * error + g.ki * candidate + g.kd * self.state.filtered_derivative;
        if unclamped >= g.output_min && unclamped <= g.output_max {
            self.state.integral = candidate;
        }

        let output = g.kp * error + g.ki * self.state.integral + g.kd * self.state.filtered_derivative;
        self.state.prev_error = error;

        output.clamp(g.output_min, g.output_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const DT: Option<f64> = Some(0.05);

    #[test]
    fn output_never_leaves_bounds() {
        let gains = PidGains {
            kp: 2.0,
            ki: 1.5,
            kd: 0.8,
            output_min: -1.0,
            output_max: 1.0,
        };
        let mut pid = Pid::new(gains, 0.3);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..10_000 {
            let error = rng.gen_range(-100.0..100.0);
            let dt = if rng.gen_bool(0.9) {
                Some(rng.gen_range(0.001..0.2))
            } else {
                None
            };
            let out = pid.update(error, dt);
            assert!((-1.0..=1.0).contains(&out), "output {} out of bounds", out);
        }
    }

    #[test]
    fn integral_freezes_while_saturated() {
        let gains = PidGains {
            kp: 1.0,
            ki: 1.0,
            kd: 0.0,
            output_min: -1.0,
            output_max: 1.0,
        };
        let mut pid = Pid::new(gains, 1.0);

        // A huge error pins the output at the bound; the accumulator must
        // not keep growing behind it.
        for _ in 0..100 {
            assert_eq!(pid.update(50.0, DT), 1.0);
        }
        let frozen = pid.state().integral;
        assert!(frozen.abs() < 1.0, "integral wound up to {}", frozen);

        // Once the error flips, recovery is immediate instead of waiting
        // for a bloated accumulator to bleed off.
        let out = pid.update(-2.0, DT);
        assert!(out < 0.0, "expected negative output, got {}", out);
    }

    #[test]
    fn invalid_dt_reuses_last_interval_and_skips_derivative() {
        let gains = PidGains {
            kp: 0.0,
            ki: 1.0,
            kd: 1.0,
            output_min: -10.0,
            output_max: 10.0,
        };
        let mut pid = Pid::new(gains, 1.0);

        pid.update(0.1, Some(0.05));
        let derivative_before = pid.state().filtered_derivative;
        let integral_before = pid.state().integral;

        // Out-of-order message: dt rejected by the caller.
        pid.update(0.5, None);

        assert_relative_eq!(pid.state().filtered_derivative, derivative_before);
        assert_eq!(pid.state().last_dt, 0.05);
        // Integration still advances, using the last valid interval.
        assert_relative_eq!(pid.state().integral, integral_before + 0.5 * 0.05);
    }

    #[test]
    fn derivative_is_low_pass_filtered() {
        let gains = PidGains {
            kp: 0.0,
            ki: 0.0,
            kd: 1.0,
            output_min: -100.0,
            output_max: 100.0,
        };
        let mut filtered = Pid::new(gains, 0.2);
        let mut unfiltered = Pid::new(gains, 1.0);

        // A step in the error produces a derivative spike; the filter must
        // attenuate it.
        filtered.update(0.0, DT);
        unfiltered.update(0.0, DT);
        let f = filtered.update(1.0, DT).abs();
        let u = unfiltered.update(1.0, DT).abs();

        assert!(f < u, "filtered spike {} not below raw spike {}", f, u);
    }

    #[test]
    fn reset_zeroes_state() {
        let mut pid = Pid::new(PidGains::speed_defaults(), 0.2);
        pid.update(3.0, DT);
        assert_ne!(*pid.state(), PidState::default());

        pid.reset();
        assert_eq!(*pid.state(), PidState::default());
    }
}
