//! Vehicle controller: two independent PID axes plus a fail-safe brake.
//!
//! The speed axis maps positive error to throttle and negative error to
//! brake, with a hysteresis deadband so the actuation does not chatter
//! around zero error. The steering axis treats the planner's target as a
//! normalized correction and tracks it directly. Exactly one of
//! throttle/brake is ever non-zero.
//!
//! When plans stop arriving the controller first holds its last command,
//! then past a configured number of quiet ticks ramps the brake up (and the
//! throttle down) instead of jumping to a hard stop.

use crate::config::ControllerConfig;
use crate::pipeline::pid::{Pid, PidGains};
use crate::types::{ControlCommand, Plan};

/// Vehicle controller state
pub struct VehicleController {
    speed_pid: Pid,
    steer_pid: Pid,
    cfg: ControllerConfig,

    /// Latest normalized speed measurement
    current_speed: f64,
    /// Source timestamp of the previous plan, for dt measurement
    last_plan_ts: Option<u64>,
    /// Inputs processed since the last plan arrived
    inputs_since_plan: u32,
    /// Fail-safe braking engaged
    failsafe: bool,
    /// Last emitted command, held and ramped while input is missing
    last_command: Option<ControlCommand>,
}

impl VehicleController {
    /// Create a controller with zeroed loop state
    pub fn new(speed_gains: PidGains, steer_gains: PidGains, cfg: ControllerConfig) -> Self {
        log::debug!(
            "VehicleController: speed kp={:.2} ki={:.2} kd={:.2}, steer kp={:.2} ki={:.2} kd={:.2}, deadband={:.2}",
            speed_gains.kp,
            speed_gains.ki,
            speed_gains.kd,
            steer_gains.kp,
            steer_gains.ki,
            steer_gains.kd,
            cfg.speed_deadband
        );

        let alpha = cfg.derivative_filter_alpha;
        Self {
            speed_pid: Pid::new(speed_gains, alpha),
            steer_pid: Pid::new(steer_gains, alpha),
            cfg,
            current_speed: 0.0,
            last_plan_ts: None,
            inputs_since_plan: 0,
            failsafe: false,
            last_command: None,
        }
    }

    /// Record the latest speed measurement
    pub fn update_speed(&mut self, speed: f64) {
        self.current_speed = speed;
    }

    /// Fail-safe braking currently engaged
    pub fn in_failsafe(&self) -> bool {
        self.failsafe
    }

    /// Compute one command from one plan.
    pub fn on_plan(&mut self, plan: &Plan) -> ControlCommand {
        if self.failsafe {
            log::info!("plan input resumed, leaving fail-safe");
            self.failsafe = false;
        }
        self.inputs_since_plan = 0;

        let dt = self.plan_dt(plan.source_timestamp_us);

        // Speed axis. Inside the deadband the previous actuation holds, so
        // tiny errors do not flip throttle and brake back and forth.
        let error = plan.target_speed - self.current_speed;
        let (throttle, brake) = if error.abs() <= self.cfg.speed_deadband {
            match self.last_command {
                Some(prev) => (prev.throttle, prev.brake),
                None => (0.0, 0.0),
            }
        } else {
            let out = self.speed_pid.update(error, dt);
            if out > 0.0 {
                (out.min(1.0), 0.0)
            } else {
                (0.0, (-out).min(1.0))
            }
        };

        // Steering axis: the target already expresses a normalized
        // correction, so the setpoint error is the target itself.
        let steer = self
            .steer_pid
            .update(plan.target_steering, dt)
            .clamp(-1.0, 1.0);

        let command = ControlCommand {
            throttle,
            brake,
            steer,
            timestamp_us: plan.source_timestamp_us,
        };

        log::trace!(
            "control: throttle={:.2} brake={:.2} steer={:.2} (speed {:.2} -> {:.2})",
            command.throttle,
            command.brake,
            command.steer,
            self.current_speed,
            plan.target_speed
        );

        self.remember(command)
    }

    /// Account one input (sensor event or scheduler tick) that brought no
    /// plan. Returns a command to emit, if any:
    ///
    /// - within one tick of a plan: nothing, a fresh command just went out
    /// - up to the configured threshold: the last command, unchanged
    /// - beyond it: the ramped fail-safe brake
    pub fn on_tick(&mut self) -> Option<ControlCommand> {
        self.inputs_since_plan = self.inputs_since_plan.saturating_add(1);

        if self.inputs_since_plan <= 1 {
            return None;
        }
        if self.inputs_since_plan <= self.cfg.failsafe_after_ticks {
            return self.last_command;
        }

        if !self.failsafe {
            log::warn!(
                "no plan for {} ticks, engaging ramped brake",
                self.inputs_since_plan
            );
            self.failsafe = true;
        }

        let prev = self.last_command.unwrap_or(ControlCommand {
            throttle: 0.0,
            brake: 0.0,
            steer: 0.0,
            timestamp_us: 0,
        });

        let ramp = self.cfg.failsafe_brake_ramp;
        let throttle = (prev.throttle - ramp).max(0.0);
        let brake = if throttle > 0.0 {
            0.0
        } else {
            (prev.brake + ramp).min(1.0)
        };

        let command = ControlCommand {
            throttle,
            brake,
            steer: prev.steer,
            timestamp_us: prev.timestamp_us,
        };
        Some(self.remember(command))
    }

    /// Zero every piece of loop state, as after a stage restart.
    pub fn reset(&mut self) {
        self.speed_pid.reset();
        self.steer_pid.reset();
        self.current_speed = 0.0;
        self.last_plan_ts = None;
        self.inputs_since_plan = 0;
        self.failsafe = false;
        self.last_command = None;
    }

    /// Interval between consecutive plan timestamps, or `None` when the
    /// message is the first, stale, reordered, or implausibly late.
    fn plan_dt(&mut self, timestamp_us: u64) -> Option<f64> {
        let prev = self.last_plan_ts.replace(timestamp_us)?;
        if timestamp_us <= prev {
            return None;
        }
        let dt = (timestamp_us - prev) as f64 * 1e-6;
        (dt <= self.cfg.max_dt_s).then_some(dt)
    }

    fn remember(&mut self, command: ControlCommand) -> ControlCommand {
        debug_assert!(
            !(command.throttle > 0.0 && command.brake > 0.0),
            "throttle and brake both engaged"
        );
        self.last_command = Some(command);
        command
    }
}
