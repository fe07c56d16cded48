//! Configuration for the Sarathi daemon
//!
//! Loads configuration from a TOML file. Every section has working defaults
//! so the daemon runs against a local simulator with no file at all; a file
//! may override any subset of fields.

use crate::bridge::WireFormat;
use crate::error::{Error, Result};
use crate::pipeline::pid::PidGains;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level daemon configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub tick: TickConfig,
    pub speed_pid: PidGains,
    pub steer_pid: PidGains,
    pub controller: ControllerConfig,
    pub planner: PlannerConfig,
    pub logging: LoggingConfig,
}

/// UDP endpoints and receive timing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Bind address for inbound telemetry (simulator -> bridge)
    pub sensor_bind: String,
    /// Destination address for outbound commands (bridge -> simulator)
    pub control_addr: String,
    /// Receive timeout in milliseconds; must stay below the tick period so a
    /// missed datagram never stalls the loop past the next scheduled tick
    pub receive_timeout_ms: u64,
    /// Wire encoding for both channels
    pub wire_format: WireFormat,
}

impl TransportConfig {
    /// Receive timeout as a `Duration`
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            sensor_bind: "127.0.0.1:8001".to_string(),
            control_addr: "127.0.0.1:8002".to_string(),
            receive_timeout_ms: 10,
            wire_format: WireFormat::default(),
        }
    }
}

/// Control loop cadence
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Nominal control period in milliseconds
    pub period_ms: u64,
}

impl TickConfig {
    /// Tick period as a `Duration`
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self { period_ms: 50 }
    }
}

/// Controller behavior beyond the raw PID gains
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Speed error band (m/s) inside which actuation holds its last value
    pub speed_deadband: f64,
    /// EMA coefficient for the derivative low-pass filter, in (0, 1]
    pub derivative_filter_alpha: f64,
    /// Largest plausible interval between consecutive plans (seconds);
    /// anything above is treated as a stale/out-of-order message
    pub max_dt_s: f64,
    /// Consecutive inputs without a plan before the fail-safe engages
    pub failsafe_after_ticks: u32,
    /// Brake increase (and throttle decrease) per tick while in fail-safe
    pub failsafe_brake_ramp: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            speed_deadband: 0.1,
            derivative_filter_alpha: 0.2,
            max_dt_s: 0.5,
            failsafe_after_ticks: 10,
            failsafe_brake_ramp: 0.05,
        }
    }
}

/// Route following parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Cruise target speed in m/s
    pub cruise_speed: f64,
    /// Distance (m) at which a waypoint counts as reached
    pub waypoint_radius: f64,
    /// Distance (m) from the final waypoint where the speed taper begins
    pub slowdown_distance: f64,
    /// Full-lock steering angle (rad) used to normalize bearing error
    pub max_steering_rad: f64,
    /// Route waypoints as [x, y] pairs in the simulator's local frame
    pub route: Vec<[f64; 2]>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            cruise_speed: 5.0,
            waypoint_radius: 2.0,
            slowdown_distance: 10.0,
            max_steering_rad: 0.52,
            // Rectangular test circuit.
            route: vec![
                [0.0, 0.0],
                [50.0, 0.0],
                [50.0, 50.0],
                [0.0, 50.0],
                [0.0, 0.0],
            ],
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            tick: TickConfig::default(),
            speed_pid: PidGains::speed_defaults(),
            steer_pid: PidGains::steering_defaults(),
            controller: ControllerConfig::default(),
            planner: PlannerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.tick.period_ms == 0 {
            return Err(Error::InvalidParameter("tick.period_ms must be > 0".into()));
        }
        if self.transport.receive_timeout_ms >= self.tick.period_ms {
            return Err(Error::InvalidParameter(format!(
                "receive_timeout_ms ({}) must be smaller than tick period_ms ({})",
                self.transport.receive_timeout_ms, self.tick.period_ms
            )));
        }
        self.speed_pid.validate("speed_pid")?;
        self.steer_pid.validate("steer_pid")?;

        let c = &self.controller;
        if c.speed_deadband < 0.0 {
            return Err(Error::InvalidParameter(
                "controller.speed_deadband must be >= 0".into(),
            ));
        }
        if !(c.derivative_filter_alpha > 0.0 && c.derivative_filter_alpha <= 1.0) {
            return Err(Error::InvalidParameter(
                "controller.derivative_filter_alpha must be in (0, 1]".into(),
            ));
        }
        if c.max_dt_s <= 0.0 {
            return Err(Error::InvalidParameter(
                "controller.max_dt_s must be > 0".into(),
            ));
        }
        if c.failsafe_brake_ramp <= 0.0 {
            return Err(Error::InvalidParameter(
                "controller.failsafe_brake_ramp must be > 0".into(),
            ));
        }

        let p = &self.planner;
        if p.cruise_speed < 0.0 {
            return Err(Error::InvalidParameter(
                "planner.cruise_speed must be >= 0".into(),
            ));
        }
        if p.waypoint_radius <= 0.0 {
            return Err(Error::InvalidParameter(
                "planner.waypoint_radius must be > 0".into(),
            ));
        }
        if p.max_steering_rad <= 0.0 {
            return Err(Error::InvalidParameter(
                "planner.max_steering_rad must be > 0".into(),
            ));
        }

        Ok(())
    }
}
