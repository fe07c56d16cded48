//! Data model shared by the simulator link and the pipeline stages.
//!
//! Every type that crosses the datagram link derives serde traits and keeps
//! optional sub-records as `Option`, so field presence is part of the wire
//! contract: a missing field is absent, never zero. Decoders ignore fields
//! they do not recognize, which is what makes the link tolerant of producers
//! running a newer schema.

use serde::{Deserialize, Serialize};

/// Geodetic position sample from the GNSS sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Altitude in meters
    #[serde(default)]
    pub altitude: f64,
}

/// Inertial measurement sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Inertial {
    /// Linear acceleration (m/s²), body frame x/y/z
    pub accel: [f64; 3],
    /// Angular rate (rad/s), body frame x/y/z
    pub gyro: [f64; 3],
    /// Absolute heading in radians (0 = east), when the producer supplies one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compass: Option<f64>,
}

/// Camera frame metadata. Full image data never crosses the datagram link;
/// only the shape and an identifier travel with the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageryMeta {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Color channels (typically 3)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    /// Producer-side camera identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// One telemetry frame from the simulator.
///
/// Only the producer timestamp is mandatory. A frame may carry any subset of
/// the sub-records; consumers must never wait for a complete set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorFrame {
    /// Producer monotonic tick time in microseconds
    pub timestamp_us: u64,

    /// Producer step counter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inertial: Option<Inertial>,

    /// Forward speed in m/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imagery: Option<ImageryMeta>,

    /// Top-level keys the decoder did not recognize. Filled in by the wire
    /// layer after decoding; never serialized.
    #[serde(skip)]
    pub unknown: Vec<String>,
}

impl SensorFrame {
    /// Top-level keys this build understands.
    pub const KNOWN_KEYS: [&'static str; 6] = [
        "timestamp_us",
        "step",
        "position",
        "inertial",
        "speed",
        "imagery",
    ];

    /// Frame carrying only a timestamp.
    pub fn empty(timestamp_us: u64) -> Self {
        Self {
            timestamp_us,
            ..Self::default()
        }
    }
}

/// Short-horizon target produced by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Desired forward speed in m/s, never negative
    pub target_speed: f64,
    /// Normalized steering correction in [-1, 1]
    pub target_steering: f64,
    /// Route waypoint currently being tracked
    pub waypoint_index: u64,
    /// Timestamp of the sensor frame this plan derives from
    pub source_timestamp_us: u64,
}

impl Plan {
    /// Safe default: stop and hold the wheel straight.
    pub fn halt(waypoint_index: u64, source_timestamp_us: u64) -> Self {
        Self {
            target_speed: 0.0,
            target_steering: 0.0,
            waypoint_index,
            source_timestamp_us,
        }
    }
}

/// Actuation command sent back to the simulator.
///
/// The controller guarantees `throttle > 0` implies `brake == 0`; the wire
/// format does not enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    /// Throttle in [0, 1]
    pub throttle: f64,
    /// Brake in [0, 1]
    pub brake: f64,
    /// Steering in [-1, 1]
    pub steer: f64,
    /// Timestamp of the sensor frame this command answers
    pub timestamp_us: u64,
}
