//! Structural translation from raw sensor frames to typed channel updates.
//!
//! One tagged envelope per populated sub-record, each carrying the frame's
//! original timestamp. No temporal smoothing happens here and partial frames
//! are normal; a consumer never waits for a complete sensor set.

use crate::runtime::{ChannelId, Envelope, Payload};
use crate::types::SensorFrame;
use std::collections::HashSet;

/// Sensor frame normalizer state
pub struct SensorNormalizer {
    /// Timestamp of the last accepted frame, for stale detection
    last_timestamp_us: Option<u64>,
    /// Unknown keys already reported, so each is logged once per session
    reported_unknown: HashSet<String>,
    /// Frames (or datagrams) that carried nothing usable
    schema_violations: u64,
    /// Frames discarded as stale or reordered
    stale_frames: u64,
}

impl SensorNormalizer {
    /// Create a normalizer with empty state
    pub fn new() -> Self {
        Self {
            last_timestamp_us: None,
            reported_unknown: HashSet::new(),
            schema_violations: 0,
            stale_frames: 0,
        }
    }

    /// Frames and datagrams rejected for carrying nothing recognizable
    pub fn schema_violations(&self) -> u64 {
        self.schema_violations
    }

    /// Frames discarded because their timestamp did not advance
    pub fn stale_frames(&self) -> u64 {
        self.stale_frames
    }

    /// Count a datagram the bridge could not decode at all.
    pub fn note_malformed(&mut self) {
        self.schema_violations += 1;
    }

    /// Translate one frame into its typed channel updates.
    ///
    /// Returns one envelope per populated sub-record. Stale frames and
    /// frames with zero recognized sub-records produce nothing.
    pub fn normalize(&mut self, frame: &SensorFrame) -> Vec<Envelope> {
        if let Some(last) = self.last_timestamp_us {
            if frame.timestamp_us <= last {
                self.stale_frames += 1;
                log::debug!(
                    "discarding stale frame: {} <= {}",
                    frame.timestamp_us,
                    last
                );
                return Vec::new();
            }
        }

        for key in &frame.unknown {
            if self.reported_unknown.insert(key.clone()) {
                log::warn!("ignoring unknown sensor field `{}`", key);
            }
        }

        let ts = frame.timestamp_us;
        let mut out = Vec::with_capacity(4);

        if let Some(position) = frame.position {
            out.push(Envelope::new(
                ChannelId::Position,
                ts,
                Payload::Position(position),
            ));
        }
        if let Some(inertial) = frame.inertial {
            out.push(Envelope::new(
                ChannelId::Inertial,
                ts,
                Payload::Inertial(inertial),
            ));
        }
        if let Some(speed) = frame.speed {
            out.push(Envelope::new(ChannelId::Speed, ts, Payload::Speed(speed)));
        }
        if let Some(imagery) = &frame.imagery {
            out.push(Envelope::new(
                ChannelId::Imagery,
                ts,
                Payload::Imagery(imagery.clone()),
            ));
        }

        if out.is_empty() {
            self.schema_violations += 1;
            log::debug!("frame at {} carried no recognized sensors", ts);
            return out;
        }

        self.last_timestamp_us = Some(ts);
        out
    }
}

impl Default for SensorNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{Serializer, WireFormat};
    use crate::types::{ImageryMeta, Position};

    fn frame_with_speed(ts: u64, speed: f64) -> SensorFrame {
        SensorFrame {
            timestamp_us: ts,
            speed: Some(speed),
            ..SensorFrame::default()
        }
    }

    #[test]
    fn emits_one_envelope_per_populated_record() {
        let mut normalizer = SensorNormalizer::new();
        let frame = SensorFrame {
            timestamp_us: 100,
            position: Some(Position {
                latitude: 1.0,
                longitude: 2.0,
                altitude: 0.0,
            }),
            speed: Some(3.5),
            imagery: Some(ImageryMeta {
                width: 800,
                height: 600,
                channels: None,
                id: None,
            }),
            ..SensorFrame::default()
        };

        let out = normalizer.normalize(&frame);

        let channels: Vec<ChannelId> = out.iter().map(|e| e.channel).collect();
        assert_eq!(
            channels,
            vec![ChannelId::Position, ChannelId::Speed, ChannelId::Imagery]
        );
        assert!(out.iter().all(|e| e.timestamp_us == 100));
    }

    #[test]
    fn partial_frames_are_normal() {
        let mut normalizer = SensorNormalizer::new();

        let out = normalizer.normalize(&frame_with_speed(1, 2.0));

        assert_eq!(out.len(), 1);
        assert_eq!(normalizer.schema_violations(), 0);
    }

    #[test]
    fn empty_frame_counts_as_schema_violation() {
        let mut normalizer = SensorNormalizer::new();

        let out = normalizer.normalize(&SensorFrame::empty(50));

        assert!(out.is_empty());
        assert_eq!(normalizer.schema_violations(), 1);

        // The junk frame must not advance the stale watermark.
        assert_eq!(normalizer.normalize(&frame_with_speed(10, 1.0)).len(), 1);
    }

    #[test]
    fn malformed_datagram_counts_exactly_once() {
        let mut normalizer = SensorNormalizer::new();
        let serializer = Serializer::new(WireFormat::Msgpack);

        // What the bridge does with truncated bytes: decode fails, the
        // normalizer is told, nothing terminates.
        let bytes = serializer.encode(&frame_with_speed(1, 2.0)).unwrap();
        assert!(serializer.decode_frame(&bytes[..bytes.len() / 2]).is_err());
        normalizer.note_malformed();

        assert_eq!(normalizer.schema_violations(), 1);

        // The stage keeps working afterwards.
        assert_eq!(normalizer.normalize(&frame_with_speed(5, 1.0)).len(), 1);
    }

    #[test]
    fn stale_frames_are_discarded() {
        let mut normalizer = SensorNormalizer::new();
        assert_eq!(normalizer.normalize(&frame_with_speed(100, 1.0)).len(), 1);

        // Reordered delivery: older timestamp after newer.
        assert!(normalizer.normalize(&frame_with_speed(90, 2.0)).is_empty());
        // Duplicate timestamp is stale too.
        assert!(normalizer.normalize(&frame_with_speed(100, 3.0)).is_empty());
        assert_eq!(normalizer.stale_frames(), 2);

        // Progress resumes with a fresh timestamp.
        assert_eq!(normalizer.normalize(&frame_with_speed(110, 4.0)).len(), 1);
    }

    #[test]
    fn unknown_keys_reported_once_per_key() {
        let mut normalizer = SensorNormalizer::new();
        let mut frame = frame_with_speed(1, 1.0);
        frame.unknown = vec!["lidar".to_string(), "radar".to_string()];

        normalizer.normalize(&frame);
        assert_eq!(normalizer.reported_unknown.len(), 2);

        // Same keys again: the set does not grow, the log stays quiet.
        let mut again = frame_with_speed(2, 1.0);
        again.unknown = vec!["lidar".to_string()];
        normalizer.normalize(&again);
        assert_eq!(normalizer.reported_unknown.len(), 2);
    }
}
