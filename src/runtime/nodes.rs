//! Concrete stages wired into the pipeline.
//!
//! Each adapter owns exactly one processing component (and, at the edges,
//! one transport socket) and translates between envelopes and that
//! component's API. Nothing here holds state beyond its own component.

use crate::bridge::{ControlEgress, SensorIngress};
use crate::error::Result;
use crate::pipeline::{RoutePlanner, SensorNormalizer, VehicleController};
use crate::runtime::{ChannelId, Envelope, Payload, Stage};
use std::time::{Duration, Instant};

/// How often the link counters go to the debug log.
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Source stage: polls the sensor socket and republishes decoded frames as
/// typed channel updates.
pub struct IngressStage {
    ingress: SensorIngress,
    normalizer: SensorNormalizer,
    last_stats_log: Instant,
}

impl IngressStage {
    /// Wrap a bound ingress socket
    pub fn new(ingress: SensorIngress) -> Self {
        Self {
            ingress,
            normalizer: SensorNormalizer::new(),
            last_stats_log: Instant::now(),
        }
    }
}

impl Stage for IngressStage {
    fn name(&self) -> &'static str {
        "ingress"
    }

    fn on_event(&mut self, _event: Envelope, emit: &mut dyn FnMut(Envelope)) -> Result<()> {
        let received = self.ingress.receive();

        for _ in 0..received.malformed {
            self.normalizer.note_malformed();
        }
        if let Some(frame) = received.frame {
            for envelope in self.normalizer.normalize(&frame) {
                emit(envelope);
            }
        }

        if self.last_stats_log.elapsed() >= STATS_LOG_INTERVAL {
            let stats = self.ingress.stats();
            log::debug!(
                "link: {} frames in, {} decode errors, {} timeouts, {} schema violations, {} stale",
                stats.frames_received,
                stats.decode_errors,
                stats.timeouts,
                self.normalizer.schema_violations(),
                self.normalizer.stale_frames()
            );
            self.last_stats_log = Instant::now();
        }

        Ok(())
    }
}

/// Planner stage: tracks position/heading updates, emits one plan per speed
/// update (the per-frame cadence carrier).
pub struct PlannerStage {
    planner: RoutePlanner,
}

impl PlannerStage {
    /// Wrap a planner
    pub fn new(planner: RoutePlanner) -> Self {
        Self { planner }
    }
}

impl Stage for PlannerStage {
    fn name(&self) -> &'static str {
        "planner"
    }

    fn on_event(&mut self, event: Envelope, emit: &mut dyn FnMut(Envelope)) -> Result<()> {
        match event.payload {
            Payload::Position(position) => self.planner.update_position(&position),
            Payload::Inertial(inertial) => {
                if let Some(compass) = inertial.compass {
                    self.planner.update_heading(compass);
                }
            }
            Payload::Speed(_) => {
                let plan = self.planner.plan(event.timestamp_us);
                emit(Envelope::new(
                    ChannelId::Plan,
                    event.timestamp_us,
                    Payload::Plan(plan),
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Controller stage: turns plans into actuation commands, and quiet ticks
/// into held or fail-safe commands.
pub struct ControllerStage {
    controller: VehicleController,
}

impl ControllerStage {
    /// Wrap a controller
    pub fn new(controller: VehicleController) -> Self {
        Self { controller }
    }
}

impl Stage for ControllerStage {
    fn name(&self) -> &'static str {
        "controller"
    }

    fn on_event(&mut self, event: Envelope, emit: &mut dyn FnMut(Envelope)) -> Result<()> {
        match event.payload {
            Payload::Speed(speed) => {
                self.controller.update_speed(speed);
                // A speed update without a matching plan counts toward the
                // missing-input threshold, exactly like a quiet tick.
                if let Some(command) = self.controller.on_tick() {
                    emit(Envelope::new(
                        ChannelId::Control,
                        command.timestamp_us,
                        Payload::Control(command),
                    ));
                }
            }
            Payload::Plan(plan) => {
                let command = self.controller.on_plan(&plan);
                emit(Envelope::new(
                    ChannelId::Control,
                    command.timestamp_us,
                    Payload::Control(command),
                ));
            }
            Payload::Tick => {
                if let Some(command) = self.controller.on_tick() {
                    emit(Envelope::new(
                        ChannelId::Control,
                        command.timestamp_us,
                        Payload::Control(command),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Sink stage: sends commands back to the simulator.
pub struct EgressStage {
    egress: ControlEgress,
}

impl EgressStage {
    /// Wrap an open egress socket
    pub fn new(egress: ControlEgress) -> Self {
        Self { egress }
    }
}

impl Stage for EgressStage {
    fn name(&self) -> &'static str {
        "egress"
    }

    fn on_event(&mut self, event: Envelope, _emit: &mut dyn FnMut(Envelope)) -> Result<()> {
        if let Payload::Control(command) = event.payload {
            // Send failures ride the next natural tick; no immediate retry.
            if let Err(e) = self.egress.send(&command) {
                log::warn!("control send failed (retrying next tick): {}", e);
            }
        }
        Ok(())
    }
}
