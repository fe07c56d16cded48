//! Pipeline assembly: one named thread per stage, bounded channels between.
//!
//! Topology:
//!
//! ```text
//! simulator --UDP--> [ingress] --position/inertial/speed--> [planner]
//!                        |                                     |
//!                        +------------speed------------+      plan
//!                                                      v       v
//!                                                    [controller]
//!                                                         |
//!                                                      control
//!                                                         v
//! simulator <--UDP-- [egress]
//! ```

use crate::bridge::{ControlEgress, SensorIngress};
use crate::config::Config;
use crate::error::Result;
use crate::pipeline::{RoutePlanner, VehicleController};
use crate::runtime::{
    ChannelId, ControllerStage, EgressStage, Envelope, IngressStage, OutputPort, PlannerStage,
    Stage, StageRunner,
};
use crossbeam_channel::bounded;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Queue depth between stages. Small on purpose: under backpressure the
/// freshest event matters and stale ones are shed.
const CHANNEL_CAPACITY: usize = 16;

/// Running pipeline: thread handles plus the addresses tests need.
pub struct PipelineHandles {
    /// Address the sensor ingress socket actually bound to
    pub sensor_addr: SocketAddr,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl PipelineHandles {
    /// Clear the running flag and wait for every stage to stop.
    pub fn shutdown(self) {
        self.running.store(false, Ordering::Relaxed);
        self.join();
    }

    /// Wait for every stage thread to finish.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                log::error!("a stage thread panicked");
            }
        }
    }
}

/// Bind the sockets, build the four stages, and spawn one named thread per
/// stage. Stages begin with zeroed internal state.
pub fn spawn_pipeline(config: &Config, running: Arc<AtomicBool>) -> Result<PipelineHandles> {
    config.validate()?;

    let ingress = SensorIngress::bind(&config.transport)?;
    let sensor_addr = ingress.local_addr()?;
    let egress = ControlEgress::open(&config.transport)?;

    let (planner_tx, planner_rx) = bounded::<Envelope>(CHANNEL_CAPACITY);
    let (controller_tx, controller_rx) = bounded::<Envelope>(CHANNEL_CAPACITY);
    let (egress_tx, egress_rx) = bounded::<Envelope>(CHANNEL_CAPACITY);

    let tick = config.tick.period();

    let ingress_stage = IngressStage::new(ingress);
    let planner_stage = PlannerStage::new(RoutePlanner::new(config.planner.clone()));
    let controller_stage = ControllerStage::new(VehicleController::new(
        config.speed_pid,
        config.steer_pid,
        config.controller.clone(),
    ));
    let egress_stage = EgressStage::new(egress);

    let mut handles = Vec::with_capacity(4);
    handles.push(spawn_stage(
        Box::new(ingress_stage),
        None,
        vec![
            OutputPort::new(
                planner_tx,
                &[ChannelId::Position, ChannelId::Inertial, ChannelId::Speed],
            ),
            OutputPort::new(controller_tx.clone(), &[ChannelId::Speed]),
        ],
        tick,
        &running,
    )?);
    handles.push(spawn_stage(
        Box::new(planner_stage),
        Some(planner_rx),
        vec![OutputPort::new(controller_tx, &[ChannelId::Plan])],
        tick,
        &running,
    )?);
    handles.push(spawn_stage(
        Box::new(controller_stage),
        Some(controller_rx),
        vec![OutputPort::new(egress_tx, &[ChannelId::Control])],
        tick,
        &running,
    )?);
    handles.push(spawn_stage(
        Box::new(egress_stage),
        Some(egress_rx),
        vec![],
        tick,
        &running,
    )?);

    log::info!("pipeline running: ingress -> planner -> controller -> egress");

    Ok(PipelineHandles {
        sensor_addr,
        running,
        handles,
    })
}

fn spawn_stage(
    stage: Box<dyn Stage>,
    input: Option<crossbeam_channel::Receiver<Envelope>>,
    outputs: Vec<OutputPort>,
    tick_period: Duration,
    running: &Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let name = stage.name();
    let runner = StageRunner::new(stage, input, outputs, tick_period, Arc::clone(running));

    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || runner.run())
        .map_err(|e| crate::error::Error::Other(format!("failed to spawn {} stage: {}", name, e)))
}
