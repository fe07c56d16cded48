//! Event-driven stage runtime.
//!
//! Each processing component runs as a single-threaded, cooperatively
//! scheduled [`Stage`]: it consumes one tagged [`Envelope`] at a time in
//! arrival order, executes synchronously, and emits zero or more envelopes
//! before the next input is accepted. All concurrency lives *between*
//! stages, provided by one thread and one bounded channel per stage; no
//! stage shares memory with another.
//!
//! The originating sensor timestamp rides every envelope unchanged from
//! ingress to egress, so end-to-end latency stays measurable from outside.
//!
//! Dispatch is an explicit state machine rather than ad-hoc callbacks: a
//! runner is `Idle`, takes exactly one transition through `Processing` per
//! event, and deterministically returns to `Idle` before the next event.
//! When no event arrives within the nominal tick period the runner
//! synthesizes a [`Payload::Tick`], which is how source stages poll their
//! socket and how the controller notices missing input. A stage that panics
//! takes down its thread; supervision and restart belong to the embedding
//! runtime, and a restarted stage always starts from zeroed state.

mod nodes;
mod threads;

pub use nodes::{ControllerStage, EgressStage, IngressStage, PlannerStage};
pub use threads::{spawn_pipeline, PipelineHandles};

use crate::error::Result;
use crate::types::{ControlCommand, ImageryMeta, Inertial, Plan, Position};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tagged channel identifiers for envelope routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    Position,
    Inertial,
    Speed,
    Imagery,
    Plan,
    Control,
    Tick,
}

impl ChannelId {
    /// Stable name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelId::Position => "position",
            ChannelId::Inertial => "inertial",
            ChannelId::Speed => "speed",
            ChannelId::Imagery => "imagery",
            ChannelId::Plan => "plan",
            ChannelId::Control => "control",
            ChannelId::Tick => "tick",
        }
    }
}

/// Event payloads moving between stages. Everything is an immutable copy;
/// no two stages ever share a live structure.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Position(Position),
    Inertial(Inertial),
    Speed(f64),
    Imagery(ImageryMeta),
    Plan(Plan),
    Control(ControlCommand),
    /// Scheduler tick: no event arrived within the nominal period
    Tick,
}

/// One tagged event with its originating timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub channel: ChannelId,
    /// Timestamp of the sensor frame this event descends from, propagated
    /// unchanged across every hop
    pub timestamp_us: u64,
    pub payload: Payload,
}

impl Envelope {
    /// Create an envelope
    pub fn new(channel: ChannelId, timestamp_us: u64, payload: Payload) -> Self {
        Self {
            channel,
            timestamp_us,
            payload,
        }
    }

    /// Synthetic scheduler tick
    pub fn tick() -> Self {
        Self::new(ChannelId::Tick, 0, Payload::Tick)
    }
}

/// A single-threaded, cooperatively scheduled processing unit.
pub trait Stage: Send {
    /// Stable stage name for logs and thread naming
    fn name(&self) -> &'static str;

    /// Handle one input event, emitting any number of outputs through
    /// `emit`. Must return before the next event is delivered; errors are
    /// absorbed by the runner (logged, loop continues).
    fn on_event(&mut self, event: Envelope, emit: &mut dyn FnMut(Envelope)) -> Result<()>;
}

/// Dispatch states of a stage runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageState {
    Idle,
    Processing,
}

/// Routes envelopes to one downstream stage, filtered by channel.
pub struct OutputPort {
    tx: Sender<Envelope>,
    channels: &'static [ChannelId],
}

impl OutputPort {
    /// Subscribe a downstream channel to a set of envelope channels
    pub fn new(tx: Sender<Envelope>, channels: &'static [ChannelId]) -> Self {
        Self { tx, channels }
    }

    /// Non-blocking forward; a full queue sheds the event rather than
    /// stalling the producer, since a fresher one is already on the way.
    fn forward(&self, envelope: &Envelope) {
        if !self.channels.contains(&envelope.channel) {
            return;
        }
        match self.tx.try_send(envelope.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(e)) => {
                log::trace!("dropping stale {} event (queue full)", e.channel.as_str());
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Drives one stage: delivery loop, tick synthesis, state machine.
pub struct StageRunner {
    stage: Box<dyn Stage>,
    /// Upstream queue; `None` for source stages, which run on ticks alone
    input: Option<Receiver<Envelope>>,
    outputs: Vec<OutputPort>,
    tick_period: Duration,
    running: Arc<AtomicBool>,
    state: StageState,
}

impl StageRunner {
    /// Create a runner for one stage
    pub fn new(
        stage: Box<dyn Stage>,
        input: Option<Receiver<Envelope>>,
        outputs: Vec<OutputPort>,
        tick_period: Duration,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            stage,
            input,
            outputs,
            tick_period,
            running,
            state: StageState::Idle,
        }
    }

    /// Run the delivery loop until the shared flag clears or the upstream
    /// channel disconnects. Consumes the runner; sockets and queues owned
    /// by the stage are released on return.
    pub fn run(mut self) {
        let name = self.stage.name();
        log::info!("{} stage started", name);

        while self.running.load(Ordering::Relaxed) {
            let event = match &self.input {
                Some(rx) => match rx.recv_timeout(self.tick_period) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => Envelope::tick(),
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                // Source stages pace themselves: their blocking socket
                // reads are bounded by the receive timeout.
                None => Envelope::tick(),
            };

            debug_assert_eq!(self.state, StageState::Idle);
            self.state = StageState::Processing;

            let outputs = &self.outputs;
            let mut emit = |envelope: Envelope| {
                for port in outputs {
                    port.forward(&envelope);
                }
            };

            if let Err(e) = self.stage.on_event(event, &mut emit) {
                // Per-tick errors never interrupt the loop.
                log::error!("{} stage error: {}", name, e);
            }

            self.state = StageState::Idle;
        }

        log::info!("{} stage stopped", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    /// Doubles every speed event, drops the rest.
    struct Doubler;

    impl Stage for Doubler {
        fn name(&self) -> &'static str {
            "doubler"
        }

        fn on_event(&mut self, event: Envelope, emit: &mut dyn FnMut(Envelope)) -> Result<()> {
            if let Payload::Speed(v) = event.payload {
                emit(Envelope::new(
                    ChannelId::Speed,
                    event.timestamp_us,
                    Payload::Speed(v * 2.0),
                ));
            }
            Ok(())
        }
    }

    #[test]
    fn runner_processes_events_in_arrival_order() {
        let (in_tx, in_rx) = bounded(16);
        let (out_tx, out_rx) = bounded(16);
        let running = Arc::new(AtomicBool::new(true));

        let runner = StageRunner::new(
            Box::new(Doubler),
            Some(in_rx),
            vec![OutputPort::new(out_tx, &[ChannelId::Speed])],
            Duration::from_millis(10),
            Arc::clone(&running),
        );
        let handle = std::thread::spawn(move || runner.run());

        for (ts, v) in [(1u64, 1.0), (2, 2.0), (3, 3.0)] {
            in_tx
                .send(Envelope::new(ChannelId::Speed, ts, Payload::Speed(v)))
                .unwrap();
        }

        for expected in [2.0, 4.0, 6.0] {
            let out = out_rx.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_eq!(out.payload, Payload::Speed(expected));
        }

        running.store(false, Ordering::Relaxed);
        drop(in_tx);
        handle.join().unwrap();
    }

    #[test]
    fn timestamps_survive_the_hop() {
        let (in_tx, in_rx) = bounded(4);
        let (out_tx, out_rx) = bounded(4);
        let running = Arc::new(AtomicBool::new(true));

        let runner = StageRunner::new(
            Box::new(Doubler),
            Some(in_rx),
            vec![OutputPort::new(out_tx, &[ChannelId::Speed])],
            Duration::from_millis(10),
            Arc::clone(&running),
        );
        let handle = std::thread::spawn(move || runner.run());

        in_tx
            .send(Envelope::new(ChannelId::Speed, 123_456, Payload::Speed(1.0)))
            .unwrap();
        let out = out_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(out.timestamp_us, 123_456);

        running.store(false, Ordering::Relaxed);
        drop(in_tx);
        handle.join().unwrap();
    }

    #[test]
    fn output_port_filters_by_channel() {
        let (tx, rx) = bounded(4);
        let port = OutputPort::new(tx, &[ChannelId::Plan]);

        port.forward(&Envelope::new(ChannelId::Speed, 1, Payload::Speed(1.0)));
        assert!(rx.is_empty());

        port.forward(&Envelope::new(
            ChannelId::Plan,
            1,
            Payload::Plan(Plan::halt(0, 1)),
        ));
        assert_eq!(rx.len(), 1);
    }
}
