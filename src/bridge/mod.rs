//! UDP transport bridge between the simulator and the pipeline.
//!
//! The bridge owns one socket per direction with a scoped lifetime: bound
//! when its stage starts, released when the stage stops. Telemetry arrives
//! on the sensor channel; actuation leaves on the control channel. Both
//! carry one self-describing frame per datagram (see [`wire`]).
//!
//! Receive latency is bounded: [`SensorIngress::receive`] never blocks past
//! the configured timeout, and a timeout is not an error - it tells the
//! caller to hold its last known state for one tick. Malformed datagrams are
//! dropped here and surfaced only as a count; the normalizer turns that
//! count into its schema-violation statistics.

mod wire;

pub use wire::{Serializer, WireFormat, MAX_DATAGRAM_SIZE};

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::types::{ControlCommand, SensorFrame};
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

/// Per-direction link counters. Errors never interrupt the loop; they end
/// up here and in the periodic stats log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkStats {
    /// Frames decoded on the sensor channel
    pub frames_received: u64,
    /// Datagrams that failed to decode
    pub decode_errors: u64,
    /// Receive calls that returned no data within the timeout
    pub timeouts: u64,
    /// Commands sent on the control channel
    pub commands_sent: u64,
    /// Failed sends (retried on the next natural tick)
    pub send_errors: u64,
}

/// Result of one ingress poll.
#[derive(Debug, Default)]
pub struct Received {
    /// Most recent decodable frame, if any arrived within the timeout
    pub frame: Option<SensorFrame>,
    /// Datagrams dropped as undecodable during this poll
    pub malformed: u32,
}

/// Receiving half of the bridge: simulator telemetry in.
pub struct SensorIngress {
    socket: UdpSocket,
    serializer: Serializer,
    stats: LinkStats,
    buf: Vec<u8>,
}

impl SensorIngress {
    /// Bind the sensor channel socket and arm its receive timeout.
    pub fn bind(transport: &TransportConfig) -> Result<Self> {
        let socket = UdpSocket::bind(&transport.sensor_bind)?;
        socket.set_read_timeout(Some(transport.receive_timeout()))?;

        log::info!(
            "sensor ingress bound to {} (timeout {}ms)",
            socket.local_addr()?,
            transport.receive_timeout_ms
        );

        Ok(Self {
            socket,
            serializer: Serializer::new(transport.wire_format),
            stats: LinkStats::default(),
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    /// Address the socket actually bound to (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Return the freshest decodable frame available within the receive
    /// timeout, never blocking past it.
    ///
    /// The first read may wait up to the timeout; after that the queue is
    /// drained non-blocking so a burst of datagrams collapses to the newest
    /// frame instead of building a backlog.
    pub fn receive(&mut self) -> Received {
        let mut out = Received::default();

        match self.socket.recv(&mut self.buf) {
            Ok(len) => self.accept(len, &mut out),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                self.stats.timeouts += 1;
                return out;
            }
            Err(e) => {
                log::error!("sensor recv error: {}", e);
                return out;
            }
        }

        // Drain whatever queued while we slept; the newest frame wins.
        if self.socket.set_nonblocking(true).is_ok() {
            loop {
                match self.socket.recv(&mut self.buf) {
                    Ok(len) => self.accept(len, &mut out),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        log::error!("sensor recv error while draining: {}", e);
                        break;
                    }
                }
            }
            if let Err(e) = self.socket.set_nonblocking(false) {
                log::warn!("failed to restore blocking mode: {}", e);
            }
        }

        out
    }

    fn accept(&mut self, len: usize, out: &mut Received) {
        match self.serializer.decode_frame(&self.buf[..len]) {
            Ok(frame) => {
                self.stats.frames_received += 1;
                out.frame = Some(frame);
            }
            Err(e) => {
                self.stats.decode_errors += 1;
                out.malformed += 1;
                log::debug!("dropping undecodable datagram ({} bytes): {}", len, e);
            }
        }
    }

    /// Snapshot of the ingress counters.
    pub fn stats(&self) -> LinkStats {
        self.stats
    }
}

/// Sending half of the bridge: actuation commands out.
pub struct ControlEgress {
    socket: UdpSocket,
    target: SocketAddr,
    serializer: Serializer,
    stats: LinkStats,
}

impl ControlEgress {
    /// Open the control channel socket toward the simulator.
    pub fn open(transport: &TransportConfig) -> Result<Self> {
        let target = transport
            .control_addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "control_addr `{}` resolves to no address",
                    transport.control_addr
                ))
            })?;

        let socket = UdpSocket::bind("0.0.0.0:0")?;

        log::info!("control egress sending to {}", target);

        Ok(Self {
            socket,
            target,
            serializer: Serializer::new(transport.wire_format),
            stats: LinkStats::default(),
        })
    }

    /// Encode one command into one datagram and send it.
    ///
    /// A failed send is counted and reported to the caller, who retries on
    /// the next natural tick - the loop is periodic, not event-retried.
    pub fn send(&mut self, command: &ControlCommand) -> Result<()> {
        let payload = self.serializer.encode(command)?;

        match self.socket.send_to(&payload, self.target) {
            Ok(_) => {
                self.stats.commands_sent += 1;
                log::trace!(
                    "sent control throttle={:.2} brake={:.2} steer={:.2}",
                    command.throttle,
                    command.brake,
                    command.steer
                );
                Ok(())
            }
            Err(e) => {
                self.stats.send_errors += 1;
                Err(e.into())
            }
        }
    }

    /// Snapshot of the egress counters.
    pub fn stats(&self) -> LinkStats {
        self.stats
    }
}
