use std::net::SocketAddr;
use std::time::Duration;
use anyhow::bail;

pub const DEFAULT_PORT: u16 = 5683;

/// The protocol's transmission parameters, governing retransmission of confirmable messages.
///
/// A confirmable message's first retransmission happens after a random timeout between
///  `ack_timeout` and `ack_timeout * ack_random_factor`, and the timeout doubles with each
///  further retransmission. After `max_retransmit` retransmissions without an Ack, the message
///  is given up on.
#[derive(Clone, Debug, PartialEq)]
pub struct TransmissionParams {
    pub ack_timeout: Duration,
    pub ack_random_factor: f64,
    pub max_retransmit: u16,
}

impl Default for TransmissionParams {
    fn default() -> Self {
        TransmissionParams {
            ack_timeout: Duration::from_secs(2),
            ack_random_factor: 1.5,
            max_retransmit: 4,
        }
    }
}

impl TransmissionParams {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ack_timeout.is_zero() {
            bail!("ack timeout must be positive");
        }
        if !self.ack_random_factor.is_finite() || self.ack_random_factor < 1.0 {
            bail!("ack random factor must be finite and at least 1.0, was {}", self.ack_random_factor);
        }
        if Duration::try_from_secs_f64(self.ack_timeout.as_secs_f64() * self.ack_random_factor).is_err() {
            bail!("ack timeout {:?} times ack random factor {} is out of range", self.ack_timeout, self.ack_random_factor);
        }
        Ok(())
    }

    /// Map a fraction in `[0, 1]` to an initial retransmission timeout in
    ///  `[ack_timeout, ack_timeout * ack_random_factor]`
    pub fn initial_timeout(&self, fraction: f64) -> Duration {
        let fraction = fraction.clamp(0.0, 1.0);
        self.ack_timeout.mul_f64(1.0 + (self.ack_random_factor - 1.0) * fraction)
    }

    /// The longest time a confirmable message can wait for an Ack, from its first transmission
    ///  to giving up on it
    pub fn max_transmit_wait(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.max_retransmit as u32 + 1) - 1;
        self.ack_timeout.mul_f64(self.ack_random_factor)
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
    }
}

pub struct EndpointConfig {
    pub bind_addr: SocketAddr,

    /// The largest incoming datagram that is accepted. Longer datagrams are dropped.
    pub read_buffer_size: usize,
    /// Upper bound for the size of a serialized outgoing message
    pub write_buffer_size: usize,

    /// The maximum time a single `receive()` waits for a datagram. This also bounds the latency
    ///  of stopping a background receive loop.
    pub receive_timeout: Duration,
    pub send_timeout: Duration,

    pub transmission: TransmissionParams,
}

impl EndpointConfig {
    /// Defaults for `bind_addr`: 1152 byte buffers (the protocol's recommended upper bound for
    ///  a message when the path MTU is unknown), and short timeouts suitable for a poll loop.
    pub fn new(bind_addr: SocketAddr) -> EndpointConfig {
        EndpointConfig {
            bind_addr,
            read_buffer_size: 1152,
            write_buffer_size: 1152,
            receive_timeout: Duration::from_millis(200),
            send_timeout: Duration::from_secs(1),
            transmission: Default::default(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.read_buffer_size < 4 || self.write_buffer_size < 4 {
            bail!("buffers must at least hold a message header");
        }
        if self.receive_timeout.is_zero() {
            bail!("receive timeout must be positive");
        }
        if self.send_timeout.is_zero() {
            bail!("send timeout must be positive");
        }
        self.transmission.validate()
    }
}
