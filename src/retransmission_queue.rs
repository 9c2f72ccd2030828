use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::time::Duration;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::trace;
use crate::error::{SendError, TransmitResult};

/// Notification of a confirmable message's terminal outcome, called with the message id
pub type ResultCallback = Box<dyn FnOnce(u16, TransmitResult) + Send>;

/// A restartable one-shot timer based on tokio's clock, so tests can pause and advance time
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetransmitTimer {
    started: Instant,
    timeout: Duration,
}

impl RetransmitTimer {
    pub fn start(now: Instant, timeout: Duration) -> RetransmitTimer {
        RetransmitTimer {
            started: now,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn deadline(&self) -> Instant {
        self.started + self.timeout
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline().saturating_duration_since(now)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.remaining(now).is_zero()
    }

    /// double the timeout and restart the timer at `now`
    pub fn backoff(&mut self, now: Instant) {
        self.timeout = self.timeout.checked_mul(2).unwrap_or(Duration::MAX);
        self.started = now;
    }
}

/// A confirmable message awaiting its Ack
pub struct RetransmissionEntry {
    message_id: u16,
    destination: SocketAddr,
    /// the serialized message, retransmitted verbatim
    message: Bytes,
    callback: Option<ResultCallback>,
    /// number of transmissions so far, including the first one
    retry_count: u16,
    timer: RetransmitTimer,
}

impl RetransmissionEntry {
    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn message(&self) -> &Bytes {
        &self.message
    }

    pub fn retry_count(&self) -> u16 {
        self.retry_count
    }

    pub fn timer(&self) -> &RetransmitTimer {
        &self.timer
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Record a successful retransmission at `now`: one more transmission, and the next one is
    ///  due after twice the previous timeout
    pub fn on_retransmitted(&mut self, now: Instant) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.timer.backoff(now);
    }

    /// Hand the terminal result to the callback, if there is one. Consuming the entry makes
    ///  notifying twice impossible.
    pub fn notify(mut self, result: TransmitResult) {
        if let Some(callback) = self.callback.take() {
            trace!("notifying result for message {}: {:?}", self.message_id, result);
            callback(self.message_id, result);
        }
    }
}

impl Debug for RetransmissionEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetransmissionEntry")
            .field("message_id", &self.message_id)
            .field("destination", &self.destination)
            .field("message_len", &self.message.len())
            .field("has_callback", &self.has_callback())
            .field("retry_count", &self.retry_count)
            .field("timer", &self.timer)
            .finish()
    }
}

/// The confirmable messages in flight, in the order they were first sent.
///
/// Entries are stored under a sequence number that grows with each insertion, so iteration is
///  insertion order, and a side index maps message ids to sequence numbers.
#[derive(Default)]
pub struct RetransmissionQueue {
    entries: BTreeMap<u64, RetransmissionEntry>,
    by_message_id: FxHashMap<u16, u64>,
    next_seq: u64,
}

impl RetransmissionQueue {
    pub fn new() -> RetransmissionQueue {
        Default::default()
    }

    /// Append an entry for a message that is about to be sent for the first time. Its timer
    ///  starts at `now` with `initial_timeout`, which the caller draws from the jitter range.
    pub fn add(&mut self, message_id: u16, destination: SocketAddr, message: Bytes, callback: Option<ResultCallback>, now: Instant, initial_timeout: Duration) -> Result<(), SendError> {
        if self.by_message_id.contains_key(&message_id) {
            return Err(SendError::MessageIdInFlight(message_id));
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        trace!("queueing message {} to {:?} with initial timeout {:?}", message_id, destination, initial_timeout);
        self.entries.insert(seq, RetransmissionEntry {
            message_id,
            destination,
            message,
            callback,
            retry_count: 1,
            timer: RetransmitTimer::start(now, initial_timeout),
        });
        self.by_message_id.insert(message_id, seq);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, message_id: u16) -> bool {
        self.by_message_id.contains_key(&message_id)
    }

    pub fn get(&self, message_id: u16) -> Option<&RetransmissionEntry> {
        self.by_message_id.get(&message_id)
            .and_then(|seq| self.entries.get(seq))
    }

    pub fn get_mut(&mut self, message_id: u16) -> Option<&mut RetransmissionEntry> {
        self.by_message_id.get(&message_id)
            .and_then(|seq| self.entries.get_mut(seq))
    }

    pub fn remove(&mut self, message_id: u16) -> Option<RetransmissionEntry> {
        let seq = self.by_message_id.remove(&message_id)?;
        self.entries.remove(&seq)
    }

    /// entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &RetransmissionEntry> {
        self.entries.values()
    }

    /// The time until the earliest timer expires, zero if one has expired already
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.iter()
            .map(|e| e.timer.remaining(now))
            .min()
    }

    pub fn has_timeout(&self, now: Instant) -> bool {
        self.iter()
            .any(|e| e.timer.is_expired(now))
    }

    /// Remove and return the first expired entry in insertion order
    pub fn take_timeout(&mut self, now: Instant) -> Option<RetransmissionEntry> {
        let message_id = self.iter()
            .find(|e| e.timer.is_expired(now))?
            .message_id;
        self.remove(message_id)
    }

    /// The ids of all expired entries, in insertion order
    pub fn expired_message_ids(&self, now: Instant) -> Vec<u16> {
        self.iter()
            .filter(|e| e.timer.is_expired(now))
            .map(|e| e.message_id)
            .collect()
    }
}
