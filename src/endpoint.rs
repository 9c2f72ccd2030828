use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use crate::buffer::Buffer;
use crate::config::EndpointConfig;
use crate::error::{SendError, TransmitResult, TransportError};
use crate::header::{Method, MessageType, PROTOCOL_VERSION_1};
use crate::message::Message;
use crate::message_handler::MessageHandler;
use crate::options_list::OptionsList;
use crate::random::{Random, RngRandom};
use crate::retransmission_queue::{RetransmissionEntry, RetransmissionQueue, ResultCallback};
use crate::token::{PrefixWidth, Token};
use crate::transport::{recv_with_timeout, send_with_timeout, CoapSocket};
use crate::uri;

/// Whether a request is sent as a confirmable message (acknowledged, retransmitted until
///  acknowledged) or fire-and-forget
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reliability {
    Confirmable,
    NonConfirmable,
}

impl From<Reliability> for MessageType {
    fn from(value: Reliability) -> Self {
        match value {
            Reliability::Confirmable => MessageType::Confirmable,
            Reliability::NonConfirmable => MessageType::NonConfirmable,
        }
    }
}

/// Endpoint is the place where all other parts of the protocol come together: It owns the
///  socket, serializes and sends messages, receives and decodes datagrams, and keeps track of
///  confirmable messages until they are acknowledged or given up on.
///
/// There are two ways to drive an endpoint:
/// * a poll loop, alternating [Endpoint::receive] (bounded by the configured receive timeout)
///   and [Endpoint::check_queues] - [Endpoint::poll] does one round of this
/// * a background task started by [Endpoint::spawn_receive_loop], dispatching each received
///   message to a [MessageHandler], while application code sends concurrently
///
/// The retransmission queue is behind a mutex, and [Endpoint::check_queues] holds it for its
///  entire scan. So an Ack that is processed before a scan starts always wins, and an Ack
///  arriving after a scan gave up on its message is an orphan. Result callbacks are called
///  after the lock is released, exactly once per confirmable message.
pub struct Endpoint {
    socket: Arc<dyn CoapSocket>,
    config: Arc<EndpointConfig>,
    random: Arc<dyn Random>,
    next_message_id: AtomicU16,
    queue: Mutex<RetransmissionQueue>,
    read_buf: Mutex<Buffer>,
    write_buf: Mutex<Buffer>,
}

impl Endpoint {
    pub async fn bind(config: EndpointConfig) -> anyhow::Result<Endpoint> {
        config.validate()?;

        let socket = UdpSocket::bind(config.bind_addr).await?;
        info!("bound endpoint to {:?}", socket.local_addr()?);

        Endpoint::with_socket(Arc::new(socket), config, Arc::new(RngRandom))
    }

    pub fn with_socket(socket: Arc<dyn CoapSocket>, config: EndpointConfig, random: Arc<dyn Random>) -> anyhow::Result<Endpoint> {
        config.validate()?;

        let initial_message_id = random.next_u32() as u16;
        Ok(Endpoint {
            socket,
            // one spare byte, so that a datagram filling the buffer is known to exceed read_buffer_size
            read_buf: Mutex::new(Buffer::new(config.read_buffer_size + 1)),
            write_buf: Mutex::new(Buffer::new(config.write_buffer_size)),
            config: Arc::new(config),
            random,
            next_message_id: AtomicU16::new(initial_message_id),
            queue: Default::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket.local_addr()
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// The next message id. Ids wrap around but are never 0.
    pub fn next_id(&self) -> u16 {
        loop {
            let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// A token correlating a request with its response, prefixed with the request's message id
    pub fn create_token(&self, message_id: u16) -> Token {
        Token::create(message_id as u32, PrefixWidth::Two, self.random.as_ref())
    }

    /// number of confirmable messages awaiting an Ack
    pub async fn in_flight(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Serialize and send a message.
    ///
    /// A confirmable message is queued for retransmission before it is sent for the first time.
    ///  If that first send fails, the message is not retried: it is dequeued, the callback is
    ///  notified of the failure, and the error is returned. A callback is only meaningful for
    ///  confirmable messages.
    pub async fn send(&self, to: SocketAddr, message: &Message, callback: Option<ResultCallback>) -> Result<(), SendError> {
        if callback.is_some() && !message.is_confirmable() {
            return Err(SendError::CallbackRequiresConfirmable);
        }

        let serialized = {
            let mut buf = self.write_buf.lock().await;
            buf.clear();
            message.ser(&mut buf)?;
            Bytes::copy_from_slice(buf.as_ref())
        };
        trace!("sending {:?} to {:?}", message, to);

        if !message.is_confirmable() {
            send_with_timeout(self.socket.as_ref(), &serialized, to, self.config.send_timeout).await?;
            return Ok(());
        }

        let message_id = message.message_id();
        let initial_timeout = self.config.transmission.initial_timeout(self.random.gen_f64_range(0.0..1.0));
        self.queue.lock().await
            .add(message_id, to, serialized.clone(), callback, Instant::now(), initial_timeout)?;

        if let Err(e) = send_with_timeout(self.socket.as_ref(), &serialized, to, self.config.send_timeout).await {
            warn!("sending confirmable message {} to {:?} failed: {}", message_id, to, e);
            let entry = self.queue.lock().await
                .remove(message_id);
            if let Some(entry) = entry {
                entry.notify(TransmitResult::Failed(e));
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Send an empty Ack, e.g. to acknowledge a request before sending a separate response
    pub async fn ack(&self, to: SocketAddr, token: Token, message_id: u16) -> Result<(), SendError> {
        self.send(to, &Message::ack(token, message_id), None).await
    }

    /// Reject a confirmable message that cannot be processed
    pub async fn reset(&self, to: SocketAddr, message_id: u16) -> Result<(), SendError> {
        self.send(to, &Message::reset(message_id), None).await
    }

    /// Wait for a single datagram, at most for the configured receive timeout.
    ///
    /// Returns `Ok(None)` if nothing arrived in time, or if the datagram is not a valid message:
    ///  malformed input is dropped as noise. An Ack or Reset terminates the matching confirmable
    ///  message (if any) and notifies its callback before the message is returned.
    pub async fn receive(&self) -> Result<Option<Message>, TransportError> {
        let message = {
            let mut buf = self.read_buf.lock().await;
            buf.maximize_len();
            let (len, from) = match recv_with_timeout(self.socket.as_ref(), buf.as_mut(), self.config.receive_timeout).await? {
                Some(received) => received,
                None => return Ok(None),
            };
            buf.truncate(len);
            trace!("received datagram from {:?}: {:?}", from, buf.as_ref());

            if len == buf.capacity() {
                warn!("received a datagram exceeding the read buffer size of {} bytes from {:?} - dropping", self.config.read_buffer_size, from);
                return Ok(None);
            }

            match Message::deser(buf.as_ref()) {
                Ok(message) => message.with_from(from),
                Err(e) => {
                    debug!("received malformed datagram from {:?} - dropping: {}", from, e);
                    return Ok(None);
                }
            }
        };

        if message.version() != PROTOCOL_VERSION_1 {
            debug!("received message with unsupported version {} - dropping", message.version());
            return Ok(None);
        }

        if message.is_ack() || message.is_reset() {
            self.on_ack_or_reset(&message).await;
        }
        Ok(Some(message))
    }

    async fn on_ack_or_reset(&self, message: &Message) {
        let entry = self.queue.lock().await
            .remove(message.message_id());

        match entry {
            Some(entry) if message.is_ack() => {
                debug!("message {} was acknowledged", message.message_id());
                entry.notify(TransmitResult::Acknowledged);
            }
            Some(entry) => {
                debug!("message {} was rejected by the peer", message.message_id());
                entry.notify(TransmitResult::Rejected);
            }
            None => {
                debug!("received {:?} for message {} that is not in flight - ignoring", message.message_type(), message.message_id());
            }
        }
    }

    /// Retransmit every confirmable message whose timer expired, doubling its timeout, or give up
    ///  on it once its retransmissions are used up or retransmitting fails.
    pub async fn check_queues(&self) {
        let mut finished: Vec<(RetransmissionEntry, TransmitResult)> = Vec::new();
        {
            let mut queue = self.queue.lock().await;
            let now = Instant::now();

            for message_id in queue.expired_message_ids(now) {
                let Some(entry) = queue.get(message_id) else {
                    continue;
                };

                if entry.retry_count() > self.config.transmission.max_retransmit {
                    debug!("message {} was not acknowledged after {} transmissions - giving up", message_id, entry.retry_count());
                    if let Some(entry) = queue.remove(message_id) {
                        finished.push((entry, TransmitResult::RetriesExhausted));
                    }
                    continue;
                }

                let destination = entry.destination();
                let serialized = entry.message().clone();
                trace!("retransmitting message {} to {:?} (transmission #{})", message_id, destination, entry.retry_count() + 1);

                match send_with_timeout(self.socket.as_ref(), &serialized, destination, self.config.send_timeout).await {
                    Ok(_) => {
                        if let Some(entry) = queue.get_mut(message_id) {
                            entry.on_retransmitted(now);
                        }
                    }
                    Err(e) => {
                        warn!("retransmitting message {} to {:?} failed: {}", message_id, destination, e);
                        if let Some(entry) = queue.remove(message_id) {
                            finished.push((entry, TransmitResult::Failed(e)));
                        }
                    }
                }
            }
        }

        for (entry, result) in finished {
            entry.notify(result);
        }
    }

    /// One round of a poll loop: a bounded receive followed by a retransmission check
    pub async fn poll(&self) -> Result<Option<Message>, TransportError> {
        let received = self.receive().await;
        self.check_queues().await;
        received
    }

    #[allow(clippy::too_many_arguments)]
    async fn request(&self, method: Method, destination: SocketAddr, reliability: Reliability, uri: &str, extra_options: &OptionsList, payload: Option<Bytes>, callback: Option<ResultCallback>) -> Result<u16, SendError> {
        let options = uri::to_options(uri, Some(destination))?
            .merge(extra_options);

        let message_id = self.next_id();
        let message = Message::new(reliability.into(), method.into(), message_id, self.create_token(message_id), options, payload);
        debug!("{:?} {} to {:?} as message {}", method, uri, destination, message_id);

        self.send(destination, &message, callback).await?;
        Ok(message_id)
    }

    /// Send a GET request for `uri` to `destination`, returning the request's message id
    pub async fn get(&self, destination: SocketAddr, reliability: Reliability, uri: &str, extra_options: &OptionsList, callback: Option<ResultCallback>) -> Result<u16, SendError> {
        self.request(Method::Get, destination, reliability, uri, extra_options, None, callback).await
    }

    pub async fn post(&self, destination: SocketAddr, reliability: Reliability, uri: &str, extra_options: &OptionsList, payload: Option<Bytes>, callback: Option<ResultCallback>) -> Result<u16, SendError> {
        self.request(Method::Post, destination, reliability, uri, extra_options, payload, callback).await
    }

    pub async fn put(&self, destination: SocketAddr, reliability: Reliability, uri: &str, extra_options: &OptionsList, payload: Option<Bytes>, callback: Option<ResultCallback>) -> Result<u16, SendError> {
        self.request(Method::Put, destination, reliability, uri, extra_options, payload, callback).await
    }

    pub async fn delete(&self, destination: SocketAddr, reliability: Reliability, uri: &str, extra_options: &OptionsList, callback: Option<ResultCallback>) -> Result<u16, SendError> {
        self.request(Method::Delete, destination, reliability, uri, extra_options, None, callback).await
    }

    /// Start a background task that receives messages and dispatches them to `handler`,
    ///  checking the retransmission queue between receives
    pub fn spawn_receive_loop(self: &Arc<Self>, handler: Arc<dyn MessageHandler>) -> ReceiveLoop {
        let running = Arc::new(AtomicBool::new(true));

        let endpoint = self.clone();
        let loop_running = running.clone();
        let handle = tokio::spawn(async move {
            endpoint.recv_loop(handler, loop_running).await;
        });

        ReceiveLoop { running, handle }
    }

    async fn recv_loop(&self, handler: Arc<dyn MessageHandler>, running: Arc<AtomicBool>) {
        info!("starting receive loop");

        while running.load(Ordering::Acquire) {
            match self.receive().await {
                Ok(Some(message)) => handler.on_message(self, message).await,
                Ok(None) => {}
                Err(TransportError::Closed) => {
                    error!("socket was closed - terminating receive loop");
                    break;
                }
                Err(e) => {
                    debug!("error receiving from socket: {}", e);
                }
            }
            self.check_queues().await;
        }

        info!("receive loop terminated");
    }
}

/// Handle for a background receive loop. [ReceiveLoop::stop] lets the loop finish its current
///  round; dropping the handle without stopping aborts the loop's task.
pub struct ReceiveLoop {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ReceiveLoop {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.handle.is_finished()
    }

    /// Signal the loop to terminate and wait for it. The loop notices the signal after its
    ///  current receive returns, i.e. within the endpoint's receive timeout.
    pub async fn stop(mut self) -> anyhow::Result<()> {
        self.running.store(false, Ordering::Release);
        (&mut self.handle).await?;
        Ok(())
    }
}

impl Drop for ReceiveLoop {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            debug!("receive loop handle dropped without stopping - aborting the loop");
            self.running.store(false, Ordering::Release);
            self.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Code;
    use crate::message_handler::MockMessageHandler;
    use crate::option::*;
    use crate::random::MockRandom;
    use crate::transport::MockCoapSocket;
    use mockall::predicate::eq;
    use rstest::rstest;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::runtime::Builder;
    use tokio::sync::mpsc;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 5683))
    }

    fn mock_random(seed: u32) -> Arc<dyn Random> {
        let mut random = MockRandom::new();
        random.expect_next_u32()
            .return_const(seed);
        random.expect_gen_f64_range()
            .return_const(0.0);
        Arc::new(random)
    }

    fn endpoint(socket: MockCoapSocket) -> Endpoint {
        Endpoint::with_socket(Arc::new(socket), EndpointConfig::new("127.0.0.1:0".parse().unwrap()), mock_random(0x1234)).unwrap()
    }

    /// a mock socket that records every datagram sent, with all sends succeeding
    fn recording_socket(sent: Arc<StdMutex<Vec<(Vec<u8>, SocketAddr)>>>) -> MockCoapSocket {
        let mut socket = MockCoapSocket::new();
        socket.expect_send_to()
            .returning(move |buf, to| {
                sent.lock().unwrap().push((buf.to_vec(), to));
                Ok(buf.len())
            });
        socket
    }

    /// a mock socket whose receives return the given datagrams from `peer()`, in order
    fn receiving_socket(socket: &mut MockCoapSocket, datagrams: Vec<Vec<u8>>) {
        let mut seq = mockall::Sequence::new();
        for datagram in datagrams {
            socket.expect_recv_from()
                .once()
                .in_sequence(&mut seq)
                .returning(move |buf| {
                    buf[..datagram.len()].copy_from_slice(&datagram);
                    Ok((datagram.len(), peer()))
                });
        }
    }

    fn callback() -> (ResultCallback, mpsc::UnboundedReceiver<(u16, TransmitResult)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: ResultCallback = Box::new(move |id, result| {
            let _ = tx.send((id, result));
        });
        (callback, rx)
    }

    fn confirmable(message_id: u16) -> Message {
        Message::confirmable(Code::GET, message_id, Token::new(vec![1, 2]).unwrap(), OptionsList::new(vec![CoapOption::from_text(URI_PATH, "x")]), None)
    }

    fn serialized(message: &Message) -> Vec<u8> {
        let mut buf = Buffer::new(1152);
        message.ser(&mut buf).unwrap();
        buf.as_ref().to_vec()
    }

    fn paused_runtime() -> tokio::runtime::Runtime {
        Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap()
    }

    #[test]
    fn test_next_id_skips_zero() {
        let endpoint = Endpoint::with_socket(Arc::new(MockCoapSocket::new()), EndpointConfig::new(peer()), mock_random(0x0001_fffe)).unwrap();
        assert_eq!(endpoint.next_id(), 0xfffe);
        assert_eq!(endpoint.next_id(), 0xffff);
        assert_eq!(endpoint.next_id(), 1);
        assert_eq!(endpoint.next_id(), 2);
    }

    #[test]
    fn test_retransmission_timing() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let endpoint = endpoint(recording_socket(sent.clone()));

        paused_runtime().block_on(async move {
            let (callback, mut rx) = callback();
            endpoint.send(peer(), &confirmable(100), Some(callback)).await.unwrap();

            {
                let queue = endpoint.queue.lock().await;
                let entry = queue.get(100).unwrap();
                assert_eq!(entry.retry_count(), 1);
                assert_eq!(entry.timer().timeout(), Duration::from_secs(2));
            }
            assert_eq!(sent.lock().unwrap().len(), 1);

            tokio::time::advance(Duration::from_millis(1999)).await;
            endpoint.check_queues().await;
            assert_eq!(sent.lock().unwrap().len(), 1);

            tokio::time::advance(Duration::from_millis(1)).await;
            endpoint.check_queues().await;
            {
                let queue = endpoint.queue.lock().await;
                let entry = queue.get(100).unwrap();
                assert_eq!(entry.retry_count(), 2);
                assert_eq!(entry.timer().timeout(), Duration::from_secs(4));
            }

            let sent = sent.lock().unwrap();
            assert_eq!(sent.len(), 2);
            assert_eq!(sent[0], sent[1]);
            assert_eq!(sent[0], (serialized(&confirmable(100)), peer()));
            assert!(rx.try_recv().is_err());
        });
    }

    #[test]
    fn test_retries_exhausted() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let endpoint = endpoint(recording_socket(sent.clone()));

        paused_runtime().block_on(async move {
            let (callback, mut rx) = callback();
            endpoint.send(peer(), &confirmable(100), Some(callback)).await.unwrap();

            for _ in 0..10 {
                tokio::time::advance(Duration::from_secs(64)).await;
                endpoint.check_queues().await;
            }

            assert_eq!(sent.lock().unwrap().len(), 5);
            assert_eq!(endpoint.in_flight().await, 0);
            assert_eq!(rx.recv().await, Some((100, TransmitResult::RetriesExhausted)));
            assert_eq!(rx.recv().await, None);
        });
    }

    #[test]
    fn test_ack_dequeues() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let mut socket = recording_socket(sent.clone());
        let ack = serialized(&Message::ack(Token::empty(), 100));
        receiving_socket(&mut socket, vec![ack.clone(), ack]);
        let endpoint = endpoint(socket);

        paused_runtime().block_on(async move {
            let (callback, mut rx) = callback();
            endpoint.send(peer(), &confirmable(100), Some(callback)).await.unwrap();
            assert_eq!(endpoint.in_flight().await, 1);

            let received = endpoint.receive().await.unwrap().unwrap();
            assert!(received.is_ack());
            assert_eq!(received.from(), Some(peer()));
            assert_eq!(endpoint.in_flight().await, 0);

            let orphan = endpoint.receive().await.unwrap().unwrap();
            assert_eq!(orphan.message_id(), 100);

            tokio::time::advance(Duration::from_secs(64)).await;
            endpoint.check_queues().await;
            assert_eq!(sent.lock().unwrap().len(), 1);

            assert_eq!(rx.recv().await, Some((100, TransmitResult::Acknowledged)));
            assert_eq!(rx.recv().await, None);
        });
    }

    #[test]
    fn test_reset_rejects() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let mut socket = recording_socket(sent.clone());
        receiving_socket(&mut socket, vec![serialized(&Message::reset(100))]);
        let endpoint = endpoint(socket);

        paused_runtime().block_on(async move {
            let (callback, mut rx) = callback();
            endpoint.send(peer(), &confirmable(100), Some(callback)).await.unwrap();

            assert!(endpoint.receive().await.unwrap().unwrap().is_reset());
            assert_eq!(endpoint.in_flight().await, 0);
            assert_eq!(rx.recv().await, Some((100, TransmitResult::Rejected)));
        });
    }

    #[test]
    fn test_ack_after_giving_up_is_orphan() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let mut socket = recording_socket(sent.clone());
        receiving_socket(&mut socket, vec![serialized(&Message::ack(Token::empty(), 100))]);
        let endpoint = endpoint(socket);

        paused_runtime().block_on(async move {
            let (callback, mut rx) = callback();
            endpoint.send(peer(), &confirmable(100), Some(callback)).await.unwrap();
            for _ in 0..5 {
                tokio::time::advance(Duration::from_secs(64)).await;
                endpoint.check_queues().await;
            }
            assert!(endpoint.receive().await.unwrap().unwrap().is_ack());

            assert_eq!(rx.recv().await, Some((100, TransmitResult::RetriesExhausted)));
            assert_eq!(rx.recv().await, None);
        });
    }

    #[test]
    fn test_first_send_failure() {
        let mut socket = MockCoapSocket::new();
        socket.expect_send_to()
            .once()
            .returning(|_, _| Err(TransportError::Unreachable));
        let endpoint = endpoint(socket);

        paused_runtime().block_on(async move {
            let (callback, mut rx) = callback();
            let result = endpoint.send(peer(), &confirmable(100), Some(callback)).await;
            assert_eq!(result, Err(SendError::Transport(TransportError::Unreachable)));
            assert_eq!(endpoint.in_flight().await, 0);
            assert_eq!(rx.recv().await, Some((100, TransmitResult::Failed(TransportError::Unreachable))));
            assert_eq!(rx.recv().await, None);
        });
    }

    #[test]
    fn test_retransmission_failure() {
        let mut socket = MockCoapSocket::new();
        let mut seq = mockall::Sequence::new();
        socket.expect_send_to()
            .once()
            .in_sequence(&mut seq)
            .returning(|buf, _| Ok(buf.len()));
        socket.expect_send_to()
            .once()
            .in_sequence(&mut seq)
            .returning(|_, _| Err(TransportError::Closed));
        let endpoint = endpoint(socket);

        paused_runtime().block_on(async move {
            let (callback, mut rx) = callback();
            endpoint.send(peer(), &confirmable(100), Some(callback)).await.unwrap();

            tokio::time::advance(Duration::from_secs(2)).await;
            endpoint.check_queues().await;

            assert_eq!(endpoint.in_flight().await, 0);
            assert_eq!(rx.recv().await, Some((100, TransmitResult::Failed(TransportError::Closed))));
        });
    }

    #[rstest]
    #[case::non_confirmable(Message::non_confirmable(Code::GET, 1, Token::empty(), OptionsList::empty(), None))]
    #[case::ack(Message::ack(Token::empty(), 1))]
    #[case::reset(Message::reset(1))]
    fn test_callback_requires_confirmable(#[case] message: Message) {
        let endpoint = endpoint(MockCoapSocket::new());
        paused_runtime().block_on(async move {
            let (callback, _rx) = callback();
            assert_eq!(endpoint.send(peer(), &message, Some(callback)).await, Err(SendError::CallbackRequiresConfirmable));
        });
    }

    #[test]
    fn test_non_confirmable_is_not_queued() {
        let mut socket = MockCoapSocket::new();
        let message = Message::non_confirmable(Code::GET, 1, Token::empty(), OptionsList::empty(), None);
        socket.expect_send_to()
            .with(eq(serialized(&message)), eq(peer()))
            .once()
            .returning(|buf, _| Ok(buf.len()));
        let endpoint = endpoint(socket);

        paused_runtime().block_on(async move {
            endpoint.send(peer(), &message, None).await.unwrap();
            assert_eq!(endpoint.in_flight().await, 0);
        });
    }

    #[test]
    fn test_message_id_in_flight() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let endpoint = endpoint(recording_socket(sent.clone()));
        paused_runtime().block_on(async move {
            endpoint.send(peer(), &confirmable(100), None).await.unwrap();
            assert_eq!(endpoint.send(peer(), &confirmable(100), None).await, Err(SendError::MessageIdInFlight(100)));
            assert_eq!(sent.lock().unwrap().len(), 1);
        });
    }

    #[test]
    fn test_message_too_big() {
        let endpoint = endpoint(MockCoapSocket::new());
        let message = Message::non_confirmable(Code::POST, 1, Token::empty(), OptionsList::empty(), Some(Bytes::from(vec![0u8; 2000])));
        paused_runtime().block_on(async move {
            assert!(matches!(endpoint.send(peer(), &message, None).await, Err(SendError::Codec(_))));
        });
    }

    #[rstest]
    #[case::too_short(vec![0x40, 0x01])]
    #[case::bad_token_len(vec![0x4f, 0x01, 0x00, 0x01])]
    #[case::version_2(vec![0x80, 0x01, 0x00, 0x01])]
    #[case::version_0(vec![0x00, 0x01, 0x00, 0x01])]
    #[case::empty_payload(vec![0x40, 0x01, 0x00, 0x01, 0xff])]
    fn test_receive_drops_malformed(#[case] datagram: Vec<u8>) {
        let mut socket = MockCoapSocket::new();
        receiving_socket(&mut socket, vec![datagram]);
        let endpoint = endpoint(socket);
        paused_runtime().block_on(async move {
            assert_eq!(endpoint.receive().await, Ok(None));
        });
    }

    #[test]
    fn test_receive_datagram_of_read_buffer_size() {
        let message = Message::non_confirmable(Code::POST, 9, Token::empty(), OptionsList::empty(), Some(Bytes::from(vec![7u8; 1152 - 5])));
        let datagram = serialized(&message);
        assert_eq!(datagram.len(), 1152);

        let mut socket = MockCoapSocket::new();
        receiving_socket(&mut socket, vec![datagram]);
        let endpoint = endpoint(socket);
        assert_eq!(endpoint.config().read_buffer_size, 1152);
        paused_runtime().block_on(async move {
            let received = endpoint.receive().await.unwrap().unwrap();
            assert_eq!(received.message_id(), 9);
            assert_eq!(received.payload().map(|p| p.len()), Some(1152 - 5));
        });
    }

    #[test]
    fn test_receive_drops_oversized_datagram() {
        let mut datagram = vec![0x50, 0x02, 0x00, 0x09, 0xff];
        datagram.extend_from_slice(&[7u8; 1152 - 4]);
        assert_eq!(datagram.len(), 1152 + 1);

        let mut socket = MockCoapSocket::new();
        receiving_socket(&mut socket, vec![datagram]);
        let endpoint = endpoint(socket);
        paused_runtime().block_on(async move {
            assert_eq!(endpoint.receive().await, Ok(None));
        });
    }

    #[test]
    fn test_with_socket_validates_config() {
        let mut config = EndpointConfig::new(peer());
        config.transmission.ack_random_factor = f64::INFINITY;
        assert!(Endpoint::with_socket(Arc::new(MockCoapSocket::new()), config, mock_random(1)).is_err());
    }

    #[test]
    fn test_receive_transport_error() {
        let mut socket = MockCoapSocket::new();
        socket.expect_recv_from()
            .returning(|_| Err(TransportError::Closed));
        let endpoint = endpoint(socket);
        paused_runtime().block_on(async move {
            assert_eq!(endpoint.receive().await, Err(TransportError::Closed));
        });
    }

    #[rstest]
    #[case::confirmable(Reliability::Confirmable, true)]
    #[case::non_confirmable(Reliability::NonConfirmable, false)]
    fn test_get(#[case] reliability: Reliability, #[case] queued: bool) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let endpoint = endpoint(recording_socket(sent.clone()));

        paused_runtime().block_on(async move {
            let extra = OptionsList::new(vec![CoapOption::from_u32(ACCEPT, 50)]);
            let message_id = endpoint.get(peer(), reliability, "coap://127.0.0.1/a/b?q=1", &extra, None).await.unwrap();
            assert_eq!(message_id, 0x1234);
            assert_eq!(endpoint.in_flight().await, if queued { 1 } else { 0 });

            let sent = sent.lock().unwrap();
            let message = Message::deser(&sent[0].0).unwrap();
            assert_eq!(message.message_type(), MessageType::from(reliability));
            assert_eq!(message.code(), Code::GET);
            assert_eq!(message.message_id(), 0x1234);
            assert_eq!(message.token().as_ref(), &[0x12, 0x34, 0x00, 0x00, 0x12, 0x34]);
            assert_eq!(message.payload(), None);

            let numbers: Vec<u16> = message.options().iter().map(|o| o.number()).collect();
            assert_eq!(numbers, vec![URI_PATH, URI_PATH, URI_QUERY, ACCEPT]);
        });
    }

    #[test]
    fn test_post_put_delete() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let endpoint = endpoint(recording_socket(sent.clone()));

        paused_runtime().block_on(async move {
            let (callback, _rx) = callback();
            let post_id = endpoint.post(peer(), Reliability::Confirmable, "coap://127.0.0.1/r", &OptionsList::empty(), Some(Bytes::from_static(b"data")), Some(callback)).await.unwrap();
            let put_id = endpoint.put(peer(), Reliability::NonConfirmable, "coap://127.0.0.1/r", &OptionsList::empty(), Some(Bytes::from_static(b"data")), None).await.unwrap();
            let delete_id = endpoint.delete(peer(), Reliability::NonConfirmable, "coap://127.0.0.1/r", &OptionsList::empty(), None).await.unwrap();
            assert_eq!((post_id, put_id, delete_id), (0x1234, 0x1235, 0x1236));

            let sent = sent.lock().unwrap();
            let codes: Vec<Code> = sent.iter().map(|(buf, _)| Message::deser(buf).unwrap().code()).collect();
            assert_eq!(codes, vec![Code::POST, Code::PUT, Code::DELETE]);
            assert_eq!(Message::deser(&sent[0].0).unwrap().payload().map(|p| p.as_ref()), Some(&b"data"[..]));
        });
    }

    #[test]
    fn test_request_with_invalid_uri() {
        let endpoint = endpoint(MockCoapSocket::new());
        paused_runtime().block_on(async move {
            let result = endpoint.get(peer(), Reliability::Confirmable, "http://127.0.0.1/x", &OptionsList::empty(), None).await;
            assert_eq!(result, Err(SendError::Uri(crate::error::UriError::InvalidScheme)));
        });
    }

    #[test]
    fn test_poll_checks_queues() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let mut socket = recording_socket(sent.clone());
        socket.expect_recv_from()
            .returning(|_| Err(TransportError::Timeout));
        let endpoint = endpoint(socket);

        paused_runtime().block_on(async move {
            endpoint.send(peer(), &confirmable(100), None).await.unwrap();
            tokio::time::advance(Duration::from_secs(2)).await;
            assert_eq!(endpoint.poll().await, Ok(None));
            assert_eq!(sent.lock().unwrap().len(), 2);
        });
    }

    #[test]
    fn test_receive_loop_dispatches() {
        let mut socket = MockCoapSocket::new();
        let request = Message::confirmable(Code::GET, 7, Token::empty(), OptionsList::empty(), None);
        receiving_socket(&mut socket, vec![serialized(&request)]);
        socket.expect_recv_from()
            .returning(|_| Err(TransportError::Closed));
        let endpoint = Arc::new(endpoint(socket));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handler = MockMessageHandler::new();
        handler.expect_on_message()
            .once()
            .returning(move |_, message| {
                let _ = tx.send(message);
            });

        paused_runtime().block_on(async move {
            let receive_loop = endpoint.spawn_receive_loop(Arc::new(handler));
            assert!(receive_loop.is_running());

            let received = rx.recv().await.unwrap();
            assert_eq!(received.message_id(), 7);
            assert_eq!(received.from(), Some(peer()));

            receive_loop.stop().await.unwrap();
        });
    }
}
