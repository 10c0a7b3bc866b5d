//! Application-facing IDSCP2 connection.
//!
//! An [`Idscp2Connection`] binds one FSM to one secure channel. Two tasks
//! feed the FSM: the channel reader, which decodes peer messages, and the
//! event pump, which drains the queue shared with timers and RAT drivers.
//! Application calls (`send`, `close`) dispatch directly under the same lock.
//! Listener callbacks run after the lock is released, so a listener may call
//! back into the connection.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use idscp_proto::IdscpMessage;
use idscp_transport::SecureChannel;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::config::Idscp2Configuration;
use crate::drivers::{DapsDriver, RatRegistry};
use crate::errors::{CloseReason, FsmError, Idscp2Error};
use crate::fsm::{Event, Fsm, FsmState, InternalControlMessage, Notification};

// ============================================================================
// Listeners
// ============================================================================

/// Receives application data from the peer.
pub trait Idscp2MessageListener: Send + Sync {
    fn on_message(&self, connection: &Idscp2Connection, data: &Bytes);
}

impl<F> Idscp2MessageListener for F
where
    F: Fn(&Idscp2Connection, &Bytes) + Send + Sync,
{
    fn on_message(&self, connection: &Idscp2Connection, data: &Bytes) {
        self(connection, data)
    }
}

/// Receives connection-level notifications.
pub trait Idscp2ConnectionListener: Send + Sync {
    /// A protocol violation; the connection stays in its state.
    fn on_error(&self, error: &FsmError);

    /// The connection closed. Called exactly once per listener.
    fn on_close(&self, reason: &CloseReason);
}

#[derive(Default)]
struct MessageSinks {
    listeners: Vec<Arc<dyn Idscp2MessageListener>>,
    pending: Vec<Bytes>,
}

#[derive(Default)]
struct ConnectionSinks {
    listeners: Vec<Arc<dyn Idscp2ConnectionListener>>,
    closed: Option<CloseReason>,
}

/// Notifications waiting to be handed to listeners. Filled under the FSM
/// lock, drained by one caller at a time so listeners see them in order.
#[derive(Default)]
struct Delivery {
    queue: VecDeque<Notification>,
    running: bool,
}

#[derive(Debug, Clone)]
struct Status {
    state: FsmState,
    close_reason: Option<CloseReason>,
}

// ============================================================================
// Connection
// ============================================================================

struct Inner {
    fsm: Mutex<Fsm>,
    channel: Arc<dyn SecureChannel>,
    messages: Mutex<MessageSinks>,
    listeners: Mutex<ConnectionSinks>,
    delivery: Mutex<Delivery>,
    status: watch::Sender<Status>,
}

/// Handle to one IDSCP2 connection. Cheap to clone.
#[derive(Clone)]
pub struct Idscp2Connection {
    inner: Arc<Inner>,
}

impl Idscp2Connection {
    /// Start a connection over an established secure channel and send our
    /// hello. Must be called within a tokio runtime.
    pub fn spawn(
        channel: Arc<dyn SecureChannel>,
        daps: Arc<dyn DapsDriver>,
        registry: RatRegistry,
        config: Idscp2Configuration,
    ) -> Result<Self, Idscp2Error> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let fsm = Fsm::new(
            channel.clone(),
            daps,
            registry,
            config,
            events_tx.clone(),
            Handle::current(),
        );
        let (status, _) = watch::channel(Status {
            state: fsm.state(),
            close_reason: None,
        });

        let connection = Self {
            inner: Arc::new(Inner {
                fsm: Mutex::new(fsm),
                channel: channel.clone(),
                messages: Mutex::new(MessageSinks::default()),
                listeners: Mutex::new(ConnectionSinks::default()),
                delivery: Mutex::new(Delivery::default()),
                status,
            }),
        };

        tokio::spawn(pump(Arc::downgrade(&connection.inner), events_rx));
        tokio::spawn(read_loop(channel, events_tx));

        connection.dispatch(Event::Control(InternalControlMessage::StartHandshake));
        Ok(connection)
    }

    /// Send application data. Rejected unless established.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<(), Idscp2Error> {
        self.inner.fsm.lock().send_data(data.into())
    }

    /// Close the connection, notifying the peer. Idempotent.
    pub fn close(&self) {
        self.dispatch(Event::Control(InternalControlMessage::Stop));
    }

    pub fn state(&self) -> FsmState {
        self.inner.status.borrow().state
    }

    pub fn is_established(&self) -> bool {
        self.state() == FsmState::Established
    }

    pub fn is_closed(&self) -> bool {
        self.inner.status.borrow().close_reason.is_some()
    }

    /// Register a listener for application data. Data that arrived before
    /// the first listener was registered is handed to it right away.
    pub fn add_message_listener(&self, listener: impl Idscp2MessageListener + 'static) {
        let listener: Arc<dyn Idscp2MessageListener> = Arc::new(listener);
        let pending = {
            let mut sinks = self.inner.messages.lock();
            sinks.listeners.push(listener.clone());
            std::mem::take(&mut sinks.pending)
        };
        for data in &pending {
            listener.on_message(self, data);
        }
    }

    /// Register a connection listener. If the connection is already closed,
    /// `on_close` is called immediately.
    pub fn add_connection_listener(&self, listener: impl Idscp2ConnectionListener + 'static) {
        let listener: Arc<dyn Idscp2ConnectionListener> = Arc::new(listener);
        let closed = {
            let mut sinks = self.inner.listeners.lock();
            if sinks.closed.is_none() {
                sinks.listeners.push(listener.clone());
            }
            sinks.closed.clone()
        };
        if let Some(reason) = closed {
            listener.on_close(&reason);
        }
    }

    /// Wait until the handshake completes. Fails if the connection closes first.
    pub async fn established(&self) -> Result<(), Idscp2Error> {
        let mut status = self.inner.status.subscribe();
        let status = status
            .wait_for(|s| s.state == FsmState::Established || s.close_reason.is_some())
            .await
            .map_err(|_| Idscp2Error::Closed)?;
        if status.close_reason.is_some() {
            return Err(Idscp2Error::Closed);
        }
        Ok(())
    }

    /// Wait until the connection is closed and return why.
    pub async fn closed(&self) -> CloseReason {
        let mut status = self.inner.status.subscribe();
        if let Ok(status) = status.wait_for(|s| s.close_reason.is_some()).await {
            if let Some(reason) = &status.close_reason {
                return reason.clone();
            }
        }
        // The sender lives in `self`, so the wait above cannot fail.
        CloseReason::local(idscp_proto::CloseCause::Error, "connection dropped")
    }

    fn dispatch(&self, event: Event) {
        let result = {
            let mut fsm = self.inner.fsm.lock();
            let result = fsm.dispatch(event);

            // Published under the lock so status updates keep dispatch order.
            let state = fsm.state();
            let close_reason = fsm.close_reason().cloned();
            self.inner.status.send_if_modified(|status| {
                let changed = status.state != state || status.close_reason != close_reason;
                status.state = state;
                status.close_reason = close_reason;
                changed
            });

            self.inner
                .delivery
                .lock()
                .queue
                .extend(fsm.drain_notifications());
            result
        };

        if let Err(e) = result {
            warn!("{}", e);
            let listeners = self.inner.listeners.lock().listeners.clone();
            for listener in listeners {
                listener.on_error(&e);
            }
        }

        self.flush();
    }

    /// Hand queued notifications to listeners. If another caller (or an outer
    /// frame of this thread, when a listener re-enters) is already draining,
    /// it picks up what was queued here.
    fn flush(&self) {
        {
            let mut delivery = self.inner.delivery.lock();
            if delivery.running {
                return;
            }
            delivery.running = true;
        }

        loop {
            let next = {
                let mut delivery = self.inner.delivery.lock();
                match delivery.queue.pop_front() {
                    Some(notification) => notification,
                    None => {
                        delivery.running = false;
                        return;
                    }
                }
            };
            match next {
                Notification::Message(data) => self.deliver(data),
                Notification::Closed(reason) => self.notify_closed(reason),
            }
        }
    }

    fn deliver(&self, data: Bytes) {
        let listeners = {
            let mut sinks = self.inner.messages.lock();
            if sinks.listeners.is_empty() {
                sinks.pending.push(data);
                return;
            }
            sinks.listeners.clone()
        };
        for listener in listeners {
            listener.on_message(self, &data);
        }
    }

    fn notify_closed(&self, reason: CloseReason) {
        let listeners = {
            let mut sinks = self.inner.listeners.lock();
            sinks.closed = Some(reason.clone());
            std::mem::take(&mut sinks.listeners)
        };
        for listener in listeners {
            listener.on_close(&reason);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let fsm = self.fsm.get_mut();
        if !fsm.is_locked() {
            debug!("connection dropped, closing");
            let _ = fsm.dispatch(Event::Control(InternalControlMessage::Stop));
        }
        self.channel.close();
    }
}

impl std::fmt::Debug for Idscp2Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Idscp2Connection")
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// Single consumer of the event queue. Holds no strong reference between
/// events, so dropping every handle ends the connection.
async fn pump(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let connection = Idscp2Connection { inner };
        connection.dispatch(event);
        if connection.is_closed() {
            break;
        }
    }
    debug!("event pump stopped");
}

async fn read_loop(channel: Arc<dyn SecureChannel>, events: mpsc::UnboundedSender<Event>) {
    loop {
        let frame = match channel.recv().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("secure channel closed");
                break;
            }
            Err(e) => {
                warn!("secure channel error: {}", e);
                break;
            }
        };

        match IdscpMessage::from_bytes(&frame) {
            Ok(msg) => {
                if events.send(Event::Message(msg)).is_err() {
                    return;
                }
            }
            Err(e) => warn!("cannot parse raw data into IdscpMessage: {}", e),
        }
    }
    let _ = events.send(Event::Control(InternalControlMessage::Error));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::NullDaps;
    use idscp_proto::{CloseCause, MessageKind};
    use idscp_transport::testing::MockChannel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingListener {
        errors: AtomicUsize,
        closes: Mutex<Vec<CloseReason>>,
    }

    impl Idscp2ConnectionListener for Arc<CountingListener> {
        fn on_error(&self, _error: &FsmError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_close(&self, reason: &CloseReason) {
            self.closes.lock().push(reason.clone());
        }
    }

    fn spawn_on_mock() -> (Idscp2Connection, Arc<MockChannel>) {
        let channel = Arc::new(MockChannel::new());
        let connection = Idscp2Connection::spawn(
            channel.clone(),
            Arc::new(NullDaps::new()),
            RatRegistry::with_dummy_drivers(),
            Idscp2Configuration::default(),
        )
        .unwrap();
        (connection, channel)
    }

    fn sent_kinds(channel: &MockChannel) -> Vec<MessageKind> {
        channel
            .get_sent()
            .iter()
            .filter_map(|frame| IdscpMessage::from_bytes(frame).ok()?.kind())
            .collect()
    }

    #[tokio::test]
    async fn test_spawn_sends_hello() {
        let (connection, channel) = spawn_on_mock();
        assert_eq!(connection.state(), FsmState::WaitForHello);
        assert_eq!(sent_kinds(&channel), vec![MessageKind::Hello]);
        assert!(matches!(
            connection.send(&b"too early"[..]),
            Err(Idscp2Error::NotEstablished)
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = Idscp2Configuration {
            handshake_timeout_ms: 0,
            ..Default::default()
        };
        let result = Idscp2Connection::spawn(
            Arc::new(MockChannel::new()),
            Arc::new(NullDaps::new()),
            RatRegistry::with_dummy_drivers(),
            config,
        );
        assert!(matches!(result, Err(Idscp2Error::Config(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_notifies_once() {
        let (connection, channel) = spawn_on_mock();
        let listener = Arc::new(CountingListener::default());
        connection.add_connection_listener(listener.clone());

        connection.close();
        connection.close();

        let reason = connection.closed().await;
        assert_eq!(reason.cause, CloseCause::UserShutdown);
        assert_eq!(listener.closes.lock().len(), 1);
        assert!(channel.is_closed());
        assert_eq!(
            sent_kinds(&channel),
            vec![MessageKind::Hello, MessageKind::Close]
        );
        assert!(matches!(connection.send(&b"late"[..]), Err(Idscp2Error::Closed)));
        assert!(connection.established().await.is_err());
    }

    #[tokio::test]
    async fn test_late_listener_sees_close() {
        let (connection, _channel) = spawn_on_mock();
        connection.close();

        let listener = Arc::new(CountingListener::default());
        connection.add_connection_listener(listener.clone());
        assert_eq!(listener.closes.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_peer_close_reason_reported() {
        let (connection, channel) = spawn_on_mock();
        channel.inject_recv(IdscpMessage::close("go away", CloseCause::NoValidDat).to_bytes());

        let reason = connection.closed().await;
        assert_eq!(reason, CloseReason::peer(CloseCause::NoValidDat, "go away"));
        assert_eq!(connection.state(), FsmState::Closed);
    }

    #[tokio::test]
    async fn test_channel_end_closes_connection() {
        let (connection, channel) = spawn_on_mock();
        channel.inject_recv(bytes::Bytes::from_static(b"\xff\xff garbage"));
        channel.close();

        let reason = connection.closed().await;
        assert_eq!(reason.cause, CloseCause::Error);
    }

    /// Answer the dummy drivers' exchange as a peer would.
    async fn establish_on_mock() -> (Idscp2Connection, Arc<MockChannel>) {
        let (connection, channel) = spawn_on_mock();
        channel.inject_recv(crate::harness::FsmRig::peer_hello().to_bytes());
        channel.inject_recv(IdscpMessage::rat_prover(Bytes::from_static(b"evidence")).to_bytes());
        channel.inject_recv(IdscpMessage::rat_verifier(Bytes::from_static(b"answer")).to_bytes());
        connection.established().await.unwrap();
        (connection, channel)
    }

    struct LogListener(Arc<Mutex<Vec<String>>>);

    impl Idscp2ConnectionListener for LogListener {
        fn on_error(&self, _error: &FsmError) {}

        fn on_close(&self, reason: &CloseReason) {
            self.0.lock().push(format!("closed: {}", reason.cause));
        }
    }

    #[tokio::test]
    async fn test_close_from_listener_ends_delivery() {
        let (connection, channel) = establish_on_mock().await;
        let log = Arc::new(Mutex::new(Vec::new()));

        connection.add_connection_listener(LogListener(log.clone()));
        let messages = log.clone();
        connection.add_message_listener(move |c: &Idscp2Connection, data: &Bytes| {
            messages
                .lock()
                .push(String::from_utf8_lossy(data).into_owned());
            c.close();
        });

        channel.inject_recv(IdscpMessage::data(Bytes::from_static(b"first")).to_bytes());
        channel.inject_recv(IdscpMessage::data(Bytes::from_static(b"second")).to_bytes());

        let reason = connection.closed().await;
        assert_eq!(reason.cause, CloseCause::UserShutdown);
        assert!(connection.is_closed());
        assert!(!connection.is_established());
        assert_eq!(connection.state(), FsmState::Closed);

        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            *log.lock(),
            vec!["first".to_string(), "closed: USER_SHUTDOWN".to_string()]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_status_settles_on_closed_under_concurrent_close() {
        for _ in 0..50 {
            let (connection, channel) = establish_on_mock().await;
            for i in 0..8u8 {
                channel.inject_recv(IdscpMessage::data(Bytes::from(vec![i])).to_bytes());
            }
            connection.close();

            let reason = connection.closed().await;
            assert_eq!(reason.cause, CloseCause::UserShutdown);
            assert_eq!(connection.state(), FsmState::Closed);
            assert!(!connection.is_established());
        }
    }

    #[tokio::test]
    async fn test_unexpected_message_ignored() {
        let (connection, channel) = spawn_on_mock();
        let listener = Arc::new(CountingListener::default());
        connection.add_connection_listener(listener.clone());

        // No RAT driver runs before the peer's hello arrived.
        channel.inject_recv(IdscpMessage::rat_prover(Bytes::from_static(b"x")).to_bytes());
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(listener.errors.load(Ordering::SeqCst), 0);
        assert_eq!(connection.state(), FsmState::WaitForHello);

        connection.close();
        assert_eq!(listener.closes.lock().len(), 1);
    }
}
