//! Room session handle tying the connection, bus and stores together.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_channel::oneshot;
use pokerroom_shared::{ClientCommand, ServerEvent, SyncError};

use super::connection::{Connection, ConnectionAction, ConnectionState, TransportLoop, TransportOp};
use crate::bus::{EventBus, Subscription};
use crate::config::{ClientConfig, RoomEndpoint};
use crate::stores::{RoomSnapshot, RoomStore, TimerStore};

/// State shared between [`RoomClient`] handles and the transport loop.
pub(crate) struct Shared {
    base_url: String,
    connection: RefCell<Connection>,
    bus: EventBus<ServerEvent>,
    store: RoomStore,
    timer: TimerStore,
    pending_connect: RefCell<Option<oneshot::Sender<Result<(), SyncError>>>>,
    transport: UnboundedSender<TransportOp>,
}

impl Shared {
    /// Run one state machine step and carry out what it asks for.
    pub(crate) fn step(&self, f: impl FnOnce(&mut Connection) -> Vec<ConnectionAction>) {
        let actions = {
            let mut connection = self.connection.borrow_mut();
            f(&mut *connection)
        };
        self.dispatch(actions);
    }

    pub(crate) fn tick(&self, now: DateTime<Utc>) {
        self.timer.tick(now);
    }

    pub(crate) fn timer_running(&self) -> bool {
        self.timer.is_running()
    }

    fn dispatch(&self, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::Transport(op) => {
                    if self.transport.unbounded_send(op).is_err() {
                        tracing::warn!("Transport loop is not running");
                    }
                }
                ConnectionAction::Deliver(event) => {
                    tracing::debug!(kind = event.kind(), "Delivering event");
                    self.bus.publish(event.kind(), &event);
                }
                ConnectionAction::ResolveConnect(result) => {
                    let pending = self.pending_connect.borrow_mut().take();
                    if let Some(tx) = pending {
                        let _ = tx.send(result);
                    }
                }
            }
        }
    }
}

/// Handle to one room session.
///
/// Cheap to clone; all clones share the same connection and snapshot. The
/// [`TransportLoop`] returned by [`RoomClient::new`] must be spawned on a
/// `LocalSet` for anything to reach the network, and it finishes once every
/// handle has been dropped.
#[derive(Clone)]
pub struct RoomClient {
    shared: Rc<Shared>,
}

impl RoomClient {
    pub fn new(config: ClientConfig) -> (Self, TransportLoop) {
        let (transport, ops) = unbounded();

        let bus = EventBus::new();
        let store = RoomStore::new();
        store.attach(&bus);
        let timer = TimerStore::new();
        timer.attach(&store);

        let shared = Rc::new(Shared {
            base_url: config.base_url,
            connection: RefCell::new(Connection::new(config.reconnect)),
            bus,
            store,
            timer,
            pending_connect: RefCell::new(None),
            transport,
        });
        let transport_loop = TransportLoop::new(Rc::downgrade(&shared), ops, config.tick_interval);

        (Self { shared }, transport_loop)
    }

    /// Join `room` on the configured server, optionally with a bearer
    /// credential.
    ///
    /// Resolves once the session is open. Fails if the first attempt
    /// fails; later reconnections report through the bus instead.
    pub async fn connect(&self, room: &str, credential: Option<&str>) -> Result<(), SyncError> {
        let endpoint = RoomEndpoint::new(&self.shared.base_url, room, credential)?;
        self.connect_to(endpoint).await
    }

    pub async fn connect_to(&self, endpoint: RoomEndpoint) -> Result<(), SyncError> {
        let actions = self.shared.connection.borrow_mut().connect(endpoint)?;
        self.shared.store.reset();
        self.shared.timer.clear();

        let (tx, rx) = oneshot::channel();
        *self.shared.pending_connect.borrow_mut() = Some(tx);
        self.shared.dispatch(actions);

        rx.await.unwrap_or(Err(SyncError::TransportClosedNormal))
    }

    /// Leave the room. Idempotent; cancels any pending reconnection and
    /// discards the snapshot.
    pub fn disconnect(&self) {
        self.shared.step(Connection::disconnect);
        self.shared.store.reset();
        self.shared.timer.clear();
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.connection.borrow().state().clone()
    }

    pub fn snapshot(&self) -> Rc<RoomSnapshot> {
        self.shared.store.snapshot()
    }

    /// Listen for events tagged `kind` (or [`ANY`](crate::bus::ANY)).
    pub fn subscribe(
        &self,
        kind: &str,
        handler: impl Fn(&ServerEvent) + 'static,
    ) -> Subscription {
        self.shared.bus.subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.shared.bus.unsubscribe(subscription)
    }

    /// Called with every new snapshot.
    pub fn watch(&self, handler: impl Fn(&Rc<RoomSnapshot>) + 'static) -> Subscription {
        self.shared.store.watch(handler)
    }

    pub fn unwatch(&self, subscription: &Subscription) -> bool {
        self.shared.store.unwatch(subscription)
    }

    pub fn events(&self) -> &EventBus<ServerEvent> {
        &self.shared.bus
    }

    pub fn store(&self) -> &RoomStore {
        &self.shared.store
    }

    pub fn timer(&self) -> &TimerStore {
        &self.shared.timer
    }

    /// Encode and queue a command. Refused with
    /// [`SyncError::NotConnected`] unless the session is open.
    pub fn send(&self, command: &ClientCommand) -> Result<(), SyncError> {
        let frame = command.encode()?;
        let actions = self.shared.connection.borrow_mut().send(frame)?;
        tracing::debug!(?command, "Sending command");
        self.shared.dispatch(actions);
        Ok(())
    }
}

#[cfg(test)]
impl RoomClient {
    /// Walk the state machine to `Open` as if a socket had connected.
    pub(crate) fn open_without_socket(&self) {
        let endpoint = RoomEndpoint::new("ws://localhost:8000", "QX7P", None).unwrap();
        let actions = self.shared.connection.borrow_mut().connect(endpoint).unwrap();
        self.shared.dispatch(actions);
        self.shared.step(Connection::on_open);
    }

    /// Feed an inbound text frame as the transport would.
    pub(crate) fn receive(&self, frame: &str) {
        self.shared.step(|c| c.on_frame(frame));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pokerroom_shared::RoomStatus;
    use std::cell::Cell;

    fn client() -> (RoomClient, TransportLoop) {
        RoomClient::new(ClientConfig::default())
    }

    fn open(client: &RoomClient) {
        client.open_without_socket();
        assert!(client.state().is_open());
    }

    #[test]
    fn commands_are_refused_until_open() {
        let (client, _loop) = client();
        assert_eq!(client.send(&ClientCommand::RevealCards), Err(SyncError::NotConnected));
        open(&client);
        assert_eq!(client.send(&ClientCommand::RevealCards), Ok(()));
    }

    #[test]
    fn frames_reach_store_before_subscribers() {
        let (client, _loop) = client();
        open(&client);

        let seen_status = Rc::new(Cell::new(None));
        let probe = client.clone();
        let s = Rc::clone(&seen_status);
        client.subscribe(ServerEvent::ROOM_STATE, move |_| s.set(probe.snapshot().status()));

        client.receive(r#"{"type":"room_state","room":{"code":"QX7P","status":"ACTIVE"}}"#);
        assert_eq!(seen_status.get(), Some(RoomStatus::Active));
    }

    #[test]
    fn handlers_may_send_commands() {
        let (client, mut transport_loop) = client();
        open(&client);

        let responder = client.clone();
        client.subscribe(ServerEvent::VOTES_RESET, move |_| {
            responder
                .send(&ClientCommand::StartTimer { duration: None })
                .unwrap();
        });
        client.receive(r#"{"type":"votes_reset"}"#);

        let mut sent = Vec::new();
        while let Ok(Some(op)) = transport_loop.ops_mut().try_next() {
            sent.push(op);
        }
        assert!(sent.contains(&TransportOp::Send(r#"{"type":"start_timer"}"#.to_string())));
    }

    #[test]
    fn disconnect_discards_the_snapshot() {
        let (client, _loop) = client();
        open(&client);
        client.receive(r#"{"type":"room_state","room":{"code":"QX7P","status":"ACTIVE"}}"#);
        assert!(client.snapshot().room.is_some());

        client.disconnect();
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Closing);
        assert!(client.snapshot().room.is_none());
    }

    #[test]
    fn frames_read_after_disconnect_are_dropped() {
        let (client, _loop) = client();
        open(&client);
        client.disconnect();

        let start = Utc::now();
        let end = start + chrono::Duration::seconds(60);
        client.receive(&format!(
            r#"{{"type":"room_state","room":{{"code":"QX7P","status":"ACTIVE"}},"timer_state":{{"is_active":true,"start_time":"{}","end_time":"{}","duration":60}}}}"#,
            start.to_rfc3339(),
            end.to_rfc3339(),
        ));
        assert!(client.snapshot().room.is_none());
        assert!(!client.timer().is_running());
    }
}
