//! Sync client for one diagram room.
//!
//! [`SyncClient::run`] is a single event loop. It is the only code that
//! touches the session, the lock table, the local lock and the pending
//! broadcast, and it finishes handling one event (including any awaited
//! document load) before it looks at the next one.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Duration;
use tracing::{debug, info, warn};

use super::connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, Outbox, RECONNECT_DELAY,
};
use super::debounce::{BroadcastDebouncer, BROADCAST_DEBOUNCE};
use super::error::SyncError;
use super::locks::LockCoordinator;
use super::protocol::OutboundMessage;
use super::router::{route_frame, Dispatch};
use super::session::{Session, SessionInfo, SyncState};
use crate::bridge::{DocumentBridge, LocalEvent};
use crate::room::{endpoint_for, RoomId};

/// Capacity of the handle-to-client command channel.
const COMMAND_BUFFER: usize = 16;

/// Timing knobs for a [`SyncClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Quiet period before a burst of local edits is broadcast
    pub debounce: Duration,
    /// Fixed wait before reconnecting after a close
    pub reconnect_delay: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            debounce: BROADCAST_DEBOUNCE,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

#[derive(Debug)]
enum ClientCommand {
    Export(oneshot::Sender<Result<String, SyncError>>),
    Shutdown,
}

/// Cheap, cloneable access to a running [`SyncClient`].
#[derive(Debug, Clone)]
pub struct SyncClientHandle {
    commands: mpsc::Sender<ClientCommand>,
    info: watch::Receiver<SessionInfo>,
}

impl SyncClientHandle {
    /// Latest published session snapshot.
    pub fn session_info(&self) -> SessionInfo {
        self.info.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionInfo> {
        self.info.clone()
    }

    /// Serializes the document as the client currently sees it.
    pub async fn export(&self) -> Result<String, SyncError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(ClientCommand::Export(reply))
            .await
            .map_err(|_| SyncError::ClientStopped)?;
        response.await.map_err(|_| SyncError::ClientStopped)?
    }

    /// Asks the client to tear down its connection and stop.
    pub async fn shutdown(&self) {
        if self.commands.send(ClientCommand::Shutdown).await.is_err() {
            debug!("shutdown requested but client already stopped");
        }
    }
}

/// Keeps one local diagram in sync with a room.
pub struct SyncClient<B> {
    room: RoomId,
    bridge: B,
    state: SyncState,
    coordinator: LockCoordinator,
    debouncer: BroadcastDebouncer,
    outbox: Outbox,
    connection: Option<ConnectionManager>,
    connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    local_events: mpsc::Receiver<LocalEvent>,
    commands: mpsc::Receiver<ClientCommand>,
    connection_state: ConnectionState,
    /// Set once the first `init` document loaded; local activity is
    /// ignored before that.
    listening: bool,
    info: watch::Sender<SessionInfo>,
}

impl<B: DocumentBridge> SyncClient<B> {
    /// Starts connecting to `room` on `server_url` and returns the client,
    /// ready to [`run`](Self::run), with a handle to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(
        server_url: &str,
        room: RoomId,
        bridge: B,
        local_events: mpsc::Receiver<LocalEvent>,
        options: ClientOptions,
    ) -> (Self, SyncClientHandle) {
        let endpoint = endpoint_for(server_url, &room);
        info!(room = %room, endpoint = %endpoint, "joining room");

        let (connection, events) = ConnectionManager::connect(endpoint, options.reconnect_delay);
        let outbox = connection.outbox();
        let (mut client, handle) =
            Self::with_transport(room, bridge, outbox, events, local_events, options);
        client.connection = Some(connection);
        client.connection_state = ConnectionState::Connecting;
        client.publish();
        (client, handle)
    }

    /// Builds a client over an externally driven transport: frames go to
    /// `outbox` and connection events arrive on `connection_events`.
    pub fn with_transport(
        room: RoomId,
        bridge: B,
        outbox: Outbox,
        connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
        local_events: mpsc::Receiver<LocalEvent>,
        options: ClientOptions,
    ) -> (Self, SyncClientHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (info_tx, info_rx) = watch::channel(SessionInfo::new(room.as_str()));

        let client = Self {
            room,
            bridge,
            state: SyncState::new(),
            coordinator: LockCoordinator::new(),
            debouncer: BroadcastDebouncer::new(options.debounce),
            outbox,
            connection: None,
            connection_events,
            local_events,
            commands: commands_rx,
            connection_state: ConnectionState::Closed,
            listening: false,
            info: info_tx,
        };
        let handle = SyncClientHandle {
            commands: commands_tx,
            info: info_rx,
        };
        (client, handle)
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Runs until shutdown is requested, the local event source closes,
    /// or the connection is gone for good.
    pub async fn run(mut self) {
        info!(room = %self.room, "sync client started");

        loop {
            tokio::select! {
                event = self.connection_events.recv() => match event {
                    Some(event) => self.on_connection_event(event).await,
                    None => {
                        debug!("connection event stream ended");
                        break;
                    }
                },
                event = self.local_events.recv() => match event {
                    Some(event) => self.on_local_event(event).await,
                    None => {
                        debug!("local event source closed");
                        break;
                    }
                },
                Some(command) = self.commands.recv() => match command {
                    ClientCommand::Export(reply) => {
                        let result = self
                            .bridge
                            .serialize_document()
                            .await
                            .map_err(SyncError::from);
                        let _ = reply.send(result);
                    }
                    ClientCommand::Shutdown => break,
                },
                _ = self.debouncer.ready() => self.broadcast_document().await,
            }
        }

        self.stop().await;
    }

    async fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => {
                self.connection_state = ConnectionState::Open;
                debug!(room = %self.room, "connection open, waiting for init");
            }
            ConnectionEvent::Message(frame) => {
                let dispatch = route_frame(
                    &frame,
                    &mut self.state,
                    &self.coordinator,
                    &mut self.bridge,
                )
                .await;
                let loaded = matches!(
                    dispatch,
                    Dispatch::Initialized {
                        document_loaded: true
                    }
                );
                if loaded && !self.listening {
                    self.listening = true;
                    info!(
                        self_id = self.state.self_id().unwrap_or_default(),
                        "document loaded, listening for local changes"
                    );
                }
            }
            ConnectionEvent::Closed => {
                self.connection_state = ConnectionState::Closed;
                info!(room = %self.room, "disconnected");
            }
        }
        self.publish();
    }

    async fn on_local_event(&mut self, event: LocalEvent) {
        match event {
            LocalEvent::DocumentChanged => {
                if self.listening {
                    self.debouncer.note_change();
                } else {
                    debug!("document change before init, ignoring");
                }
            }
            LocalEvent::SelectionChanged(selected) => {
                if !self.listening {
                    debug!("selection change before init, ignoring");
                    return;
                }
                for message in self.coordinator.on_selection_changed(selected.as_deref()) {
                    self.outbox.send(&message);
                }
                self.publish();
            }
            LocalEvent::ImportRequested(xml) => self.import(&xml).await,
        }
    }

    /// Replaces the document with a locally imported one and broadcasts it
    /// right away. Locks known so far belong to the replaced document.
    async fn import(&mut self, xml: &str) {
        if let Err(e) = self.bridge.load_document(xml).await {
            warn!(error = %e, "import rejected, keeping current document");
            return;
        }
        info!(bytes = xml.len(), "document imported");

        self.coordinator.clear_locks(&mut self.state, &mut self.bridge);
        self.debouncer.cancel();
        self.broadcast_document().await;
        self.publish();
    }

    /// Sends the document as it is now. Dropped if the connection is not
    /// open; the next `init` or `diagram_update` reconciles.
    async fn broadcast_document(&mut self) {
        if !self.outbox.is_open() {
            debug!("broadcast dropped: connection not open");
            return;
        }
        match self.bridge.serialize_document().await {
            Ok(xml) => {
                if self.outbox.send(&OutboundMessage::update(xml)) {
                    debug!("document broadcast");
                }
            }
            Err(e) => warn!(error = %e, "could not serialize document, broadcast dropped"),
        }
    }

    fn publish(&self) {
        let self_id = self.state.self_id();
        self.info.send_replace(SessionInfo {
            room: self.room.to_string(),
            connection: self.connection_state,
            self_id: self_id.map(str::to_string),
            participant_count: self
                .state
                .session()
                .map_or(0, Session::participant_count),
            remote_locks: self.state.locks().count_held_by_others(self_id),
            held_lock: self.coordinator.held().map(str::to_string),
        });
    }

    async fn stop(mut self) {
        self.debouncer.cancel();
        if let Some(connection) = self.connection.take() {
            connection.shutdown().await;
        }
        self.connection_state = ConnectionState::TornDown;
        self.publish();
        info!(room = %self.room, "sync client stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{MarkerKind, MemoryDocument};
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout, Instant};

    const INIT_A: &str =
        r#"{"type":"init","self_id":"userA","users_count":2,"bpmn_xml":"<start/>","locks":{}}"#;

    struct Harness {
        doc: MemoryDocument,
        outbox: Outbox,
        frames: mpsc::UnboundedReceiver<String>,
        server: mpsc::UnboundedSender<ConnectionEvent>,
        local: mpsc::Sender<LocalEvent>,
        handle: SyncClientHandle,
        info: watch::Receiver<SessionInfo>,
        task: JoinHandle<()>,
    }

    impl Harness {
        fn start() -> Self {
            let doc = MemoryDocument::new();
            let outbox = Outbox::new();
            let frames = outbox.attach();
            let (server, events) = mpsc::unbounded_channel();
            let (local, local_events) = mpsc::channel(32);

            let (client, handle) = SyncClient::with_transport(
                RoomId::new("test"),
                doc.clone(),
                outbox.clone(),
                events,
                local_events,
                ClientOptions::default(),
            );
            let info = handle.subscribe();
            let task = tokio::spawn(client.run());

            Self {
                doc,
                outbox,
                frames,
                server,
                local,
                handle,
                info,
                task,
            }
        }

        fn deliver(&self, frame: &str) {
            self.server
                .send(ConnectionEvent::Message(frame.to_string()))
                .unwrap();
        }

        async fn join(&mut self, init: &str, self_id: &str) {
            self.server.send(ConnectionEvent::Opened).unwrap();
            self.deliver(init);
            timeout(
                Duration::from_secs(5),
                self.info.wait_for(|i| i.self_id.as_deref() == Some(self_id)),
            )
            .await
            .unwrap()
            .unwrap();
        }

        async fn local(&self, event: LocalEvent) {
            self.local.send(event).await.unwrap();
        }

        /// Lets the client drain everything already queued. Time is paused
        /// and only advances once every task is idle.
        async fn settle(&self) {
            sleep(Duration::from_millis(1)).await;
        }

        async fn next_frame(&mut self) -> String {
            timeout(Duration::from_secs(5), self.frames.recv())
                .await
                .unwrap()
                .unwrap()
        }

        fn sent(&mut self) -> Vec<String> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.frames.try_recv() {
                frames.push(frame);
            }
            frames
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_events_ignored_until_init() {
        let mut h = Harness::start();

        h.local(LocalEvent::SelectionChanged(Some("Task_1".into())))
            .await;
        h.local(LocalEvent::DocumentChanged).await;
        sleep(Duration::from_secs(1)).await;
        assert!(h.sent().is_empty());

        h.join(INIT_A, "userA").await;
        h.local(LocalEvent::SelectionChanged(Some("Task_1".into())))
            .await;
        assert_eq!(
            h.next_frame().await,
            r#"{"type":"lock_element","element_id":"Task_1"}"#
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_scenario_sends_lock_frames_in_order() {
        let mut h = Harness::start();
        h.join(INIT_A, "userA").await;

        h.local(LocalEvent::SelectionChanged(Some("Task_1".into())))
            .await;
        h.local(LocalEvent::SelectionChanged(Some("Task_1".into())))
            .await;
        h.local(LocalEvent::SelectionChanged(Some("Task_2".into())))
            .await;
        h.local(LocalEvent::SelectionChanged(None)).await;
        h.settle().await;

        assert_eq!(
            h.sent(),
            vec![
                r#"{"type":"lock_element","element_id":"Task_1"}"#,
                r#"{"type":"unlock_element","element_id":"Task_1"}"#,
                r#"{"type":"lock_element","element_id":"Task_2"}"#,
                r#"{"type":"unlock_element","element_id":"Task_2"}"#,
            ]
        );
        assert_eq!(h.handle.session_info().held_lock, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_sends_latest_state_once() {
        let mut h = Harness::start();
        h.join(INIT_A, "userA").await;

        for version in ["<v1/>", "<v2/>", "<v3/>"] {
            h.doc.set_content(version);
            h.local(LocalEvent::DocumentChanged).await;
            sleep(Duration::from_millis(100)).await;
        }
        let last_change = Instant::now() - Duration::from_millis(100);

        let frame = h.next_frame().await;
        assert!(Instant::now() - last_change >= BROADCAST_DEBOUNCE);
        assert_eq!(frame, r#"{"type":"update_diagram","bpmn_xml":"<v3/>"}"#);

        sleep(Duration::from_secs(2)).await;
        assert!(h.sent().is_empty());
        assert_eq!(h.doc.serialize_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_does_not_reload() {
        let mut h = Harness::start();
        h.join(INIT_A, "userA").await;
        assert_eq!(h.doc.load_count(), 1);

        h.deliver(r#"{"type":"diagram_update","user_id":"userA","bpmn_xml":"<echo/>","locks":{}}"#);
        h.settle().await;
        assert_eq!(h.doc.load_count(), 1);
        assert_eq!(h.doc.content().as_deref(), Some("<start/>"));

        h.deliver(
            r#"{"type":"diagram_update","user_id":"userB","bpmn_xml":"<theirs/>","locks":{}}"#,
        );
        h.settle().await;
        assert_eq!(h.doc.load_count(), 2);
        assert_eq!(h.doc.content().as_deref(), Some("<theirs/>"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_lock_marks_element_and_updates_info() {
        let mut h = Harness::start();
        h.join(INIT_A, "userA").await;

        h.deliver(r#"{"type":"lock","element_id":"Gateway_1","user_id":"userB"}"#);
        timeout(
            Duration::from_secs(5),
            h.info.wait_for(|i| i.remote_locks == 1),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(h.doc.has_marker("Gateway_1", MarkerKind::LockedByOther));
        assert!(h.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_dropped_while_disconnected() {
        let mut h = Harness::start();
        h.join(INIT_A, "userA").await;

        h.doc.set_content("<offline-edit/>");
        h.local(LocalEvent::DocumentChanged).await;
        h.outbox.detach();
        h.server.send(ConnectionEvent::Closed).unwrap();
        sleep(Duration::from_secs(1)).await;

        assert_eq!(h.doc.serialize_count(), 0);
        assert!(h.sent().is_empty());
        assert_eq!(h.handle.session_info().connection, ConnectionState::Closed);
        // Session survives the close until the next init replaces it.
        assert_eq!(h.handle.session_info().self_id.as_deref(), Some("userA"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_init_replaces_session() {
        let mut h = Harness::start();
        h.join(INIT_A, "userA").await;
        h.server.send(ConnectionEvent::Closed).unwrap();

        h.join(
            r#"{"type":"init","self_id":"userC","bpmn_xml":"<fresh/>","locks":{"Task_1":"userB"}}"#,
            "userC",
        )
        .await;

        let info = h.handle.session_info();
        assert_eq!(info.connection, ConnectionState::Open);
        assert_eq!(info.participant_count, 1);
        assert_eq!(info.remote_locks, 1);
        assert_eq!(h.doc.content().as_deref(), Some("<fresh/>"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_import_resets_locks_and_broadcasts_immediately() {
        let mut h = Harness::start();
        h.join(
            r#"{"type":"init","self_id":"userA","bpmn_xml":"<start/>","locks":{"Task_9":"userB"}}"#,
            "userA",
        )
        .await;
        assert!(h.doc.has_marker("Task_9", MarkerKind::LockedByOther));

        h.doc.set_content("<pending-edit/>");
        h.local(LocalEvent::DocumentChanged).await;
        let started = Instant::now();
        h.local(LocalEvent::ImportRequested("<imported/>".into()))
            .await;

        let frame = h.next_frame().await;
        assert!(Instant::now() - started < BROADCAST_DEBOUNCE);
        assert_eq!(frame, r#"{"type":"update_diagram","bpmn_xml":"<imported/>"}"#);
        assert!(h.doc.marked_elements(MarkerKind::LockedByOther).is_empty());
        assert_eq!(h.handle.session_info().remote_locks, 0);

        // The pending debounced broadcast was cancelled by the import.
        sleep(Duration::from_secs(2)).await;
        assert!(h.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_import_keeps_document() {
        let mut h = Harness::start();
        h.join(INIT_A, "userA").await;

        h.local(LocalEvent::ImportRequested("not a diagram".into()))
            .await;
        sleep(Duration::from_secs(1)).await;

        assert_eq!(h.doc.content().as_deref(), Some("<start/>"));
        assert!(h.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_returns_current_document() {
        let mut h = Harness::start();
        h.join(INIT_A, "userA").await;
        h.doc.set_content("<edited/>");

        assert_eq!(h.handle.export().await.unwrap(), "<edited/>");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_client() {
        let mut h = Harness::start();
        h.join(INIT_A, "userA").await;

        h.handle.shutdown().await;
        timeout(Duration::from_secs(5), &mut h.task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            h.handle.session_info().connection,
            ConnectionState::TornDown
        );
        assert!(matches!(
            h.handle.export().await,
            Err(SyncError::ClientStopped)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_local_events_stops_client() {
        let h = Harness::start();
        let Harness { local, task, .. } = h;

        drop(local);
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }
}
