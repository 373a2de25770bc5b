//! Room state for the relay.
//!
//! Each room holds the latest document, the connected participants and
//! the lock table. Every frame produced for a room goes out on the room's
//! broadcast channel and reaches all of its participants, the sender
//! included.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use diagram_collab_core::sync::{InboundMessage, LockMap, OutboundMessage};
use tokio::sync::{broadcast, Mutex, RwLock};

/// Frames a participant may fall behind before the relay drops it.
const ROOM_CHANNEL_CAPACITY: usize = 64;

/// Document every new room starts with.
pub const DEFAULT_DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<bpmn:definitions xmlns:bpmn="http://www.omg.org/spec/BPMN/20100524/MODEL"
                  xmlns:bpmndi="http://www.omg.org/spec/BPMN/20100524/DI"
                  xmlns:dc="http://www.omg.org/spec/DD/20100524/DC"
                  xmlns:di="http://www.omg.org/spec/DD/20100524/DI"
                  id="Definitions_1"
                  targetNamespace="http://bpmn.io/schema/bpmn">
  <bpmn:process id="Process_1" isExecutable="false">
    <bpmn:startEvent id="StartEvent_1"/>
    <bpmn:task id="Task_1" name="Do something"/>
    <bpmn:endEvent id="EndEvent_1"/>
    <bpmn:sequenceFlow id="Flow_1" sourceRef="StartEvent_1" targetRef="Task_1"/>
    <bpmn:sequenceFlow id="Flow_2" sourceRef="Task_1" targetRef="EndEvent_1"/>
  </bpmn:process>
  <bpmndi:BPMNDiagram id="BPMNDiagram_1">
    <bpmndi:BPMNPlane id="BPMNPlane_1" bpmnElement="Process_1">
      <bpmndi:BPMNShape id="StartEvent_1_di" bpmnElement="StartEvent_1">
        <dc:Bounds x="173" y="102" width="36" height="36"/>
      </bpmndi:BPMNShape>
      <bpmndi:BPMNShape id="Task_1_di" bpmnElement="Task_1">
        <dc:Bounds x="250" y="80" width="100" height="80"/>
      </bpmndi:BPMNShape>
      <bpmndi:BPMNShape id="EndEvent_1_di" bpmnElement="EndEvent_1">
        <dc:Bounds x="390" y="102" width="36" height="36"/>
      </bpmndi:BPMNShape>
      <bpmndi:BPMNEdge id="Flow_1_di" bpmnElement="Flow_1">
        <di:waypoint x="209" y="120"/>
        <di:waypoint x="250" y="120"/>
      </bpmndi:BPMNEdge>
      <bpmndi:BPMNEdge id="Flow_2_di" bpmnElement="Flow_2">
        <di:waypoint x="350" y="120"/>
        <di:waypoint x="390" y="120"/>
      </bpmndi:BPMNEdge>
    </bpmndi:BPMNPlane>
  </bpmndi:BPMNDiagram>
</bpmn:definitions>
"#;

/// True for names made only of word characters (letters, digits, `_`).
pub fn is_valid_room_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// New, random participant id: 32 lowercase hex characters.
pub fn new_participant_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Debug)]
struct RoomState {
    document: String,
    participants: BTreeSet<String>,
    locks: LockMap,
}

impl RoomState {
    fn new() -> Self {
        Self {
            document: DEFAULT_DOCUMENT.to_string(),
            participants: BTreeSet::new(),
            locks: LockMap::new(),
        }
    }

    fn users_count(&self) -> u32 {
        u32::try_from(self.participants.len()).unwrap_or(u32::MAX)
    }
}

/// A participant's view of the room right after joining.
#[derive(Debug)]
pub struct Membership {
    pub participant_id: String,
    /// `init` frame to send first
    pub init: String,
    /// Everything broadcast to the room from now on
    pub frames: broadcast::Receiver<String>,
}

/// One collaborative room.
#[derive(Debug)]
pub struct Room {
    name: String,
    state: Mutex<RoomState>,
    channel: broadcast::Sender<String>,
}

impl Room {
    fn new(name: impl Into<String>) -> Self {
        let (channel, _) = broadcast::channel(ROOM_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            state: Mutex::new(RoomState::new()),
            channel,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a participant and announces the new count. The returned
    /// receiver is subscribed before the announcement, so the new
    /// participant sees it after its `init`.
    pub async fn join(&self) -> Membership {
        let participant_id = new_participant_id();
        let mut state = self.state.lock().await;

        let frames = self.channel.subscribe();
        state.participants.insert(participant_id.clone());
        let init = encode(&InboundMessage::Init {
            self_id: participant_id.clone(),
            users_count: Some(state.users_count()),
            bpmn_xml: state.document.clone(),
            locks: Some(state.locks.clone()),
        });
        self.announce_users(&state);

        tracing::info!(
            room = %self.name,
            participant_id = %participant_id,
            users = state.participants.len(),
            "participant joined"
        );

        Membership {
            participant_id,
            init: init.unwrap_or_default(),
            frames,
        }
    }

    /// Applies one client frame. Malformed and unknown frames are ignored.
    pub async fn handle_frame(&self, participant_id: &str, frame: &str) {
        let message = match OutboundMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(room = %self.name, error = %e, "ignoring malformed frame");
                return;
            }
        };

        let mut state = self.state.lock().await;
        match message {
            OutboundMessage::UpdateDiagram { bpmn_xml } => {
                if bpmn_xml.is_empty() {
                    return;
                }
                state.document = bpmn_xml.clone();
                self.broadcast(&InboundMessage::DiagramUpdate {
                    user_id: participant_id.to_string(),
                    bpmn_xml,
                    locks: Some(state.locks.clone()),
                });
            }
            OutboundMessage::LockElement { element_id } => {
                if element_id.is_empty() {
                    return;
                }
                state
                    .locks
                    .insert(element_id.clone(), participant_id.to_string());
                self.broadcast(&InboundMessage::Lock {
                    element_id,
                    user_id: participant_id.to_string(),
                });
            }
            OutboundMessage::UnlockElement { element_id } => {
                if state.locks.get(&element_id).map(String::as_str) != Some(participant_id) {
                    tracing::debug!(
                        room = %self.name,
                        element_id = %element_id,
                        "unlock from non-owner ignored"
                    );
                    return;
                }
                state.locks.remove(&element_id);
                self.broadcast(&InboundMessage::Unlock { element_id });
            }
            OutboundMessage::Unknown => {
                tracing::debug!(room = %self.name, "ignoring frame of unknown type");
            }
        }
    }

    /// Removes a participant, releasing everything it held.
    pub async fn leave(&self, participant_id: &str) {
        let mut state = self.state.lock().await;
        state.participants.remove(participant_id);

        let released: Vec<String> = state
            .locks
            .iter()
            .filter(|(_, owner)| owner.as_str() == participant_id)
            .map(|(element_id, _)| element_id.clone())
            .collect();
        for element_id in &released {
            state.locks.remove(element_id);
        }
        if !released.is_empty() {
            self.broadcast(&InboundMessage::BulkUnlock {
                element_ids: released,
            });
        }
        self.announce_users(&state);

        tracing::info!(
            room = %self.name,
            participant_id = %participant_id,
            users = state.participants.len(),
            "participant left"
        );
    }

    pub async fn users_count(&self) -> u32 {
        self.state.lock().await.users_count()
    }

    pub async fn document(&self) -> String {
        self.state.lock().await.document.clone()
    }

    pub async fn locks(&self) -> LockMap {
        self.state.lock().await.locks.clone()
    }

    fn announce_users(&self, state: &RoomState) {
        self.broadcast(&InboundMessage::Users {
            users_count: Some(state.users_count()),
        });
    }

    fn broadcast(&self, message: &InboundMessage) {
        if let Some(frame) = encode(message) {
            // No receivers just means the room is empty.
            let _ = self.channel.send(frame);
        }
    }
}

fn encode(message: &InboundMessage) -> Option<String> {
    match message.encode() {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!(kind = message.kind(), error = %e, "failed to encode frame");
            None
        }
    }
}

/// All rooms of the relay. Rooms are created on first join and kept for
/// the life of the process.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the room called `name`, creating it if needed.
    pub async fn room(&self, name: &str) -> Arc<Room> {
        if let Some(room) = self.rooms.read().await.get(name) {
            return room.clone();
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(room = %name, "room created");
                Arc::new(Room::new(name))
            })
            .clone()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
