//! Wire types for the diagram room protocol.
//!
//! One JSON object per WebSocket text frame, discriminated by its `type`
//! field. Field names are snake_case on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::ProtocolError;

/// Element id -> owning participant id, as carried by `init` and
/// `diagram_update`.
pub type LockMap = BTreeMap<String, String>;

/// Messages sent by the server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// First frame of every connection
    Init {
        self_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        users_count: Option<u32>,
        bpmn_xml: String,
        #[serde(default)]
        locks: Option<LockMap>,
    },
    /// Participant count changed
    Users {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        users_count: Option<u32>,
    },
    /// Full document broadcast by a participant (possibly ourselves)
    DiagramUpdate {
        user_id: String,
        bpmn_xml: String,
        #[serde(default)]
        locks: Option<LockMap>,
    },
    Lock {
        element_id: String,
        user_id: String,
    },
    Unlock {
        element_id: String,
    },
    /// Mass release, e.g. when a participant disconnects
    BulkUnlock {
        element_ids: Vec<String>,
    },
    /// Any type this client does not know about. Skipped.
    #[serde(other)]
    Unknown,
}

/// Messages sent by a client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    UpdateDiagram { bpmn_xml: String },
    LockElement { element_id: String },
    UnlockElement { element_id: String },
    /// Frames from newer clients; never produced by this crate.
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// The wire `type` of this message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Init { .. } => "init",
            InboundMessage::Users { .. } => "users",
            InboundMessage::DiagramUpdate { .. } => "diagram_update",
            InboundMessage::Lock { .. } => "lock",
            InboundMessage::Unlock { .. } => "unlock",
            InboundMessage::BulkUnlock { .. } => "bulk_unlock",
            InboundMessage::Unknown => "unknown",
        }
    }
}

impl OutboundMessage {
    pub fn lock(element_id: impl Into<String>) -> Self {
        OutboundMessage::LockElement {
            element_id: element_id.into(),
        }
    }

    pub fn unlock(element_id: impl Into<String>) -> Self {
        OutboundMessage::UnlockElement {
            element_id: element_id.into(),
        }
    }

    pub fn update(bpmn_xml: impl Into<String>) -> Self {
        OutboundMessage::UpdateDiagram {
            bpmn_xml: bpmn_xml.into(),
        }
    }

    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// The wire `type` of this message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::UpdateDiagram { .. } => "update_diagram",
            OutboundMessage::LockElement { .. } => "lock_element",
            OutboundMessage::UnlockElement { .. } => "unlock_element",
            OutboundMessage::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_wire_shapes() {
        assert_eq!(
            OutboundMessage::lock("Task_1").encode().unwrap(),
            r#"{"type":"lock_element","element_id":"Task_1"}"#
        );
        assert_eq!(
            OutboundMessage::unlock("Task_1").encode().unwrap(),
            r#"{"type":"unlock_element","element_id":"Task_1"}"#
        );
        assert_eq!(
            OutboundMessage::update("<xml/>").encode().unwrap(),
            r#"{"type":"update_diagram","bpmn_xml":"<xml/>"}"#
        );
    }

    #[test]
    fn test_decode_init_with_locks() {
        let msg = InboundMessage::decode(concat!(
            r#"{"type":"init","self_id":"a1","users_count":2,"bpmn_xml":"<d/>","#,
            r#""locks":{"Task_1":"b2"}}"#,
        ))
        .unwrap();

        match msg {
            InboundMessage::Init {
                self_id,
                users_count,
                bpmn_xml,
                locks,
            } => {
                assert_eq!(self_id, "a1");
                assert_eq!(users_count, Some(2));
                assert_eq!(bpmn_xml, "<d/>");
                let locks = locks.unwrap();
                assert_eq!(locks.get("Task_1").map(String::as_str), Some("b2"));
            }
            other => panic!("Expected Init message, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_optional_fields_absent_or_null() {
        let msg = InboundMessage::decode(r#"{"type":"init","self_id":"a1","bpmn_xml":"<d/>"}"#)
            .unwrap();
        assert!(matches!(
            msg,
            InboundMessage::Init {
                users_count: None,
                locks: None,
                ..
            }
        ));

        let msg = InboundMessage::decode(
            r#"{"type":"diagram_update","user_id":"b2","bpmn_xml":"<d/>","locks":null}"#,
        )
        .unwrap();
        assert!(matches!(msg, InboundMessage::DiagramUpdate { locks: None, .. }));

        let msg = InboundMessage::decode(r#"{"type":"users"}"#).unwrap();
        assert_eq!(msg, InboundMessage::Users { users_count: None });
    }

    #[test]
    fn test_decode_unknown_type_is_not_an_error() {
        let msg = InboundMessage::decode(r#"{"type":"cursor","x":10,"y":20}"#).unwrap();
        assert_eq!(msg, InboundMessage::Unknown);
    }

    #[test]
    fn test_decode_failures() {
        // not JSON
        assert!(InboundMessage::decode("hello").is_err());
        // no discriminator
        assert!(InboundMessage::decode(r#"{"element_id":"Task_1"}"#).is_err());
        // required field missing
        assert!(InboundMessage::decode(r#"{"type":"lock","element_id":"Task_1"}"#).is_err());
        // wrong field type
        assert!(
            InboundMessage::decode(r#"{"type":"bulk_unlock","element_ids":"Task_1"}"#).is_err()
        );
    }

    #[test]
    fn test_decode_bulk_unlock() {
        let msg =
            InboundMessage::decode(r#"{"type":"bulk_unlock","element_ids":["A","B"]}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::BulkUnlock {
                element_ids: vec!["A".to_string(), "B".to_string()]
            }
        );
        assert_eq!(msg.kind(), "bulk_unlock");
    }

    #[test]
    fn test_outbound_decode_for_relay() {
        let msg = OutboundMessage::decode(r#"{"type":"lock_element","element_id":"Gateway_1"}"#)
            .unwrap();
        assert_eq!(msg, OutboundMessage::lock("Gateway_1"));

        let msg = OutboundMessage::decode(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, OutboundMessage::Unknown);
    }
}
