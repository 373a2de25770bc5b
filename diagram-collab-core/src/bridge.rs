//! The seam between the sync core and the diagramming engine.
//!
//! The engine owns the document content and the visual markers. The core
//! commands it through [`DocumentBridge`] and learns about local activity
//! through [`LocalEvent`]s sent over a channel.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::sync::DocumentError;

/// Visual indicator kinds the core asks the engine to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MarkerKind {
    /// Element is held by another participant
    LockedByOther,
}

impl MarkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerKind::LockedByOther => "locked-by-other",
        }
    }
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activity originating from the local participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    /// The committed edit history changed (not raw pointer movement)
    DocumentChanged,
    /// New single-element selection, or none
    SelectionChanged(Option<String>),
    /// The user imported a whole document from outside
    ImportRequested(String),
}

/// Operations the core needs from the diagramming engine.
#[allow(async_fn_in_trait)]
pub trait DocumentBridge {
    /// Replaces the displayed document. Must leave the previous document
    /// in place when it returns an error.
    async fn load_document(&mut self, xml: &str) -> Result<(), DocumentError>;

    /// Serializes the document as currently displayed.
    async fn serialize_document(&mut self) -> Result<String, DocumentError>;

    fn set_element_marker(&mut self, element_id: &str, marker: MarkerKind);

    fn clear_element_marker(&mut self, element_id: &str, marker: MarkerKind);
}

#[derive(Debug, Default)]
struct MemoryState {
    xml: Option<String>,
    markers: BTreeSet<(String, MarkerKind)>,
    loads: usize,
    serializations: usize,
}

/// In-memory [`DocumentBridge`] for headless clients and tests.
///
/// Clones share state, so a caller can keep a handle for inspection after
/// moving one into a [`SyncClient`](crate::sync::SyncClient). Payloads
/// that are blank or do not start with `<` are rejected as malformed.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocument {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a document that already holds `xml`.
    pub fn with_content(xml: impl Into<String>) -> Self {
        let doc = Self::new();
        doc.lock().xml = Some(xml.into());
        doc
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked mid-update.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulates a local edit. The caller still reports the change with
    /// [`LocalEvent::DocumentChanged`].
    pub fn set_content(&self, xml: impl Into<String>) {
        self.lock().xml = Some(xml.into());
    }

    pub fn content(&self) -> Option<String> {
        self.lock().xml.clone()
    }

    pub fn has_marker(&self, element_id: &str, marker: MarkerKind) -> bool {
        self.lock()
            .markers
            .contains(&(element_id.to_string(), marker))
    }

    /// Element ids currently carrying `marker`, sorted.
    pub fn marked_elements(&self, marker: MarkerKind) -> Vec<String> {
        self.lock()
            .markers
            .iter()
            .filter(|(_, kind)| *kind == marker)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of successful loads.
    pub fn load_count(&self) -> usize {
        self.lock().loads
    }

    pub fn serialize_count(&self) -> usize {
        self.lock().serializations
    }
}

impl DocumentBridge for MemoryDocument {
    async fn load_document(&mut self, xml: &str) -> Result<(), DocumentError> {
        if !xml.trim_start().starts_with('<') {
            return Err(DocumentError::Rejected(
                "payload is not an XML document".to_string(),
            ));
        }
        let mut state = self.lock();
        state.xml = Some(xml.to_string());
        state.loads += 1;
        Ok(())
    }

    async fn serialize_document(&mut self) -> Result<String, DocumentError> {
        let mut state = self.lock();
        state.serializations += 1;
        state
            .xml
            .clone()
            .ok_or_else(|| DocumentError::Rejected("no document loaded".to_string()))
    }

    fn set_element_marker(&mut self, element_id: &str, marker: MarkerKind) {
        self.lock().markers.insert((element_id.to_string(), marker));
    }

    fn clear_element_marker(&mut self, element_id: &str, marker: MarkerKind) {
        self.lock()
            .markers
            .remove(&(element_id.to_string(), marker));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_document_rejects_malformed_payload() {
        let mut doc = MemoryDocument::with_content("<old/>");

        let result = doc.load_document("definitely not xml").await;

        assert!(matches!(result, Err(DocumentError::Rejected(_))));
        assert_eq!(doc.content().as_deref(), Some("<old/>"));
        assert_eq!(doc.load_count(), 0);
    }

    #[tokio::test]
    async fn test_memory_document_clones_share_state() {
        let mut doc = MemoryDocument::new();
        let observer = doc.clone();

        doc.load_document("<bpmn:definitions/>").await.unwrap();
        doc.set_element_marker("Task_1", MarkerKind::LockedByOther);

        assert_eq!(observer.content().as_deref(), Some("<bpmn:definitions/>"));
        assert!(observer.has_marker("Task_1", MarkerKind::LockedByOther));

        doc.clear_element_marker("Task_1", MarkerKind::LockedByOther);
        assert!(observer.marked_elements(MarkerKind::LockedByOther).is_empty());
    }

    #[tokio::test]
    async fn test_serialize_empty_document_fails() {
        let mut doc = MemoryDocument::new();
        assert!(doc.serialize_document().await.is_err());
    }

    #[test]
    fn test_marker_kind_name() {
        assert_eq!(MarkerKind::LockedByOther.to_string(), "locked-by-other");
    }
}
