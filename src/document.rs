//! File-backed document for the command-line client.
//!
//! The file on disk is the displayed document: remote updates overwrite
//! it, and local edits are made by changing it and reporting the change.
//! Lock markers are kept in memory and printed as they change.

use std::collections::BTreeSet;
use std::path::PathBuf;

use diagram_collab_core::{DocumentBridge, DocumentError, MarkerKind};

#[derive(Debug)]
pub struct FileDocument {
    path: PathBuf,
    markers: BTreeSet<(String, MarkerKind)>,
    quiet: bool,
}

impl FileDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            markers: BTreeSet::new(),
            quiet: false,
        }
    }

    /// Stops printing marker changes.
    #[cfg(test)]
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Elements currently carrying `marker`, sorted.
    #[cfg(test)]
    pub fn marked(&self, marker: MarkerKind) -> Vec<&str> {
        self.markers
            .iter()
            .filter(|(_, kind)| *kind == marker)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

impl DocumentBridge for FileDocument {
    async fn load_document(&mut self, xml: &str) -> Result<(), DocumentError> {
        if xml.trim().is_empty() {
            return Err(DocumentError::Rejected("document is empty".to_string()));
        }

        // Stage next to the target, then rename over it.
        let staging = self.path.with_extension("incoming");
        tokio::fs::write(&staging, xml).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        tracing::debug!(path = %self.path.display(), bytes = xml.len(), "document written");
        Ok(())
    }

    async fn serialize_document(&mut self) -> Result<String, DocumentError> {
        Ok(tokio::fs::read_to_string(&self.path).await?)
    }

    fn set_element_marker(&mut self, element_id: &str, marker: MarkerKind) {
        if self.markers.insert((element_id.to_string(), marker)) && !self.quiet {
            println!("[{}] {}", marker, element_id);
        }
    }

    fn clear_element_marker(&mut self, element_id: &str, marker: MarkerKind) {
        if self.markers.remove(&(element_id.to_string(), marker)) && !self.quiet {
            println!("[released] {}", element_id);
        }
    }
}
