//! Sync error types.
//!
//! None of these are fatal: transport errors end in a reconnect, protocol
//! errors drop a single frame and document errors keep the previous
//! document on screen.

use thiserror::Error;

/// The connection to the sync server dropped or could not be opened.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to connect to server
    #[error("Connection error: {0}")]
    Connect(String),
    /// WebSocket error on a live connection
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// A frame could not be encoded or decoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed JSON, missing `type` or a missing required field
    #[error("Failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
    /// Outbound message could not be serialized
    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// The diagramming engine rejected or could not produce a document.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Payload refused by the engine (malformed document)
    #[error("Document rejected: {0}")]
    Rejected(String),
    /// Backing storage failure
    #[error("Document I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced through the public client handle.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// The client event loop has already shut down
    #[error("Sync client is not running")]
    ClientStopped,
}
