//! Diagram Collab
//!
//! The room relay used by the `diagram-collab-server` binary, exposed as a
//! library so it can be embedded and tested.

pub mod server;
