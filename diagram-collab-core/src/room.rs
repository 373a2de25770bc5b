//! Room identifiers and sync endpoints.
//!
//! A room is named by the path segment after `/diagram/` in the hosting
//! application's URL. The sync endpoint for a room is
//! `<ws|wss>://<host>/ws/diagram/<room>/`.

use std::fmt;

/// Path prefix that carries the room name.
pub const ROOM_PATH_PREFIX: &str = "/diagram/";
/// Room used when the URL does not name one.
pub const DEFAULT_ROOM: &str = "default";

/// Name of a collaborative session. Immutable once chosen.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new(DEFAULT_ROOM)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of deriving a room from a URL path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomResolution {
    pub room: RoomId,
    /// Set when the hosting application should rewrite its URL, which
    /// only happens for the bare root path.
    pub normalized_path: Option<String>,
}

/// Derives the room from a URL path such as `/diagram/Sales%20Flow/edit`.
///
/// The segment is percent-decoded; a segment that does not decode to
/// UTF-8 is used as is. Paths without a room fall back to
/// [`DEFAULT_ROOM`].
pub fn resolve_room(path: &str) -> RoomResolution {
    if let Some(rest) = path.strip_prefix(ROOM_PATH_PREFIX) {
        let segment = rest.split('/').next().unwrap_or_default();
        if !segment.is_empty() {
            let name = urlencoding::decode(segment)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| segment.to_string());
            return RoomResolution {
                room: RoomId::new(name),
                normalized_path: None,
            };
        }
    }

    let normalized_path = if path.is_empty() || path == "/" {
        Some(format!("{}{}", ROOM_PATH_PREFIX, DEFAULT_ROOM))
    } else {
        None
    };

    RoomResolution {
        room: RoomId::default(),
        normalized_path,
    }
}

/// Builds the WebSocket endpoint for `room` on `server_url`.
///
/// `http`/`https` map to `ws`/`wss`; a bare `host:port` gets `ws://`.
pub fn endpoint_for(server_url: &str, room: &RoomId) -> String {
    let base_url = if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if !server_url.starts_with("ws://") && !server_url.starts_with("wss://") {
        format!("ws://{}", server_url)
    } else {
        server_url.to_string()
    };

    format!(
        "{}/ws/diagram/{}/",
        base_url.trim_end_matches('/'),
        urlencoding::encode(room.as_str())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_named_room() {
        let resolved = resolve_room("/diagram/sales_flow");
        assert_eq!(resolved.room.as_str(), "sales_flow");
        assert_eq!(resolved.normalized_path, None);
    }

    #[test]
    fn test_resolve_decodes_and_stops_at_next_segment() {
        let resolved = resolve_room("/diagram/My%20Room/edit");
        assert_eq!(resolved.room.as_str(), "My Room");
    }

    #[test]
    fn test_resolve_root_normalizes() {
        for path in ["/", ""] {
            let resolved = resolve_room(path);
            assert_eq!(resolved.room, RoomId::default());
            assert_eq!(
                resolved.normalized_path.as_deref(),
                Some("/diagram/default")
            );
        }
    }

    #[test]
    fn test_resolve_other_path_falls_back_without_rewrite() {
        let resolved = resolve_room("/settings");
        assert_eq!(resolved.room.as_str(), DEFAULT_ROOM);
        assert_eq!(resolved.normalized_path, None);

        let resolved = resolve_room("/diagram/");
        assert_eq!(resolved.room.as_str(), DEFAULT_ROOM);
        assert_eq!(resolved.normalized_path, None);
    }

    #[test]
    fn test_resolve_invalid_escape_keeps_raw_segment() {
        let resolved = resolve_room("/diagram/bad%FFname");
        assert_eq!(resolved.room.as_str(), "bad%FFname");
    }

    #[test]
    fn test_endpoint_for() {
        let room = RoomId::new("team1");
        assert_eq!(
            endpoint_for("http://localhost:8000", &room),
            "ws://localhost:8000/ws/diagram/team1/"
        );
        assert_eq!(
            endpoint_for("https://diagrams.example.com/", &room),
            "wss://diagrams.example.com/ws/diagram/team1/"
        );
        assert_eq!(
            endpoint_for("localhost:8000", &room),
            "ws://localhost:8000/ws/diagram/team1/"
        );
        assert_eq!(
            endpoint_for("wss://sync.example.com", &room),
            "wss://sync.example.com/ws/diagram/team1/"
        );
    }

    #[test]
    fn test_endpoint_encodes_room() {
        let room = RoomId::new("My Room");
        assert_eq!(
            endpoint_for("ws://localhost:8000", &room),
            "ws://localhost:8000/ws/diagram/My%20Room/"
        );
    }
}
