//! Join a room and keep a local document file in sync with it.

use std::path::{Path, PathBuf};

use clap::Args;
use diagram_collab_core::{
    resolve_room, ConnectionState, LocalEvent, RoomId, SessionInfo, SyncClient, SyncClientHandle,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::document::FileDocument;

/// Local events waiting for the client before the console blocks.
const LOCAL_EVENT_BUFFER: usize = 64;

/// Join a diagram room
#[derive(Args)]
pub struct JoinCommand {
    /// Room to join (default: from config)
    #[arg(long, conflicts_with = "url_path")]
    room: Option<String>,

    /// Derive the room from a hosting application path, e.g. /diagram/sales
    #[arg(long, value_name = "PATH")]
    url_path: Option<String>,

    /// Document file to keep in sync (default: per-room file in the data dir)
    #[arg(long, short)]
    file: Option<PathBuf>,
}

impl JoinCommand {
    pub async fn run(&self, config: &Config) -> Result<(), JoinError> {
        let room = self.room_id(config);
        let path = self
            .file
            .clone()
            .unwrap_or_else(|| config.document_path_for(&room));
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        println!("Joining room '{}' on {}", room, config.server_url.value);
        println!("Document: {}", path.display());
        println!("Type 'help' for commands.\n");

        let (events, local_events) = mpsc::channel(LOCAL_EVENT_BUFFER);
        let (client, handle) = SyncClient::connect(
            &config.server_url.value,
            room,
            FileDocument::new(&path),
            local_events,
            config.client_options(),
        );

        let reporter = tokio::spawn(report_session(handle.subscribe()));
        let console = tokio::spawn(console(events, handle, path));

        // The client stops once the console drops its event sender.
        client.run().await;
        reporter.abort();

        match console.await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "console task failed");
                Ok(())
            }
        }
    }

    fn room_id(&self, config: &Config) -> RoomId {
        if let Some(name) = &self.room {
            return RoomId::new(name.clone());
        }
        if let Some(url_path) = &self.url_path {
            let resolved = resolve_room(url_path);
            if let Some(normalized) = &resolved.normalized_path {
                println!("Using {}", normalized);
            }
            return resolved.room;
        }
        RoomId::new(config.room.value.clone())
    }
}

/// One line typed at the console.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand {
    Select(String),
    Deselect,
    Edit,
    Import(PathBuf),
    Export(PathBuf),
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parses a console line. Blank lines yield `Ok(None)`.
    fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            return Ok(None);
        };
        let arg = parts.next();

        let command = match (verb, arg) {
            ("select", Some(id)) => ConsoleCommand::Select(id.to_string()),
            ("select", None) => return Err("usage: select <element-id>".to_string()),
            ("deselect", _) => ConsoleCommand::Deselect,
            ("edit", _) => ConsoleCommand::Edit,
            ("import", Some(path)) => ConsoleCommand::Import(PathBuf::from(path)),
            ("export", Some(path)) => ConsoleCommand::Export(PathBuf::from(path)),
            ("import" | "export", None) => return Err(format!("usage: {} <file>", verb)),
            ("status", _) => ConsoleCommand::Status,
            ("help" | "?", _) => ConsoleCommand::Help,
            ("quit" | "exit", _) => ConsoleCommand::Quit,
            _ => return Err(format!("unknown command '{}', type 'help'", verb)),
        };
        Ok(Some(command))
    }
}

async fn console(
    events: mpsc::Sender<LocalEvent>,
    handle: SyncClientHandle,
    path: PathBuf,
) -> Result<(), JoinError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let command = match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };

        match command {
            ConsoleCommand::Select(id) => {
                send(&events, LocalEvent::SelectionChanged(Some(id))).await?
            }
            ConsoleCommand::Deselect => send(&events, LocalEvent::SelectionChanged(None)).await?,
            ConsoleCommand::Edit => send(&events, LocalEvent::DocumentChanged).await?,
            ConsoleCommand::Import(source) => match tokio::fs::read_to_string(&source).await {
                Ok(xml) => send(&events, LocalEvent::ImportRequested(xml)).await?,
                Err(e) => println!("Cannot read {}: {}", source.display(), e),
            },
            ConsoleCommand::Export(target) => match handle.export().await {
                Ok(xml) => {
                    tokio::fs::write(&target, xml).await?;
                    println!("Exported to {}", target.display());
                }
                Err(e) => println!("Export failed: {}", e),
            },
            ConsoleCommand::Status => print_status(&handle.session_info(), &path),
            ConsoleCommand::Help => print_help(),
            ConsoleCommand::Quit => break,
        }
    }

    Ok(())
}

async fn send(events: &mpsc::Sender<LocalEvent>, event: LocalEvent) -> Result<(), JoinError> {
    events.send(event).await.map_err(|_| JoinError::ClientStopped)
}

/// Prints connection changes and the online participant count.
async fn report_session(mut info: watch::Receiver<SessionInfo>) {
    let mut last = (ConnectionState::Closed, 0);

    while info.changed().await.is_ok() {
        let current = {
            let snapshot = info.borrow_and_update();
            (snapshot.connection, snapshot.participant_count)
        };
        if current == last {
            continue;
        }
        match current.0 {
            ConnectionState::Open if current.1 > 0 => {
                println!("* {} online", participants(current.1))
            }
            ConnectionState::Open => {}
            ConnectionState::Closed if last.0 == ConnectionState::Open => {
                println!("* connection lost, reconnecting")
            }
            _ => {}
        }
        last = current;
    }
}

fn participants(count: u32) -> String {
    if count == 1 {
        "1 participant".to_string()
    } else {
        format!("{} participants", count)
    }
}

fn print_status(info: &SessionInfo, path: &Path) {
    println!("Room:       {}", info.room);
    println!("Connection: {}", info.connection);
    println!("Self id:    {}", info.self_id.as_deref().unwrap_or("-"));
    println!("Online:     {}", participants(info.participant_count));
    println!("Holding:    {}", info.held_lock.as_deref().unwrap_or("-"));
    println!("Locked:     {} element(s) held by others", info.remote_locks);
    println!("Document:   {}", path.display());
}

fn print_help() {
    println!("Commands:");
    println!("  select <id>      select an element (requests its lock)");
    println!("  deselect         clear the selection (releases the lock)");
    println!("  edit             broadcast the document file after editing it");
    println!("  import <file>    replace the document with a file and broadcast it");
    println!("  export <file>    write the current document to a file");
    println!("  status           show session status");
    println!("  quit             leave the room");
}

/// Errors from the join command
#[derive(Debug)]
pub enum JoinError {
    Io(std::io::Error),
    ClientStopped,
}

impl std::fmt::Display for JoinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinError::Io(e) => write!(f, "I/O error: {}", e),
            JoinError::ClientStopped => write!(f, "Sync client stopped"),
        }
    }
}

impl std::error::Error for JoinError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JoinError::Io(e) => Some(e),
            JoinError::ClientStopped => None,
        }
    }
}

impl From<std::io::Error> for JoinError {
    fn from(e: std::io::Error) -> Self {
        JoinError::Io(e)
    }
}
