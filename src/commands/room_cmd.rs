use clap::Args;
use diagram_collab_core::{endpoint_for, resolve_room, RoomResolution};
use serde::Serialize;

use crate::commands::config_cmd::OutputFormat;
use crate::config::Config;

/// Show which room and endpoint a hosting application path maps to
#[derive(Args)]
pub struct RoomCommand {
    /// URL path, e.g. /diagram/sales or /
    path: String,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Serialize)]
struct RoomReport {
    room: String,
    normalized_path: Option<String>,
    endpoint: String,
}

impl RoomReport {
    fn new(resolution: RoomResolution, server_url: &str) -> Self {
        Self {
            endpoint: endpoint_for(server_url, &resolution.room),
            room: resolution.room.to_string(),
            normalized_path: resolution.normalized_path,
        }
    }
}

impl RoomCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let report = RoomReport::new(resolve_room(&self.path), &config.server_url.value);

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Text => {
                println!("room:     {}", report.room);
                if let Some(path) = &report.normalized_path {
                    println!("path:     {} (normalized)", path);
                }
                println!("endpoint: {}", report.endpoint);
            }
        }
        Ok(())
    }
}
