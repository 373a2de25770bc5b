use clap::{Args, Subcommand, ValueEnum};
use std::fs;
use std::io::Write;

use crate::config::{Config, ConfigValue};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Initialize configuration file
    Init,
}

const DEFAULT_CONFIG: &str = r#"# diagram-collab configuration

# Relay server (http/https/ws/wss)
server_url: http://localhost:8000

# Room joined when none is given on the command line
room: default

# Document file to keep in sync (default: <data dir>/diagram-collab/<room>.bpmn)
# document_path: ~/diagrams/main.bpmn

# Quiet period before local edits are broadcast
debounce_ms: 400

# Wait between a dropped connection and the next attempt
reconnect_delay_ms: 3000
"#;

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        print_value("server_url", &config.server_url);
                        print_value("room", &config.room);

                        match &config.document_path.value {
                            Some(path) => println!("document_path: {}", path.display()),
                            None => println!(
                                "document_path: {}/<room>.bpmn",
                                Config::default_data_dir().display()
                            ),
                        }
                        println!("  source: {}", config.document_path.source);
                        println!();

                        print_value("debounce_ms", &config.debounce_ms);
                        print_value("reconnect_delay_ms", &config.reconnect_delay_ms);
                    }
                }
                Ok(())
            }

            ConfigSubcommand::Init => {
                let config_path = Config::default_config_path();

                // Check if config already exists
                if config_path.exists() {
                    println!("Config file already exists: {}", config_path.display());
                    println!("Use 'diagram-collab config show' to view current configuration.");
                    return Ok(());
                }

                if let Some(parent) = config_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                let mut file = fs::File::create(&config_path)?;
                file.write_all(DEFAULT_CONFIG.as_bytes())?;

                println!("Created config file: {}", config_path.display());
                println!("\nEdit this file to customize your settings.");
                Ok(())
            }
        }
    }
}

fn print_value<T: std::fmt::Display>(name: &str, value: &ConfigValue<T>) {
    println!("{}: {}", name, value.value);
    println!("  source: {}", value.source);
    println!();
}
