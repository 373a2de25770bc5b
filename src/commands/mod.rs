mod config_cmd;
mod join;
mod room_cmd;

pub use config_cmd::ConfigCommand;
pub use join::JoinCommand;
pub use room_cmd::RoomCommand;
