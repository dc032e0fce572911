//! CLI command implementations

mod config;
mod dev;
mod exec;
mod wait;

pub use config::{config_init, config_path, config_show};
pub use dev::dev_command;
pub use exec::exec_command;
pub use wait::{wait_command, WaitFor};
