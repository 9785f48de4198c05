// ravstack-cli: command tree, virsh proxy, logging and terminal output.
pub mod commands;
pub mod logging;
pub mod proxy;
pub mod ui;

pub use commands::{cli_command, run};
