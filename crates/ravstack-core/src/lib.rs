// ravstack-core: application document model, power state rules, boot-device
// channel, retry engine, network allocation and node inventory.
// No I/O beyond reading and writing local config files.

pub mod app;
pub mod boot;
pub mod config;
pub mod error;
pub mod inventory;
pub mod network;
pub mod retry;
pub mod vm_state;
