// ravstack-runtime: Ravello API client, per-command session, power and
// boot-device operations, node creation, inventory and ethers output.

pub mod client;
pub mod create;
pub mod dump;
pub mod power;
pub mod session;
pub mod shell;

#[cfg(test)]
pub(crate) mod api_mock;
#[cfg(test)]
pub(crate) mod shell_mock;
