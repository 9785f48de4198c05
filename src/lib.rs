//! # ravstack: OpenStack Ironic bare-metal nodes on Ravello
//!
//! Facade crate that re-exports the ravstack workspace crates so consumers
//! can depend on a single `ravstack` library.
//!
//! ## Crate breakdown
//!
//! | Module | Crate | Purpose |
//! |--------|-------|---------|
//! | [`core`] | ravstack-core | Application model, power states, boot device, retry, IP allocation, inventory, config |
//! | [`runtime`] | ravstack-runtime | Ravello REST client, sessions, power operations, node creation, dumping |
//! | [`cli`] | ravstack-cli | Command tree, virsh proxy, logging |

pub use ravstack_cli as cli;
pub use ravstack_core as core;
pub use ravstack_runtime as runtime;
