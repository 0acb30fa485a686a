//! Crate for configuring a node.
//!
//! Bootstrap-specific and network-wide configurations.
mod bootstrap;
pub use bootstrap::*;
mod genesis;
pub use genesis::*;
