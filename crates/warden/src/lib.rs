//! warden - fleet coordination for game-server nodes
//!
//! One node per guild is elected master over a shared Postgres database.
//! The master owns the schema and drives fleet upgrades; every node keeps
//! its local game-server instances up to date.

mod runtime;

pub use warden_core;
pub use warden_runtime;

pub use runtime::prelude;
pub use runtime::{node_name, Warden, WardenBuilder};
