//! Local instance bookkeeping.

mod registry;

pub use registry::InstanceRegistry;
