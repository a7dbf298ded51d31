mod pool;

pub use pool::{is_connectivity_error, Database};
