pub mod api;
pub mod config;
pub mod metrics_server;
pub mod observability;
pub mod sinks;
pub mod sync;

pub use sync::{BackfillEngine, SyncScheduler};
