//! Jetson fleet telemetry kernel: node identity catalog, utilization/power
//! series with retention, and the pull/push adapters that feed them.

pub mod catalog;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod ingest;
pub mod models;
pub mod mqtt;
pub mod persistence;
pub mod retention;
pub mod seed;
pub mod state;
pub mod store;

pub use catalog::IdentityCatalog;
pub use error::{IngestError, StoreError, TransportError, ValidationError};
pub use ingest::{ClusterProfiles, Ingestor};
pub use state::{Database, SharedDatabase};
pub use store::SampleStore;
