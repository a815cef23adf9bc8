// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod cache;
pub mod clock;
pub mod config;
pub mod enrich;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod quota;
pub mod reconcile;
pub mod store;
pub mod timeline;

// ---- Re-exports for stable public API ----
pub use crate::error::{Error, NormalizeError, Result};
pub use crate::ingest::{BatchResult, Orchestrator};
pub use crate::model::{Event, EventKind, Platform, Source, SourceDetails};
pub use crate::reconcile::{LiveReconciler, ReconcileReport};
pub use crate::timeline::{TimelinePage, TimelineQuery};
