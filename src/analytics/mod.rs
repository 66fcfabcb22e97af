//! Analytics Module
//!
//! Bounded, append-only observability for the security pipeline: a request
//! timeline ring buffer, aggregate counters, latency samples, and a
//! Prometheus export.

pub mod recorder;
pub mod types;

pub use recorder::AnalyticsRecorder;
pub use types::{AnalyticsConfig, AnalyticsStats, EndpointStats, TimelineEntry, TimelineKind};
