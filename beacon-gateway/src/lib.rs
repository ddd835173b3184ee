//! beacon-gateway: async runtime around `beacon-core`.
//!
//! Scan sources push raw frames through a `ScanHandle` into the window actor.
//! A ticker drives evictions; evicted batches land in a single-slot hand-off
//! and the publisher turns them into envelopes for a `Transport`.

pub mod actor;
pub mod capture;
pub mod pipeline;
pub mod publisher;
pub mod slot;
pub mod transport;

pub use actor::{DetectionBatch, Ingest, IngressStats, ScanHandle, WindowActor, WindowMsg};
pub use pipeline::{Pipeline, PipelineConfig, PipelineReport};
pub use publisher::{PublishReport, Publisher};
pub use slot::{Claim, LatestSlot, PutOutcome};
pub use transport::{HttpTransport, StdoutTransport, Transport, TransportError};
