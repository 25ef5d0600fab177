//! The reconciliation engine proper: document ingestion, the review
//! operations, and atomic posting, glued over the matcher and the stores.

pub mod ingest;
pub mod posting;
pub mod service;

pub use ingest::{IngestOutcome, ParsedBill, ParsedLine};
pub use posting::{PostingReceipt, PostingService};
pub use service::{EngineConfig, Reconciler};
