pub mod alias;
pub mod audit;
pub mod bill;
pub mod candidate;
pub mod catalog;
pub mod confidence;
pub mod error;
pub mod money;

pub use alias::{alias_order, AliasStore, MemoryAliasStore, NewAlias, UnitConversion, VendorSkuAlias};
pub use audit::{AuditEntry, AuditError, AuditEvent, AuditSink, MemoryAuditSink};
pub use bill::{
    accept_candidates, computed_subtotal, plan_match_update, unmatched_line_nos, BillStatus,
    MatchUpdate, VendorBill, VendorBillLine,
};
pub use candidate::{MatchCandidate, MatchReason};
pub use catalog::{Catalog, CatalogError, CatalogItem, MemoryCatalog};
pub use confidence::ConfidenceBand;
pub use error::EngineError;
pub use money::Money;
