pub mod alias_store;
pub mod audit;
pub mod bills;
pub mod catalog;
pub mod db;

pub use alias_store::SqliteAliasStore;
pub use audit::{get_audit_log, SqlAuditSink};
pub use bills::{
    clear_posted, commit_line_match, get_bill, get_bill_by_key, get_line, get_lines,
    get_suggested_multiplier, insert_bill, list_bills, mark_posted, mark_void,
    set_line_suggestion, set_status, NewBill, NewLine,
};
pub use catalog::{get_product, upsert_product, SqlCatalog};
pub use db::{create_db, DbPool};
