//! Audit trail: append-only attempt log and BLAKE3 hashing.

pub mod hasher;
pub mod log;

pub use log::{AuditLog, JsonlAuditLog, MemoryAuditLog};
