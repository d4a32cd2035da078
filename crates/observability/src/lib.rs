//! Tracing setup and the audit trail (shared across crates).

pub mod audit;
pub mod subscriber;

pub use audit::{AuditEvent, AUDIT_TARGET};

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    subscriber::init();
}
