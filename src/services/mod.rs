//! Background services

pub mod quota_cleanup;

pub use quota_cleanup::{QuotaCleanupConfig, QuotaCleanupHandle, QuotaCleanupService};
