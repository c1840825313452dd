//! Execution bookkeeping
//!
//! Each submission becomes an [`ExecutionRecord`] that starts `running` and
//! is moved to `completed` or `failed` exactly once. Records stay in memory
//! for later lookup; terminal records are optionally mirrored to an audit
//! store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{error, info, instrument, warn};

use super::policy::{validate_code, ExecutionPolicy};
use super::quota::ExecutionQuota;
use super::sandbox::{Sandbox, SandboxOutput};
use crate::error::{ClassroomError, Result, SandboxFailure};
use crate::models::{ExecutionRecord, ExecutionRequest, ExecutionStatus, Role};

/// Sink for terminal execution records
#[async_trait]
pub trait ExecutionAudit: Send + Sync {
    async fn record(&self, record: &ExecutionRecord) -> Result<()>;
}

pub struct ExecutionService {
    sandbox: Arc<dyn Sandbox>,
    results: RwLock<HashMap<String, ExecutionRecord>>,
    quota: ExecutionQuota,
    audit: Option<Arc<dyn ExecutionAudit>>,
    sandbox_available: AtomicBool,
    sequence: AtomicU64,
}

impl ExecutionService {
    pub fn new(sandbox: Arc<dyn Sandbox>, quota: ExecutionQuota) -> Self {
        Self {
            sandbox,
            results: RwLock::new(HashMap::new()),
            quota,
            audit: None,
            sandbox_available: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn ExecutionAudit>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn quota(&self) -> &ExecutionQuota {
        &self.quota
    }

    /// Probe the sandbox runtime; failure is reported, never fatal
    pub async fn check_sandbox(&self) -> std::result::Result<(), SandboxFailure> {
        let result = self.sandbox.health_check().await;
        self.sandbox_available
            .store(result.is_ok(), Ordering::Relaxed);
        result
    }

    /// Outcome of the most recent [`check_sandbox`](Self::check_sandbox)
    pub fn sandbox_available(&self) -> bool {
        self.sandbox_available.load(Ordering::Relaxed)
    }

    pub fn sandbox_name(&self) -> &'static str {
        self.sandbox.name()
    }

    /// Validate, run and record one submission
    ///
    /// Rejections (bad input, policy, quota) return an error and create no
    /// record. Sandbox failures do not error: they produce a `failed` record.
    #[instrument(skip(self, request), fields(lecture_id = request.lecture_id, requester = %request.user_zcode))]
    pub async fn submit(&self, request: ExecutionRequest, role: Role) -> Result<ExecutionRecord> {
        validate_code(&request.code, &request.language)?;
        if request.user_zcode.trim().is_empty() {
            return Err(ClassroomError::InvalidInput(
                "user_zcode is required".to_string(),
            ));
        }
        self.quota.check(&request.user_zcode)?;

        let policy = ExecutionPolicy::for_role(role);
        let record = ExecutionRecord {
            id: self.next_id(),
            lecture_id: request.lecture_id,
            user_zcode: request.user_zcode,
            code: request.code,
            language: request.language,
            document_key: request.document_key,
            status: ExecutionStatus::Running,
            output: String::new(),
            error: None,
            exit_code: 0,
            duration_ms: 0,
            executed_at: Utc::now(),
        };
        let id = record.id.clone();
        let code = record.code.clone();
        self.results.write().insert(id.clone(), record);

        info!(execution_id = %id, %role, "Execution started");
        let started = Instant::now();
        let outcome = self.sandbox.run(&code, &policy).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let finished = self.finish(&id, outcome, duration_ms)?;

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record(&finished).await {
                warn!(execution_id = %id, error = %e, "Failed to audit execution");
            }
        }

        Ok(finished)
    }

    /// Move a running record to its terminal state
    fn finish(
        &self,
        id: &str,
        outcome: std::result::Result<SandboxOutput, SandboxFailure>,
        duration_ms: i64,
    ) -> Result<ExecutionRecord> {
        let mut results = self.results.write();
        let record = results
            .get_mut(id)
            .ok_or_else(|| ClassroomError::Internal(format!("execution {} vanished", id)))?;

        if record.status.is_terminal() {
            error!(execution_id = %id, status = %record.status, "Execution already finished");
            return Ok(record.clone());
        }

        record.duration_ms = duration_ms;
        match outcome {
            Ok(output) => {
                record.status = ExecutionStatus::Completed;
                record.output = output.output;
                record.exit_code = output.exit_code;
                info!(execution_id = %id, exit_code = output.exit_code, duration_ms, "Execution completed");
            }
            Err(failure) => {
                record.status = ExecutionStatus::Failed;
                record.output = failure.captured_output().to_string();
                record.exit_code = failure.exit_code();
                record.error = Some(failure.to_string());
                warn!(execution_id = %id, error = %failure, duration_ms, "Execution failed");
            }
        }

        Ok(record.clone())
    }

    pub fn get_result(&self, id: &str) -> Result<ExecutionRecord> {
        self.results
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ClassroomError::NotFound("Execution result not found".to_string()))
    }

    pub fn record_count(&self) -> usize {
        self.results.read().len()
    }

    /// `exec_{unix}_{nanos}_{seq}`; the sequence keeps same-instant ids apart
    fn next_id(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("exec_{}_{}_{}", now.as_secs(), now.subsec_nanos(), seq)
    }
}

impl std::fmt::Debug for ExecutionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionService")
            .field("sandbox", &self.sandbox.name())
            .field("records", &self.record_count())
            .field("audit", &self.audit.is_some())
            .finish()
    }
}
