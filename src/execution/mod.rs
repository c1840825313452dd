//! Sandboxed code execution
//!
//! Requests are validated against the policy and quota, run in an isolated
//! runner, and tracked by execution id.

pub mod policy;
pub mod quota;
pub mod sandbox;
pub mod service;

pub use policy::{validate_code, ExecutionPolicy, MAX_CODE_BYTES};
pub use quota::ExecutionQuota;
pub use sandbox::{DockerSandbox, Sandbox, SandboxOutput};
pub use service::{ExecutionAudit, ExecutionService};
