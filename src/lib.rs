//! Online Classroom - real-time lecture hub
//!
//! A per-lecture WebSocket hub relaying collaborative-editor updates, chat
//! and presence between one teacher and many students, plus a sandboxed
//! Python execution service.
//!
//! ## Features
//!
//! - Role-checked routing of document updates (`teacher-code`, `student-{id}`)
//! - Presence roster and bounded chat history per lecture
//! - Reconnect-safe session registry with bounded per-connection queues
//! - Container-isolated code execution with per-role limits and quotas
//! - Optional PostgreSQL audit trail of execution results

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod execution;
pub mod models;
pub mod realtime;
pub mod repository;
pub mod services;

pub use config::Config;
pub use database::Database;
pub use error::{ClassroomError, Result};
