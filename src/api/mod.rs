//! API server implementation
//!
//! REST endpoints for joining classrooms, inspecting presence and running
//! code, plus the classroom WebSocket upgrade.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{ApiServer, AppState};
