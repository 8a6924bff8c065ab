//! API module
//!
//! This module provides the HTTP front end for taskrank.

pub mod server;

// Re-export commonly used types
pub use server::{router, serve, ApiResponse, ServerConfig};
