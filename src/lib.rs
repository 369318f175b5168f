//! Multipart Upload Server Library
//!
//! Chunked upload assembly on top of a shared key-value store, with deferred
//! deletion of staged files. The server binary is in main.rs.
//!
//! # Modules
//!
//! - `kv`: Store seam with Redis and in-memory backends
//! - `upload`: Sessions, chunk records, staging, merge and the deletion scheduler
//! - `routes`: HTTP endpoints

pub mod config;
pub mod kv;
pub mod routes;
pub mod state;
pub mod upload;
