//! Multipart Upload Module
//!
//! Assembles large files from independently uploaded chunks:
//! - Session metadata and chunk records in a shared key-value store
//! - Chunks staged on the local filesystem, one file per chunk index
//! - Deferred deletion of every staged artifact
//!
//! Protocol Flow:
//! 1. Client starts an upload with the target name and chunk count
//! 2. Client uploads chunks in any order, possibly in parallel
//! 3. Client calls done; the server merges chunks by ascending index
//! 4. Client finalizes the merged reference before its validity runs out

pub mod chunk_store;
pub mod delay;
pub mod keys;
pub mod service;
pub mod session_store;
pub mod staging;
pub mod types;
pub mod validation;

pub use chunk_store::ChunkStore;
pub use delay::DelayScheduler;
pub use keys::KeySpace;
pub use service::{MultipartUploader, SingleUpload};
pub use session_store::SessionStore;
pub use staging::{format_reference, parse_reference, StagedRef, StagingArea};
pub use types::*;
