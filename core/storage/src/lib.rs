//! Store abstractions for FitSync.
//!
//! This module provides the two collaborators the sync engine talks to:
//! the on-device `LocalStore` and the server-side `CloudStore`, plus
//! in-memory, SQLite and HTTP implementations.
//!
//! # Design Principles
//! - Store isolation: no sync policy lives in the stores
//! - Local operations are synchronous; cloud operations are async
//! - Unified error semantics: every store reports `fitsync_common::Error`

pub mod http;
pub mod memory;
pub mod provider;
pub mod sqlite;

pub use http::{HttpCloudConfig, HttpCloudStore};
pub use memory::{MemoryCloudStore, MemoryLocalStore};
pub use provider::{CloudStore, ExportResponse, ImportRequest, ImportResponse, LocalStore};
pub use sqlite::{KindCount, SqliteLocalStore};
