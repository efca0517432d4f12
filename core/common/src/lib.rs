//! Common types shared across FitSync crates.
//!
//! This module provides the error taxonomy, identifiers, entity kinds and
//! the bulk payload format used by both stores and the sync engine.

pub mod error;
pub mod payload;
pub mod types;

pub use error::{Error, Result};
pub use payload::{Record, SyncPayload, DELETED_AT_FIELD, UPDATED_AT_FIELD};
pub use types::{DeviceId, EntityId, EntityKind};
