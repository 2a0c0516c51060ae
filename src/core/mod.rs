//! Core system types and foundations
//!
//! This module contains the fundamental building blocks of the loader:
//! shared type definitions, error handling and configuration.

pub mod types;
pub mod error;
pub mod config;

// Re-export commonly used items
pub use types::{ByteOrder, EntryKind, NodeId, ThreadId, TileIndex, ENTRY_BYTE_WIDTH};
pub use error::{Error, Result};
pub use config::Config;
