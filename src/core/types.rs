//! Shared type definitions for the loader
//!
//! Small identifiers and encoding enums used by the topology, geometry,
//! partitioning and scratch layers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Width in bytes of one matrix entry in the source file
pub const ENTRY_BYTE_WIDTH: usize = 2;

/// Index of a node (process) within the cluster, `0..node_count`
pub type NodeId = usize;

/// Index of a worker thread within its node, `0..thread_count`
pub type ThreadId = usize;

/// Index of a tile within the matrix, `0..tile_count`
pub type TileIndex = usize;

/// Byte order of the 16-bit entries in the source file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Most significant byte first
    Big,
    /// Least significant byte first
    Little,
}

impl ByteOrder {
    /// Map the `is_big_endian` configuration flag to a byte order
    pub fn from_big_endian_flag(is_big_endian: bool) -> Self {
        if is_big_endian {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteOrder::Big => write!(f, "big-endian"),
            ByteOrder::Little => write!(f, "little-endian"),
        }
    }
}

/// Interpretation of a decoded 16-bit entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Two's complement `i16`
    Signed,
    /// `u16`
    Unsigned,
}

impl EntryKind {
    /// Largest value an entry of this kind can hold; distances are normalised by it
    pub fn max_value(self) -> i32 {
        match self {
            EntryKind::Signed => i16::MAX as i32,
            EntryKind::Unsigned => u16::MAX as i32,
        }
    }

    /// Smallest value an entry of this kind can hold
    pub fn min_value(self) -> i32 {
        match self {
            EntryKind::Signed => i16::MIN as i32,
            EntryKind::Unsigned => 0,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Signed => write!(f, "signed short"),
            EntryKind::Unsigned => write!(f, "unsigned short"),
        }
    }
}
