//! Matrix geometry descriptor
//!
//! Static shape and encoding of the source file: a flat, row-major
//! `point_count × point_count` grid of 2-byte entries with no header.
//! Everything here is arithmetic; only [`MatrixGeometry::describe`] touches
//! the filesystem, to check the file size once up front.

use crate::core::error::{Error, Result};
use crate::core::types::{ByteOrder, EntryKind, TileIndex, ENTRY_BYTE_WIDTH};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::info;

/// Immutable description of the global distance matrix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixGeometry {
    point_count: usize,
    byte_order: ByteOrder,
    entry_kind: EntryKind,
    block_size: usize,
    source: Option<PathBuf>,
}

impl MatrixGeometry {
    /// Describe the matrix stored at `path`
    ///
    /// Fails with [`Error::Geometry`] for a zero point count, a block size
    /// outside `1..=point_count`, or a file whose length is not
    /// `point_count² × 2`. A missing or unreadable file is an [`Error::Path`].
    pub fn describe(
        path: impl AsRef<Path>,
        point_count: usize,
        byte_order: ByteOrder,
        entry_kind: EntryKind,
        block_size: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut geometry = Self::with_shape(point_count, byte_order, entry_kind, block_size)?;

        let metadata = std::fs::metadata(path)
            .map_err(|e| Error::path(path, format!("cannot stat distance matrix: {}", e)))?;
        if !metadata.is_file() {
            return Err(Error::path(path, "distance matrix is not a regular file"));
        }
        let expected = geometry.total_bytes();
        if metadata.len() != expected {
            return Err(Error::geometry(format!(
                "{:?} holds {} bytes but {} points need {} bytes",
                path,
                metadata.len(),
                point_count,
                expected
            )));
        }

        geometry.source = Some(path.to_path_buf());
        info!(
            path = ?path,
            points = point_count,
            block_size,
            tiles = geometry.tile_count(),
            byte_order = %byte_order,
            entry = %entry_kind,
            "distance matrix described"
        );
        Ok(geometry)
    }

    /// Validate a shape without a backing file, for planning tile ownership
    pub fn with_shape(
        point_count: usize,
        byte_order: ByteOrder,
        entry_kind: EntryKind,
        block_size: usize,
    ) -> Result<Self> {
        if point_count < 1 {
            return Err(Error::geometry("point count must be at least 1"));
        }
        if block_size < 1 {
            return Err(Error::geometry("block size must be at least 1"));
        }
        if block_size > point_count {
            return Err(Error::geometry(format!(
                "block size {} exceeds point count {}",
                block_size, point_count
            )));
        }
        (point_count as u64)
            .checked_mul(point_count as u64)
            .and_then(|n| n.checked_mul(ENTRY_BYTE_WIDTH as u64))
            .ok_or_else(|| Error::geometry(format!("{} points overflow the file size", point_count)))?;

        Ok(Self {
            point_count,
            byte_order,
            entry_kind,
            block_size,
            source: None,
        })
    }

    /// Global row (and column) count
    pub fn point_count(&self) -> usize {
        self.point_count
    }

    /// Byte order of the entries
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Signedness of the entries
    pub fn entry_kind(&self) -> EntryKind {
        self.entry_kind
    }

    /// Rows per tile
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Width of one entry in bytes
    pub fn entry_byte_width(&self) -> usize {
        ENTRY_BYTE_WIDTH
    }

    /// File backing the matrix, if described from one
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Number of tiles, `ceil(point_count / block_size)`
    pub fn tile_count(&self) -> usize {
        self.point_count.div_ceil(self.block_size)
    }

    /// Rows covered by `tile`; the last tile may be shorter than `block_size`
    pub fn tile_rows(&self, tile: TileIndex) -> Result<Range<usize>> {
        if tile >= self.tile_count() {
            return Err(Error::out_of_range(format!(
                "tile {} of {} does not exist",
                tile,
                self.tile_count()
            )));
        }
        let start = tile * self.block_size;
        let end = (start + self.block_size).min(self.point_count);
        Ok(start..end)
    }

    /// Bytes in one row of the matrix
    pub fn row_bytes(&self) -> u64 {
        self.point_count as u64 * ENTRY_BYTE_WIDTH as u64
    }

    /// Bytes in the whole matrix
    pub fn total_bytes(&self) -> u64 {
        self.row_bytes() * self.point_count as u64
    }

    /// Bytes in the largest tile, which bounds a scratch region
    pub fn max_tile_bytes(&self) -> u64 {
        self.row_bytes() * self.block_size as u64
    }

    /// Byte range `[start, end)` of rows `row_start..row_end` in the source file
    pub fn byte_range_of(&self, row_start: usize, row_end: usize) -> Result<Range<u64>> {
        if row_start > row_end || row_end > self.point_count {
            return Err(Error::out_of_range(format!(
                "rows {}..{} outside 0..{}",
                row_start, row_end, self.point_count
            )));
        }
        let row_bytes = self.row_bytes();
        Ok(row_start as u64 * row_bytes..row_end as u64 * row_bytes)
    }
}
