//! Decoded view of one staged tile

use crate::core::error::{Error, Result};
use crate::core::types::{ByteOrder, EntryKind, TileIndex, ENTRY_BYTE_WIDTH};
use crate::partition::codec::{check_aligned, decode_entry};
use std::ops::Range;

/// A dense `rows × columns` grid of distances covering `row_range` of the global matrix
///
/// Entries are decoded on access straight from the scratch region, so the
/// view cannot outlive the lease that staged it.
#[derive(Debug, Clone, Copy)]
pub struct MatrixBlock<'a> {
    tile: TileIndex,
    row_start: usize,
    row_end: usize,
    columns: usize,
    order: ByteOrder,
    kind: EntryKind,
    bytes: &'a [u8],
}

impl<'a> MatrixBlock<'a> {
    /// Wrap staged bytes for `rows` of a matrix with `columns` columns
    ///
    /// Fails with [`Error::Decode`] if the bytes do not split into whole
    /// entries or do not hold exactly `rows.len() × columns` of them.
    pub fn new(
        tile: TileIndex,
        rows: Range<usize>,
        columns: usize,
        order: ByteOrder,
        kind: EntryKind,
        bytes: &'a [u8],
    ) -> Result<Self> {
        check_aligned(bytes)?;
        let expected = rows.len() * columns * ENTRY_BYTE_WIDTH;
        if bytes.len() != expected {
            return Err(Error::decode(format!(
                "tile {} staged {} bytes, expected {}",
                tile,
                bytes.len(),
                expected
            )));
        }
        Ok(Self {
            tile,
            row_start: rows.start,
            row_end: rows.end,
            columns,
            order,
            kind,
            bytes,
        })
    }

    /// Tile this block was staged from
    pub fn tile(&self) -> TileIndex {
        self.tile
    }

    /// Global rows covered
    pub fn row_range(&self) -> Range<usize> {
        self.row_start..self.row_end
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.row_end - self.row_start
    }

    /// Number of columns (the global point count)
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Entry at local `row` and global `col`
    ///
    /// # Panics
    /// If either index is out of bounds, like slice indexing.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> i32 {
        assert!(row < self.rows() && col < self.columns, "({}, {}) outside block", row, col);
        let at = (row * self.columns + col) * ENTRY_BYTE_WIDTH;
        decode_entry([self.bytes[at], self.bytes[at + 1]], self.order, self.kind)
    }

    /// Entry at global `row` and `col`, if the row belongs to this block
    pub fn get_global(&self, row: usize, col: usize) -> Option<i32> {
        if !self.row_range().contains(&row) || col >= self.columns {
            return None;
        }
        Some(self.get(row - self.row_start, col))
    }

    /// Entry normalised to `[0, 1]` by the largest value of the entry kind
    #[inline]
    pub fn distance(&self, row: usize, col: usize) -> f64 {
        self.get(row, col) as f64 / self.kind.max_value() as f64
    }

    /// Decoded entries of local `row`
    pub fn row(&self, row: usize) -> impl Iterator<Item = i32> + 'a {
        assert!(row < self.rows(), "row {} outside block", row);
        let width = self.columns * ENTRY_BYTE_WIDTH;
        let (order, kind) = (self.order, self.kind);
        self.bytes[row * width..(row + 1) * width]
            .chunks_exact(ENTRY_BYTE_WIDTH)
            .map(move |pair| decode_entry([pair[0], pair[1]], order, kind))
    }

    /// Copy all entries out, row-major
    pub fn to_vec(&self) -> Vec<i32> {
        let (order, kind) = (self.order, self.kind);
        self.bytes
            .chunks_exact(ENTRY_BYTE_WIDTH)
            .map(|pair| decode_entry([pair[0], pair[1]], order, kind))
            .collect()
    }

    /// Undecoded bytes as staged from the source file
    pub fn raw_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}
