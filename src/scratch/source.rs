//! Read-only access to the source distance matrix

use crate::core::error::{Error, Result};
use memmap2::MmapOptions;
use std::fs::File;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// The source matrix file, opened read-only and never written
///
/// Each read maps only the requested byte range, so concurrent reads of
/// disjoint ranges share the handle without locking.
#[derive(Debug)]
pub struct SourceFile {
    id: u64,
    path: PathBuf,
    file: File,
}

impl SourceFile {
    /// Open `path` read-only
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::path(path, format!("cannot open distance matrix: {}", e)))?;
        Ok(Self {
            id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
            path: path.to_path_buf(),
            file,
        })
    }

    /// Process-unique identity, used to recognise bytes already staged from this file
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Path the file was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy `range` of the file into `dst`, which must be exactly as long
    pub fn read_range(&self, range: Range<u64>, dst: &mut [u8]) -> Result<()> {
        let len = range.end.saturating_sub(range.start);
        if dst.len() as u64 != len {
            return Err(Error::decode(format!(
                "destination holds {} bytes but range {:?} has {}",
                dst.len(),
                range,
                len
            )));
        }
        if len == 0 {
            return Ok(());
        }

        // Mapping past EOF faults on access, so re-check the length every time.
        let file_len = self.file.metadata()?.len();
        if range.end > file_len {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{:?} ends at {} but {:?} was requested", self.path, file_len, range),
            )));
        }

        // SAFETY: the file is opened read-only and treated as immutable for the run.
        let map = unsafe {
            MmapOptions::new()
                .offset(range.start)
                .len(len as usize)
                .map(&self.file)?
        };
        dst.copy_from_slice(&map);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_unaligned_range() {
        let mut file = NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..=255).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let source = SourceFile::open(file.path()).unwrap();
        let mut dst = vec![0u8; 10];
        source.read_range(7..17, &mut dst).unwrap();
        assert_eq!(dst, (7..17).collect::<Vec<u8>>());
    }

    #[test]
    fn test_read_past_end() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4]).unwrap();
        file.flush().unwrap();

        let source = SourceFile::open(file.path()).unwrap();
        let mut dst = vec![0u8; 4];
        let result = source.read_range(2..6, &mut dst);
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_ids_are_unique() {
        let file = NamedTempFile::new().unwrap();
        let a = SourceFile::open(file.path()).unwrap();
        let b = SourceFile::open(file.path()).unwrap();
        assert_ne!(a.id(), b.id());
    }
}
