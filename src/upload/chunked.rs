//! Splits a local blob into bounded, contiguous upload parts

use crate::error::{ReassemblerError, Result};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Maximum bytes sent per part (10 MiB, under the registry's ~20 MiB ceiling)
pub const LAYER_PART_MAX_SIZE: u64 = 10_485_760;

/// One part of a layer, with its inclusive byte span in the source blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerChunk {
    pub sequence_index: usize,
    pub bytes: Vec<u8>,
    pub first_byte: u64,
    pub last_byte: u64,
}

impl LayerChunk {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Number of parts a blob of `size` bytes splits into
pub fn part_count(size: u64, max_part_size: u64) -> usize {
    size.div_ceil(max_part_size) as usize
}

/// Sequential reader yielding a file as [`LayerChunk`]s
///
/// The file size is taken once at open; every chunk must then read in full; a file
/// that shrinks underneath the reader is a read error, not a short last part.
pub struct ChunkReader {
    path: PathBuf,
    file: File,
    size: u64,
    max_part_size: u64,
    offset: u64,
    next_index: usize,
}

impl ChunkReader {
    pub async fn open(path: &Path, max_part_size: u64) -> Result<Self> {
        if max_part_size == 0 {
            return Err(ReassemblerError::Validation(
                "part size must be greater than zero".to_string(),
            ));
        }

        let file = File::open(path)
            .await
            .map_err(|e| ReassemblerError::file_system(path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| ReassemblerError::file_system(path, e))?
            .len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
            max_part_size,
            offset: 0,
            next_index: 0,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn total_parts(&self) -> usize {
        part_count(self.size, self.max_part_size)
    }

    /// Next part in order, or `None` once the whole file has been read
    pub async fn next_chunk(&mut self) -> Result<Option<LayerChunk>> {
        if self.offset >= self.size {
            return Ok(None);
        }

        let want = (self.size - self.offset).min(self.max_part_size) as usize;
        let mut bytes = vec![0u8; want];
        let mut filled = 0usize;

        while filled < want {
            let n = self
                .file
                .read(&mut bytes[filled..])
                .await
                .map_err(|e| self.read_error(filled, e.to_string()))?;
            if n == 0 {
                return Err(self.read_error(
                    filled,
                    format!("short read: expected {} bytes, got {}", want, filled),
                ));
            }
            filled += n;
        }

        let chunk = LayerChunk {
            sequence_index: self.next_index,
            bytes,
            first_byte: self.offset,
            last_byte: self.offset + want as u64 - 1,
        };
        self.offset += want as u64;
        self.next_index += 1;
        Ok(Some(chunk))
    }

    fn read_error(&self, filled: usize, message: String) -> ReassemblerError {
        ReassemblerError::Read {
            path: self.path.clone(),
            offset: self.offset + filled as u64,
            message,
        }
    }
}

/// Read a whole file into its ordered parts
pub async fn split_file(path: &Path, max_part_size: u64) -> Result<Vec<LayerChunk>> {
    let mut reader = ChunkReader::open(path, max_part_size).await?;
    let mut chunks = Vec::with_capacity(reader.total_parts());
    while let Some(chunk) = reader.next_chunk().await? {
        chunks.push(chunk);
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_blob(dir: &tempfile::TempDir, len: usize) -> PathBuf {
        let path = dir.path().join("sha256__aaaa");
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        path
    }

    #[tokio::test]
    async fn test_25mb_blob_splits_into_three_parts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_blob(&dir, 25_000_000);

        let chunks = split_file(&path, LAYER_PART_MAX_SIZE).await.unwrap();
        let sizes: Vec<u64> = chunks.iter().map(LayerChunk::len).collect();
        let spans: Vec<(u64, u64)> = chunks.iter().map(|c| (c.first_byte, c.last_byte)).collect();

        assert_eq!(sizes, vec![10_485_760, 10_485_760, 4_028_480]);
        assert_eq!(
            spans,
            vec![
                (0, 10_485_759),
                (10_485_760, 20_971_519),
                (20_971_520, 24_999_999)
            ]
        );
        assert_eq!(
            chunks.iter().map(|c| c.sequence_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[tokio::test]
    async fn test_chunks_reassemble_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        for (len, part) in [(0usize, 7u64), (1, 7), (7, 7), (8, 7), (100, 7), (1000, 1), (99, 1000)] {
            let path = write_blob(&dir, len);
            let original = std::fs::read(&path).unwrap();
            let chunks = split_file(&path, part).await.unwrap();

            assert_eq!(chunks.len(), part_count(len as u64, part));
            let (last, rest) = match chunks.split_last() {
                Some(split) => split,
                None => {
                    assert_eq!(len, 0);
                    continue;
                }
            };
            assert!(rest.iter().all(|c| c.len() == part));
            assert!(last.len() > 0 && last.len() <= part);

            let mut expected_first = 0;
            for chunk in &chunks {
                assert_eq!(chunk.first_byte, expected_first);
                expected_first = chunk.last_byte + 1;
            }

            let joined: Vec<u8> = chunks.into_iter().flat_map(|c| c.bytes).collect();
            assert_eq!(joined, original);
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_filesystem_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = split_file(&dir.path().join("absent"), LAYER_PART_MAX_SIZE).await;
        assert!(matches!(result, Err(ReassemblerError::FileSystem { .. })));
    }

    #[tokio::test]
    async fn test_zero_part_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_blob(&dir, 10);
        assert!(matches!(
            split_file(&path, 0).await,
            Err(ReassemblerError::Validation(_))
        ));
    }
}
