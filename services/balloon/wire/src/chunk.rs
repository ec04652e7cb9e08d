//! Photo chunking.
//!
//! Splits a photo into [`PhotoChunk`] messages small enough for one frame
//! each. Reassembly happens on the ground, in the storage crate.

use bytes::Bytes;

use crate::message::PhotoChunk;
use crate::EncodeError;

/// Default chunk size (one full frame of photo bytes)
pub const DEFAULT_CHUNK_SIZE: usize = PhotoChunk::MAX_DATA;

/// Chunker for splitting photos into chunk messages
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
}

impl Chunker {
    /// Create a new chunker with default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Create a chunker with a smaller chunk size, clamped to `1..=MAX_DATA`
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.clamp(1, PhotoChunk::MAX_DATA),
        }
    }

    /// Split a photo into chunks for transfer `index`
    pub fn chunk_photo(&self, index: u16, photo: Bytes) -> Result<Vec<PhotoChunk>, EncodeError> {
        if photo.is_empty() {
            return Ok(vec![]);
        }

        let file_size =
            u32::try_from(photo.len()).map_err(|_| EncodeError::PayloadTooLarge(photo.len()))?;
        let total = photo.len().div_ceil(self.chunk_size);
        let chunk_count =
            u16::try_from(total).map_err(|_| EncodeError::PayloadTooLarge(photo.len()))?;

        let mut chunks = Vec::with_capacity(total);
        let mut offset = 0;
        for chunk in 0..chunk_count {
            let end = std::cmp::min(offset + self.chunk_size, photo.len());
            chunks.push(PhotoChunk {
                index,
                chunk,
                chunk_count,
                file_size,
                data: photo.slice(offset..end),
            });
            offset = end;
        }

        Ok(chunks)
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn test_chunk_photo() {
        let photo = Bytes::from((0..600u32).map(|i| i as u8).collect::<Vec<_>>());
        let chunks = Chunker::new().chunk_photo(7, photo.clone()).unwrap();

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chunk_count == 3 && c.file_size == 600));
        assert_eq!(chunks[2].data.len(), 600 - 2 * DEFAULT_CHUNK_SIZE);

        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.data.iter().copied()).collect();
        assert_eq!(joined, photo.to_vec());

        for chunk in chunks {
            assert!(Message::from(chunk).encode().is_ok());
        }
    }

    #[test]
    fn test_empty_photo() {
        assert!(Chunker::new().chunk_photo(1, Bytes::new()).unwrap().is_empty());
    }

    #[test]
    fn test_small_chunk_size() {
        let chunks = Chunker::with_chunk_size(4)
            .chunk_photo(2, Bytes::from_static(b"0123456789"))
            .unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].data, Bytes::from_static(b"89"));
    }
}
