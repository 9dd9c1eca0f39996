//! Update archive buffer and upload chunking.
//!
//! The archive is immutable once built; its length and CRC32 are declared
//! to the device before any chunk is sent.

/// Patched update archive ready for upload.
#[derive(Debug, Clone)]
pub struct UpdateImage {
    data: Vec<u8>,
    crc32: u32,
}

impl UpdateImage {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let crc32 = crc32fast::hash(&data);
        Self { data, crc32 }
    }

    /// CRC32 (IEEE) of the whole archive.
    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// CRC32 as 8 lower-case hex digits, as the device expects it.
    pub fn crc32_hex(&self) -> String {
        format!("{:08x}", self.crc32)
    }

    /// Split into upload chunks of `chunk_size` bytes.
    pub fn chunks(&self, chunk_size: usize) -> UploadChunks<'_> {
        UploadChunks::new(&self.data, chunk_size)
    }

    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One upload chunk with its 1-based sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub sequence: usize,
    pub data: &'a [u8],
}

/// Upload chunk iterator.
#[derive(Debug)]
pub struct UploadChunks<'a> {
    data: &'a [u8],
    chunk_size: usize,
    offset: usize,
    total_chunks: usize,
    current_chunk: usize,
}

impl<'a> UploadChunks<'a> {
    /// `chunk_size` must be non-zero.
    pub fn new(data: &'a [u8], chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self {
            data,
            chunk_size,
            offset: 0,
            total_chunks: data.len().div_ceil(chunk_size),
            current_chunk: 0,
        }
    }

    /// Total number of chunks.
    pub fn total(&self) -> usize {
        self.total_chunks
    }

    /// Remaining bytes.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }
}

impl<'a> Iterator for UploadChunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }

        let chunk_len = self.remaining().min(self.chunk_size);
        let data = &self.data[self.offset..self.offset + chunk_len];
        self.offset += chunk_len;
        self.current_chunk += 1;

        Some(Chunk {
            sequence: self.current_chunk,
            data,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total_chunks - self.current_chunk;
        (left, Some(left))
    }
}

impl ExactSizeIterator for UploadChunks<'_> {}
