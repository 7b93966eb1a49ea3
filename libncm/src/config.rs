/// Tunables of an [`NcmFile`](crate::NcmFile).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NcmOptions {
    /// Rewrites of containers up to this size are staged in memory, larger
    /// ones in an anonymous temporary file.
    pub max_memfile_size: u64,
    /// Chunk size for audio extraction and section copies
    pub copy_buffer_size: usize,
}

impl Default for NcmOptions {
    fn default() -> Self {
        NcmOptions {
            max_memfile_size: 8 * 1024 * 1024,
            copy_buffer_size: 64 * 1024,
        }
    }
}

impl NcmOptions {
    pub fn with_max_memfile_size(mut self, size: u64) -> Self {
        self.max_memfile_size = size;
        self
    }

    pub fn with_copy_buffer_size(mut self, size: usize) -> Self {
        self.copy_buffer_size = size.max(1);
        self
    }
}
