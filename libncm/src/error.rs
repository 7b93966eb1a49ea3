use std::io;

use thiserror::Error;

use crate::cipher::ContextState;

/// Result type for libncm operations
pub type Result<T, E = NcmError> = std::result::Result<T, E>;

/// Errors returned by the container parser, the ciphers and the rewriter.
#[derive(Debug, Error)]
pub enum NcmError {
    /// The file is not an NCM container or one of its sections is corrupted
    #[error("unsupported format or corrupted file ({0})")]
    Format(#[from] FormatError),

    #[error("cipher runtime error because of [{reason}] (context state: {state:?})")]
    Crypto {
        reason: &'static str,
        state: ContextState,
    },

    #[error("invalid AES key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),

    #[error("invalid key material: {0}")]
    KeyMaterial(#[from] hex::FromHexError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The audio section was never reached by a parse pass
    #[error("audio content offset is unknown, the container has not been parsed")]
    AudioOffsetUnknown,

    #[error("audio decryptor is not initialised")]
    InvalidDecryptor,

    #[error("metadata is not available for this container")]
    MetadataUnavailable,

    #[error("modification before the audio content is not supported (position {position}, audio starts at {audio_offset})")]
    ReadOnlyRegion { position: u64, audio_offset: u64 },
}

/// Format violations found while walking the container layout.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("magic number mismatch: 0x{found:016X}")]
    MagicMismatch { found: u64 },

    #[error("rc4 seed length error: {0}")]
    InvalidSeedLength(u32),

    #[error("wrong rc4 seed magic")]
    SeedTagMismatch,

    #[error("rc4 seed is empty after removing tag and padding")]
    EmptySeed,

    #[error("wrong meta info hint")]
    MetaHintMismatch,

    #[error("wrong meta info schema")]
    MetaSchemaMismatch,

    #[error("meta info is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("ciphertext of {0} bytes is not block aligned")]
    UnalignedCiphertext(usize),
}

/// Non-fatal findings of a parse pass. They never prevent audio decryption.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseWarning {
    #[error("no meta data found in ncm file")]
    EmptyMetadata,

    #[error("failed to parse meta info: {0}")]
    UnparsableMetadata(String),

    #[error("no album image found in ncm file")]
    NoAlbumImage,
}

impl NcmError {
    pub(crate) fn crypto(reason: &'static str, state: ContextState) -> Self {
        NcmError::Crypto { reason, state }
    }
}

impl From<NcmError> for io::Error {
    fn from(err: NcmError) -> Self {
        match err {
            NcmError::Io(e) => e,
            NcmError::Format(_) => io::Error::new(io::ErrorKind::InvalidData, err),
            NcmError::ReadOnlyRegion { .. } => io::Error::new(io::ErrorKind::PermissionDenied, err),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
