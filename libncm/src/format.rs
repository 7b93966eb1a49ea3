//! Layout of an ncm container (all integers little-endian):
//!
//! ```text
//! u64 magic                  "CTENFDAM"
//! u8[2] reserved
//! u32 seed_len; u8[seed_len]  XOR 0x64, AES-ECB -> "neteasecloudmusic" + seed + padding
//! u32 meta_len; u8[meta_len]  XOR 0x63, "163 key(Don't modify):" + base64(AES-ECB("music:" + json + padding))
//! u8[5] reserved
//! u32 image_size; u32 image_size; u8[image_size]   raw album art
//! u8[*]                       audio, encrypted with the stream cipher
//! ```

use hex::FromHex;

use crate::error::Result;

/// "CTENFDAM" read as a little-endian u64
pub const NCM_MAGIC: u64 = 0x4d41_4446_4e45_5443;

const SEED_KEY: &str = "687A4852416D736F356B496E62617857";
const META_KEY: &str = "2331346C6A6B5F215C5D2630553C2728";

pub const SEED_XOR: u8 = 0x64;
pub const META_XOR: u8 = 0x63;

pub const SEED_TAG: &[u8] = b"neteasecloudmusic";
pub const META_HINT: &[u8] = b"163 key(Don't modify):";
pub const META_SCHEMA: &[u8] = b"music:";

/// JSON key holding user edits layered over the vendor metadata
pub const OVERWRITE_KEY: &str = "overwrite";
/// Marker written inside the overwrite object
pub const OVERWRITE_MARKER_KEY: &str = "ncmRewriter";
pub const OVERWRITE_MARKER: &str = concat!("libncm ", env!("CARGO_PKG_VERSION"));

pub const LEN_FIELD_SIZE: u64 = 4;
pub const IMAGE_SIZE_FIELDS_LEN: u64 = 8;

/// Key protecting the stream cipher seed
pub fn seed_key() -> Result<[u8; 16]> {
    Ok(<[u8; 16]>::from_hex(SEED_KEY)?)
}

/// Key protecting the metadata blob
pub fn meta_key() -> Result<[u8; 16]> {
    Ok(<[u8; 16]>::from_hex(META_KEY)?)
}

bitflags::bitflags! {
    /// Sections a parse pass has to decrypt. Everything else is only skipped.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ParseTargets: u16 {
        const META = 0b001;
        const ALBUM = 0b010;
        const AUDIO = 0b100;
    }
}

impl Default for ParseTargets {
    fn default() -> Self {
        ParseTargets::empty()
    }
}

/// Field values and byte offsets recorded while walking the container.
///
/// A header only exists once a parse pass reached the audio section, so all
/// offsets are valid; the decrypted contents of sections are tracked
/// separately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerHeader {
    pub magic: u64,
    pub reserved_gap: [u8; 2],
    /// length of the seed field, tag and padding included
    pub seed_len: u32,
    pub seed_offset: u64,
    pub meta_len: u32,
    pub meta_offset: u64,
    pub reserved_tail: [u8; 5],
    /// Two copies of the image size. Observed to be equal; the second one
    /// decides how many bytes are read, the first how many are skipped.
    pub album_image_size: [u32; 2],
    pub album_image_offset: u64,
    pub audio_content_offset: u64,
}

impl ContainerHeader {
    /// Offset of the u32 metadata length field
    pub fn meta_len_field_offset(&self) -> u64 {
        self.meta_offset - LEN_FIELD_SIZE
    }

    /// Offset of the first of the two image size fields
    pub fn image_size_fields_offset(&self) -> u64 {
        self.album_image_offset - IMAGE_SIZE_FIELDS_LEN
    }

    /// Shift everything after the metadata section once its length changed.
    pub(crate) fn relocate_meta(&mut self, new_meta_len: u32) {
        let old_end = self.meta_offset + self.meta_len as u64;
        let new_end = self.meta_offset + new_meta_len as u64;
        self.meta_len = new_meta_len;
        self.album_image_offset = self.album_image_offset - old_end + new_end;
        self.audio_content_offset = self.audio_content_offset - old_end + new_end;
    }

    /// Record a new album image of `size` bytes.
    pub(crate) fn relocate_album_image(&mut self, size: u32) {
        self.album_image_size = [size, size];
        self.audio_content_offset = self.album_image_offset + size as u64;
    }
}
