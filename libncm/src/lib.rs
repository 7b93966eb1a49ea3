//! Reading and in-place editing of NetEase Cloud Music `.ncm` containers.
//!
//! ```no_run
//! use libncm::{NcmFile, ParseTargets};
//!
//! let mut ncm = NcmFile::open("song.ncm")?;
//! ncm.parse(ParseTargets::all())?;
//! let head = ncm.read_audio(0, 4)?;
//! let path = ncm.save_raw_audio("out")?;
//! # Ok::<(), libncm::NcmError>(())
//! ```

pub mod cipher;
mod config;
mod error;
mod format;
mod meta;
mod ncm_file;
mod parser;
mod rewrite;

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

pub use crate::config::NcmOptions;
pub use crate::error::{FormatError, NcmError, ParseWarning, Result};
pub use crate::format::{ContainerHeader, ParseTargets, NCM_MAGIC, OVERWRITE_KEY, OVERWRITE_MARKER, OVERWRITE_MARKER_KEY};
pub use crate::meta::{MusicInfo, ParsedMetadata};
pub use crate::ncm_file::{NcmFile, Truncate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpTarget {
    All,
    Audio,
    Image,
    Meta,
}

impl DumpTarget {
    fn parse_targets(self) -> ParseTargets {
        match self {
            DumpTarget::All => ParseTargets::all(),
            // metadata carries the audio format hint
            DumpTarget::Audio => ParseTargets::AUDIO | ParseTargets::META,
            DumpTarget::Image => ParseTargets::ALBUM,
            DumpTarget::Meta => ParseTargets::META,
        }
    }
}

/// Extract `target` from the container at `file_path` into `output_dir`.
///
/// Returns the written files. A missing album image or unreadable metadata
/// is skipped, not an error.
pub fn dump<P: AsRef<Path>, Q: AsRef<Path>>(
    file_path: P,
    output_dir: Q,
    target: DumpTarget,
) -> Result<Vec<PathBuf>> {
    let output_dir = output_dir.as_ref();
    fs::create_dir_all(output_dir)?;

    // Open the .ncm file 打开 .ncm 文件
    let mut ncm = NcmFile::open(file_path)?;
    ncm.parse(target.parse_targets())?;

    let mut written = Vec::new();
    // Write the image data to a file 将图片数据写入文件
    if matches!(target, DumpTarget::All | DumpTarget::Image) {
        match ncm.save_album_image(output_dir)? {
            Some(path) => written.push(path),
            None => warn!("Skip album image of {}", ncm.path().display()),
        }
    }
    if matches!(target, DumpTarget::All | DumpTarget::Meta) {
        match ncm.save_metadata(output_dir)? {
            Some(path) => written.push(path),
            None => warn!("Skip meta info of {}", ncm.path().display()),
        }
    }
    if matches!(target, DumpTarget::All | DumpTarget::Audio) {
        written.push(ncm.save_raw_audio(output_dir)?);
    }
    debug!("Dumped {} file(s) from {}", written.len(), ncm.path().display());
    Ok(written)
}
