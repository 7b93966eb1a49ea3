use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::cipher::StreamCipher;
use crate::config::NcmOptions;
use crate::error::{NcmError, ParseWarning, Result};
use crate::format::{ContainerHeader, ParseTargets};
use crate::meta::ParsedMetadata;
use crate::parser::{self, ParsedState, SeekGuard};

/// Sources whose length can be changed in place, needed for rewrites.
pub trait Truncate {
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// Push written data down to the storage
    fn sync_all(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Truncate for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn sync_all(&mut self) -> io::Result<()> {
        File::sync_all(self)
    }
}

impl Truncate for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

/// An ncm container.
///
/// Nothing is read until [`parse`](NcmFile::parse) is called. Once the audio
/// section has been located the handle also works as a plain [`Read`] +
/// [`Seek`] (+ [`Write`]) stream over the decrypted audio: positions are
/// relative to the start of the audio and bytes are transformed on the fly.
#[derive(Debug)]
pub struct NcmFile<S = File> {
    pub(crate) source: S,
    pub(crate) path: PathBuf,
    pub(crate) options: NcmOptions,
    pub(crate) state: ParsedState,
}

impl NcmFile<File> {
    /// Open a container read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Open {}", path.display());
        Ok(NcmFile::from_source(File::open(path)?, path))
    }

    /// Open a container for reading and in-place rewriting.
    pub fn open_rw<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Open {} for writing", path.display());
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(NcmFile::from_source(file, path))
    }
}

impl<S> NcmFile<S> {
    /// Wrap any source. `path` names the container in logs and output files.
    pub fn from_source<P: Into<PathBuf>>(source: S, path: P) -> Self {
        NcmFile {
            source,
            path: path.into(),
            options: NcmOptions::default(),
            state: ParsedState::default(),
        }
    }

    pub fn with_options(mut self, options: NcmOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &NcmOptions {
        &self.options
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Field values and offsets, once a parse pass succeeded
    pub fn header(&self) -> Option<&ContainerHeader> {
        self.state.header.as_ref()
    }

    /// Sections decrypted so far
    pub fn parsed_targets(&self) -> ParseTargets {
        self.state.parsed
    }

    pub fn metadata(&self) -> Option<&ParsedMetadata> {
        self.state.metadata.as_ref()
    }

    pub fn album_image(&self) -> Option<&[u8]> {
        self.state.album_image.as_deref()
    }

    pub fn warnings(&self) -> &[ParseWarning] {
        &self.state.warnings
    }

    pub fn cipher(&self) -> &StreamCipher {
        &self.state.cipher
    }

    /// Physical offset of the first audio byte
    pub fn audio_offset(&self) -> Result<u64> {
        self.state
            .header
            .as_ref()
            .map(|header| header.audio_content_offset)
            .ok_or(NcmError::AudioOffsetUnknown)
    }

    pub fn get_ref(&self) -> &S {
        &self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    fn check_decryptor(&self) -> Result<u64> {
        let audio_offset = self.audio_offset()?;
        if !self.state.cipher.is_valid() {
            return Err(NcmError::InvalidDecryptor);
        }
        Ok(audio_offset)
    }
}

impl<S: Read + Seek> NcmFile<S> {
    /// Walk the container and decrypt the requested sections.
    ///
    /// Sections decrypted by an earlier call are not read again. On error the
    /// handle keeps the state of the last successful pass.
    pub fn parse(&mut self, targets: ParseTargets) -> Result<&mut Self> {
        self.state = parser::parse(&mut self.source, &self.state, targets, &self.path)?;
        Ok(self)
    }

    /// Length of the audio payload
    pub fn audio_len(&mut self) -> Result<u64> {
        let audio_offset = self.audio_offset()?;
        let mut guard = SeekGuard::new(&mut self.source, Some(audio_offset))?;
        let end = guard.seek(SeekFrom::End(0))?;
        Ok(end.saturating_sub(audio_offset))
    }

    /// Decrypt up to `len` audio bytes starting at audio-relative `offset`.
    ///
    /// The cursor of the handle is left where it was. Fewer bytes are
    /// returned at the end of the payload.
    pub fn read_audio(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let audio_offset = self.check_decryptor()?;
        let mut guard = SeekGuard::new(&mut self.source, Some(audio_offset))?;
        let start = audio_offset.checked_add(offset).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "audio offset out of range")
        })?;
        let end = guard.seek(SeekFrom::End(0))?;
        let len = (len as u64).min(end.saturating_sub(start));
        guard.seek(SeekFrom::Start(start))?;
        let mut buf = Vec::with_capacity(len as usize);
        (&mut *guard).take(len).read_to_end(&mut buf)?;
        self.state.cipher.reset_counter(offset as usize).transform(&mut buf);
        Ok(buf)
    }

    /// Decrypt the whole payload to `<stem>.<ext>` inside `dest_dir`.
    ///
    /// The extension is the metadata format hint when there is one, otherwise
    /// it is guessed from the first decrypted bytes.
    pub fn save_raw_audio<P: AsRef<Path>>(&mut self, dest_dir: P) -> Result<PathBuf> {
        self.parse(ParseTargets::AUDIO | ParseTargets::META)?;
        let audio_offset = self.check_decryptor()?;
        let chunk_size = self.options.copy_buffer_size.max(1);
        let hint = self
            .state
            .metadata
            .as_ref()
            .and_then(ParsedMetadata::format)
            .filter(|format| !format.is_empty() && format.chars().all(|c| c.is_ascii_alphanumeric()));

        let mut guard = SeekGuard::new(&mut self.source, Some(audio_offset))?;
        guard.seek(SeekFrom::Start(audio_offset))?;
        let mut chunk = vec![0u8; chunk_size];
        let mut filled = read_full(&mut *guard, &mut chunk)?;
        let cipher = &mut self.state.cipher;
        cipher.reset_counter(0).transform(&mut chunk[..filled]);

        let ext = match hint {
            Some(format) => format,
            None => sniff_audio_ext(&chunk[..filled]).to_owned(),
        };
        let output = output_path(&self.path, dest_dir.as_ref(), &ext);
        debug!("Write audio of {} to {}", self.path.display(), output.display());

        // Decrypt the audio data and write to a file 解密音频数据并写入文件
        let mut writer = BufWriter::new(File::create(&output)?);
        while filled > 0 {
            writer.write_all(&chunk[..filled])?;
            filled = guard.read(&mut chunk)?;
            cipher.transform(&mut chunk[..filled]);
        }
        writer.flush()?;
        Ok(output)
    }

    /// Write the album image to `<stem>.png` or `<stem>.jpg` inside `dest_dir`.
    ///
    /// Returns `None` when the container has no album image.
    pub fn save_album_image<P: AsRef<Path>>(&mut self, dest_dir: P) -> Result<Option<PathBuf>> {
        self.parse(ParseTargets::ALBUM)?;
        let image = match &self.state.album_image {
            Some(image) => image,
            None => return Ok(None),
        };
        let output = output_path(&self.path, dest_dir.as_ref(), sniff_image_ext(image));
        debug!("Write album image of {} to {}", self.path.display(), output.display());
        File::create(&output)?.write_all(image)?;
        Ok(Some(output))
    }

    /// Write the merged metadata as pretty JSON to `<stem>.json` inside `dest_dir`.
    ///
    /// Returns `None` when the metadata could not be parsed.
    pub fn save_metadata<P: AsRef<Path>>(&mut self, dest_dir: P) -> Result<Option<PathBuf>> {
        self.parse(ParseTargets::META)?;
        let metadata = match &self.state.metadata {
            Some(metadata) => metadata,
            None => return Ok(None),
        };
        let output = output_path(&self.path, dest_dir.as_ref(), "json");
        debug!("Write metadata of {} to {}", self.path.display(), output.display());
        let mut writer = BufWriter::new(File::create(&output)?);
        serde_json::to_writer_pretty(&mut writer, &metadata.merged()).map_err(io::Error::from)?;
        writer.flush()?;
        Ok(Some(output))
    }

    /// Cursor of the underlying source, relative to the audio payload.
    /// A cursor in front of the payload counts as 0.
    fn audio_position(&mut self) -> Result<u64> {
        let audio_offset = self.audio_offset()?;
        Ok(self.source.stream_position()?.saturating_sub(audio_offset))
    }
}

impl<S: Read + Write + Seek + Truncate> NcmFile<S> {
    /// Cut or extend the audio payload to `len` bytes.
    pub fn set_audio_len(&mut self, len: u64) -> Result<()> {
        let audio_offset = self.audio_offset()?;
        self.source.set_len(audio_offset + len)?;
        Ok(())
    }
}

impl<S: Read + Seek> Read for NcmFile<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let audio_offset = self.check_decryptor()?;
        let mut position = self.source.stream_position()?;
        if position < audio_offset {
            position = self.source.seek(SeekFrom::Start(audio_offset))?;
        }
        let n = self.source.read(buf)?;
        self.state
            .cipher
            .reset_counter((position - audio_offset) as usize)
            .transform(&mut buf[..n]);
        Ok(n)
    }
}

impl<S: Read + Seek> Seek for NcmFile<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let audio_offset = self.audio_offset()?;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => offset_by(self.audio_len()?, delta),
            SeekFrom::Current(delta) => offset_by(self.audio_position()?, delta),
        };
        let physical = target.and_then(|t| t.checked_add(audio_offset)).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "invalid seek to a negative or overflowing position")
        })?;
        self.source.seek(SeekFrom::Start(physical))?;
        Ok(physical - audio_offset)
    }
}

impl<S: Read + Write + Seek> Write for NcmFile<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let audio_offset = self.check_decryptor()?;
        let position = self.source.stream_position()?;
        if position < audio_offset {
            return Err(NcmError::ReadOnlyRegion { position, audio_offset }.into());
        }
        let mut encrypted = buf.to_vec();
        self.state
            .cipher
            .reset_counter((position - audio_offset) as usize)
            .transform(&mut encrypted);
        self.source.write(&encrypted)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.source.flush()
    }
}

/// `<stem>.<ext>` inside `dest_dir`
fn output_path(source: &Path, dest_dir: &Path, ext: &str) -> PathBuf {
    let mut name: OsString = source.file_stem().map(Into::into).unwrap_or_else(|| "ncm".into());
    name.push(".");
    name.push(ext);
    dest_dir.join(name)
}

fn offset_by(base: u64, delta: i64) -> Option<u64> {
    if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub(delta.unsigned_abs())
    }
}

/// Read until `buf` is full or the source is exhausted.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn sniff_audio_ext(head: &[u8]) -> &'static str {
    match head {
        [b'f', b'L', b'a', b'C', ..] => "flac",
        [b'I', b'D', b'3', ..] => "mp3",
        // MPEG audio frame sync
        [0xFF, second, ..] if second & 0xE0 == 0xE0 => "mp3",
        _ => "unknown",
    }
}

fn sniff_image_ext(image: &[u8]) -> &'static str {
    match image {
        [0xFF, 0xD8, 0xFF, ..] => "jpg",
        _ => "png",
    }
}
