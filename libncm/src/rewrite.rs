use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use log::debug;
use serde_json::{Map, Value};

use crate::config::NcmOptions;
use crate::error::{NcmError, Result};
use crate::format::{ContainerHeader, ParseTargets};
use crate::meta::{encode_meta_blob, ParsedMetadata};
use crate::ncm_file::{NcmFile, Truncate};
use crate::parser::SeekGuard;

/// Staging area for the rebuilt container.
enum Scratch {
    Memory(Cursor<Vec<u8>>),
    Disk(File),
}

impl Scratch {
    fn for_size(size: u64, options: &NcmOptions) -> io::Result<Self> {
        if size <= options.max_memfile_size {
            Ok(Scratch::Memory(Cursor::new(Vec::with_capacity(size as usize))))
        } else {
            Ok(Scratch::Disk(tempfile::tempfile()?))
        }
    }
}

impl Read for Scratch {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Scratch::Memory(cursor) => cursor.read(buf),
            Scratch::Disk(file) => file.read(buf),
        }
    }
}

impl Write for Scratch {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Scratch::Memory(cursor) => cursor.write(buf),
            Scratch::Disk(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Scratch::Memory(cursor) => cursor.flush(),
            Scratch::Disk(file) => file.flush(),
        }
    }
}

impl Seek for Scratch {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Scratch::Memory(cursor) => cursor.seek(pos),
            Scratch::Disk(file) => file.seek(pos),
        }
    }
}

impl<S: Read + Write + Seek + Truncate> NcmFile<S> {
    /// Replace the `overwrite` object of the metadata and rewrite the section.
    ///
    /// The vendor JSON text is kept as it is apart from the `overwrite` key.
    /// Metadata must have been parsed. The audio payload is left untouched.
    pub fn overwrite_meta(&mut self, overwrite: &Map<String, Value>) -> Result<&mut Self> {
        let header = self.state.header.clone().ok_or(NcmError::AudioOffsetUnknown)?;
        if !self.state.parsed.contains(ParseTargets::META) {
            return Err(NcmError::MetadataUnavailable);
        }
        let metadata = self.state.metadata.as_ref().ok_or(NcmError::MetadataUnavailable)?;
        let json = metadata.to_json_with_overwrite(overwrite)?;
        let blob = encode_meta_blob(&json)?;
        let blob_len = u32::try_from(blob.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "metadata section too large"))?;

        let mut section = Vec::with_capacity(blob.len() + 4);
        section.write_u32::<LittleEndian>(blob_len)?;
        section.extend_from_slice(&blob);

        let mut relocated = header.clone();
        relocated.relocate_meta(blob_len);
        debug!(
            "Rewrite meta info of {} ({} -> {} bytes)",
            self.path.display(),
            header.meta_len,
            blob_len
        );
        self.replace_section(
            header.meta_len_field_offset(),
            header.meta_offset + header.meta_len as u64,
            &section,
            &relocated,
        )?;

        self.state.metadata = Some(ParsedMetadata::from_raw(json).map_err(|_| NcmError::MetadataUnavailable)?);
        self.state.header = Some(relocated);
        Ok(self)
    }

    /// Replace the album image, or remove it with `None`.
    ///
    /// Both size fields are written with the new size. The audio payload is
    /// left untouched.
    pub fn reset_album_image(&mut self, image: Option<&[u8]>) -> Result<&mut Self> {
        let header = self.state.header.clone().ok_or(NcmError::AudioOffsetUnknown)?;
        let image = image.unwrap_or_default();
        let size = u32::try_from(image.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "album image too large"))?;

        let mut section = Vec::with_capacity(image.len() + 8);
        section.write_u32::<LittleEndian>(size)?;
        section.write_u32::<LittleEndian>(size)?;
        section.extend_from_slice(image);

        let mut relocated = header.clone();
        relocated.relocate_album_image(size);
        debug!(
            "Rewrite album image of {} ({} -> {} bytes)",
            self.path.display(),
            header.audio_content_offset - header.album_image_offset,
            size
        );
        self.replace_section(
            header.image_size_fields_offset(),
            header.audio_content_offset,
            &section,
            &relocated,
        )?;

        self.state.album_image = (!image.is_empty()).then(|| image.to_vec());
        self.state.parsed |= ParseTargets::ALBUM;
        self.state.header = Some(relocated);
        Ok(self)
    }

    /// Swap the bytes in `start..end` for `replacement`.
    ///
    /// The new container is assembled in scratch storage first; the source is
    /// only written once the scratch copy is complete.
    fn replace_section(
        &mut self,
        start: u64,
        end: u64,
        replacement: &[u8],
        relocated: &ContainerHeader,
    ) -> Result<()> {
        let chunk_size = self.options.copy_buffer_size.max(1);
        let audio_offset = self.state.header.as_ref().map(|h| h.audio_content_offset);
        let mut guard = SeekGuard::new(&mut self.source, audio_offset)?;

        let total = guard.seek(SeekFrom::End(0))?;
        let new_total = total - (end - start) + replacement.len() as u64;
        let mut scratch = Scratch::for_size(new_total, &self.options)?;

        guard.seek(SeekFrom::Start(0))?;
        let copied = copy_chunked(&mut (&mut *guard).take(start), &mut scratch, chunk_size)?;
        if copied != start {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "container ends before the rewritten section").into());
        }
        scratch.write_all(replacement)?;
        guard.seek(SeekFrom::Start(end))?;
        copy_chunked(&mut *guard, &mut scratch, chunk_size)?;
        scratch.flush()?;

        // no way back from here: the source is replaced by the scratch copy
        scratch.seek(SeekFrom::Start(0))?;
        guard.seek(SeekFrom::Start(0))?;
        guard.set_len(0)?;
        let written = copy_chunked(&mut scratch, &mut *guard, chunk_size)?;
        guard.flush()?;
        guard.sync_all()?;
        debug!("Committed {} bytes (was {})", written, total);

        guard.rebase(relocated.audio_content_offset);
        Ok(())
    }
}

fn copy_chunked<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
) -> io::Result<u64> {
    let mut buf = vec![0u8; chunk_size];
    let mut copied = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(copied),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        copied += n as u64;
    }
}
