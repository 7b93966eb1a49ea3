use std::io::{self, Read, Seek, SeekFrom};
use std::ops::{Deref, DerefMut};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, error, warn};

use crate::cipher::{self, guess_padding, StreamCipher, AES_BLOCK_SIZE, MAX_SEED_LEN};
use crate::error::{FormatError, ParseWarning, Result};
use crate::format::{seed_key, ContainerHeader, ParseTargets, NCM_MAGIC, SEED_TAG, SEED_XOR};
use crate::meta::{decode_meta_blob, ParsedMetadata};

/// Restores the cursor of a source when dropped, on every exit path.
///
/// If the saved cursor was inside the audio section and the section moved
/// (see [`SeekGuard::rebase`]), the cursor is restored to the same
/// audio-relative position in the new layout.
pub(crate) struct SeekGuard<'a, S: Seek> {
    source: &'a mut S,
    saved: u64,
    audio_offset: Option<u64>,
    rebased_audio_offset: Option<u64>,
}

impl<'a, S: Seek> SeekGuard<'a, S> {
    pub(crate) fn new(source: &'a mut S, audio_offset: Option<u64>) -> io::Result<Self> {
        let saved = source.stream_position()?;
        Ok(SeekGuard {
            source,
            saved,
            audio_offset,
            rebased_audio_offset: None,
        })
    }

    pub(crate) fn rebase(&mut self, new_audio_offset: u64) {
        self.rebased_audio_offset = Some(new_audio_offset);
    }

    fn restore_target(&self) -> u64 {
        match (self.audio_offset, self.rebased_audio_offset) {
            (Some(old), Some(new)) if self.saved >= old => new + (self.saved - old),
            _ => self.saved,
        }
    }
}

impl<S: Seek> Deref for SeekGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.source
    }
}

impl<S: Seek> DerefMut for SeekGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.source
    }
}

impl<S: Seek> Drop for SeekGuard<'_, S> {
    fn drop(&mut self) {
        let target = self.restore_target();
        if let Err(e) = self.source.seek(SeekFrom::Start(target)) {
            warn!("Failed to restore cursor to {}: {}", target, e);
        }
    }
}

/// Everything a parse pass learns about a container.
#[derive(Debug, Clone, Default)]
pub(crate) struct ParsedState {
    /// Set once a pass reached the audio section
    pub header: Option<ContainerHeader>,
    /// Sections whose contents were decrypted
    pub parsed: ParseTargets,
    pub cipher: StreamCipher,
    pub metadata: Option<ParsedMetadata>,
    pub album_image: Option<Vec<u8>>,
    pub warnings: Vec<ParseWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Seed,
    Metadata,
    AlbumImage,
    AudioOffset,
}

impl Phase {
    fn next(self) -> Option<Phase> {
        match self {
            Phase::Header => Some(Phase::Seed),
            Phase::Seed => Some(Phase::Metadata),
            Phase::Metadata => Some(Phase::AlbumImage),
            Phase::AlbumImage => Some(Phase::AudioOffset),
            Phase::AudioOffset => None,
        }
    }
}

/// Model under construction plus the sections this pass has to decrypt.
struct Draft<'n> {
    name: &'n Path,
    wanted: ParseTargets,
    header: ContainerHeader,
    state: ParsedState,
}

/// Walk the container once and return the updated state.
///
/// Sections already in `current.parsed` are skipped, so a pass with a
/// superset of earlier targets only decrypts what is new. `current` is never
/// touched: on error the caller keeps its previous state.
pub(crate) fn parse<S: Read + Seek>(
    source: &mut S,
    current: &ParsedState,
    targets: ParseTargets,
    name: &Path,
) -> Result<ParsedState> {
    let wanted = targets.difference(current.parsed);
    if wanted.is_empty() && current.header.is_some() {
        return Ok(current.clone());
    }
    debug!("Parse (targets={:?}) {}", wanted, name.display());

    let audio_offset = current.header.as_ref().map(|h| h.audio_content_offset);
    let mut guard = SeekGuard::new(source, audio_offset)?;
    let source = &mut *guard;

    let mut draft = Draft {
        name,
        wanted,
        header: ContainerHeader::default(),
        state: current.clone(),
    };
    let mut phase = Some(Phase::Header);
    while let Some(step) = phase {
        match step {
            Phase::Header => read_header(source, &mut draft)?,
            Phase::Seed => read_seed(source, &mut draft)?,
            Phase::Metadata => read_metadata(source, &mut draft)?,
            Phase::AlbumImage => read_album_image(source, &mut draft)?,
            Phase::AudioOffset => draft.header.audio_content_offset = source.stream_position()?,
        }
        phase = step.next();
    }

    let mut state = draft.state;
    state.header = Some(draft.header);
    state.parsed |= wanted;
    Ok(state)
}

fn read_header<S: Read + Seek>(source: &mut S, draft: &mut Draft<'_>) -> Result<()> {
    source.seek(SeekFrom::Start(0))?;
    let magic = source.read_u64::<LittleEndian>()?;
    if magic != NCM_MAGIC {
        error!("Unsupported format or corrupted file (magic number mismatch: {:#x}): {}", magic, draft.name.display());
        return Err(FormatError::MagicMismatch { found: magic }.into());
    }
    draft.header.magic = magic;
    source.read_exact(&mut draft.header.reserved_gap)?;
    Ok(())
}

fn read_seed<S: Read + Seek>(source: &mut S, draft: &mut Draft<'_>) -> Result<()> {
    let seed_len = source.read_u32::<LittleEndian>()?;
    draft.header.seed_len = seed_len;
    draft.header.seed_offset = source.stream_position()?;
    if !draft.wanted.contains(ParseTargets::AUDIO) {
        source.seek(SeekFrom::Current(seed_len as i64))?;
        return Ok(());
    }

    if seed_len == 0 || seed_len as usize > MAX_SEED_LEN || seed_len as usize % AES_BLOCK_SIZE != 0 {
        error!("Unsupported format or corrupted file (rc4 key length error): {}", draft.name.display());
        return Err(FormatError::InvalidSeedLength(seed_len).into());
    }
    let mut raw = vec![0u8; seed_len as usize];
    source.read_exact(&mut raw)?;
    for byte in &mut raw {
        *byte ^= SEED_XOR;
    }
    let decrypted = cipher::ecb_decrypt(&seed_key()?, &raw)?;
    if !decrypted.starts_with(SEED_TAG) {
        error!("Unsupported format or corrupted file (wrong rc4 key magic): {}", draft.name.display());
        return Err(FormatError::SeedTagMismatch.into());
    }
    let end = decrypted.len() - guess_padding(&decrypted);
    if end <= SEED_TAG.len() {
        return Err(FormatError::EmptySeed.into());
    }
    draft.state.cipher = StreamCipher::derive(&decrypted[SEED_TAG.len()..end])?;
    debug!("Derived audio keystream from a {} byte seed: {}", end - SEED_TAG.len(), draft.name.display());
    Ok(())
}

fn read_metadata<S: Read + Seek>(source: &mut S, draft: &mut Draft<'_>) -> Result<()> {
    let meta_len = source.read_u32::<LittleEndian>()?;
    draft.header.meta_len = meta_len;
    draft.header.meta_offset = source.stream_position()?;
    if !draft.wanted.contains(ParseTargets::META) {
        source.seek(SeekFrom::Current(meta_len as i64))?;
        return Ok(());
    }

    if meta_len == 0 {
        warn!("No meta data found in ncm file: {}", draft.name.display());
        draft.state.metadata = Some(ParsedMetadata::empty());
        draft.state.warnings.push(ParseWarning::EmptyMetadata);
        return Ok(());
    }
    let mut blob = vec![0u8; meta_len as usize];
    source.read_exact(&mut blob)?;
    let json = decode_meta_blob(blob).map_err(|e| {
        error!("Unsupported format or corrupted file ({}): {}", e, draft.name.display());
        e
    })?;
    let parsed = String::from_utf8(json)
        .map_err(|e| e.to_string())
        .and_then(ParsedMetadata::from_raw);
    match parsed {
        Ok(metadata) => draft.state.metadata = Some(metadata),
        Err(reason) => {
            warn!("Failed to parse meta info of ncm file {}: {}", draft.name.display(), reason);
            draft.state.metadata = None;
            draft.state.warnings.push(ParseWarning::UnparsableMetadata(reason));
        }
    }
    Ok(())
}

fn read_album_image<S: Read + Seek>(source: &mut S, draft: &mut Draft<'_>) -> Result<()> {
    source.read_exact(&mut draft.header.reserved_tail)?;
    let sizes = [
        source.read_u32::<LittleEndian>()?,
        source.read_u32::<LittleEndian>()?,
    ];
    draft.header.album_image_size = sizes;
    draft.header.album_image_offset = source.stream_position()?;
    if !draft.wanted.contains(ParseTargets::ALBUM) {
        // skip distance comes from the first copy of the size
        source.seek(SeekFrom::Current(sizes[0] as i64))?;
        return Ok(());
    }

    if sizes[1] == 0 {
        warn!("No album image found in ncm file: {}", draft.name.display());
        draft.state.album_image = None;
        draft.state.warnings.push(ParseWarning::NoAlbumImage);
        return Ok(());
    }
    let mut image = vec![0u8; sizes[1] as usize];
    source.read_exact(&mut image)?;
    draft.state.album_image = Some(image);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn seek_guard_restores_cursor() {
        let mut cursor = Cursor::new(vec![0u8; 64]);
        cursor.set_position(7);
        {
            let mut guard = SeekGuard::new(&mut cursor, None).unwrap();
            guard.seek(SeekFrom::Start(40)).unwrap();
        }
        assert_eq!(cursor.position(), 7);
    }

    #[test]
    fn seek_guard_restores_on_error_path() {
        fn fails(cursor: &mut Cursor<Vec<u8>>) -> io::Result<()> {
            let mut guard = SeekGuard::new(cursor, None)?;
            guard.seek(SeekFrom::Start(60))?;
            let mut buf = [0u8; 16];
            guard.read_exact(&mut buf)
        }
        let mut cursor = Cursor::new(vec![0u8; 64]);
        cursor.set_position(3);
        assert!(fails(&mut cursor).is_err());
        assert_eq!(cursor.position(), 3);
    }

    #[test]
    fn seek_guard_rebases_audio_positions() {
        let mut cursor = Cursor::new(vec![0u8; 128]);
        cursor.set_position(50);
        {
            let mut guard = SeekGuard::new(&mut cursor, Some(40)).unwrap();
            guard.rebase(60);
        }
        assert_eq!(cursor.position(), 70);

        // a cursor in front of the audio section stays where it was
        cursor.set_position(10);
        {
            let mut guard = SeekGuard::new(&mut cursor, Some(40)).unwrap();
            guard.rebase(60);
        }
        assert_eq!(cursor.position(), 10);
    }

    #[test]
    fn phases_run_in_container_order() {
        let mut order = vec![Phase::Header];
        while let Some(next) = order.last().and_then(|p| p.next()) {
            order.push(next);
        }
        assert_eq!(
            order,
            [Phase::Header, Phase::Seed, Phase::Metadata, Phase::AlbumImage, Phase::AudioOffset]
        );
    }

    #[test]
    fn garbage_is_rejected_without_touching_state() {
        let mut cursor = Cursor::new(b"NOTANCMFILE.....".to_vec());
        let current = ParsedState::default();
        let result = parse(&mut cursor, &current, ParseTargets::all(), Path::new("garbage"));
        assert!(matches!(
            result,
            Err(crate::NcmError::Format(FormatError::MagicMismatch { .. }))
        ));
        assert!(current.header.is_none());
        assert_eq!(cursor.position(), 0);
    }
}
