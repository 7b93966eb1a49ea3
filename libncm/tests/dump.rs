mod common;

use std::fs;

use common::*;
use libncm::{dump, DumpTarget, NcmFile, NcmOptions, ParseTargets};
use serde_json::{json, Value};

#[test]
fn dump_all_writes_every_section() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("Someone - Test Song.ncm");
    fs::write(&input, ContainerBuilder::new().build()).unwrap();
    let output_dir = dir.path().join("out");

    let written = dump(&input, &output_dir, DumpTarget::All).unwrap();
    assert_eq!(
        written,
        vec![
            output_dir.join("Someone - Test Song.png"),
            output_dir.join("Someone - Test Song.json"),
            output_dir.join("Someone - Test Song.flac"),
        ]
    );
    assert_eq!(fs::read(&written[0]).unwrap(), COVER);
    let meta: Value = serde_json::from_slice(&fs::read(&written[1]).unwrap()).unwrap();
    assert_eq!(meta["musicName"], json!("Test Song"));
    assert_eq!(fs::read(&written[2]).unwrap(), sample_audio());
}

#[test]
fn dump_audio_only() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("song.ncm");
    fs::write(&input, ContainerBuilder::new().build()).unwrap();

    let written = dump(&input, dir.path(), DumpTarget::Audio).unwrap();
    assert_eq!(written, vec![dir.path().join("song.flac")]);
    assert!(!dir.path().join("song.png").exists());
}

#[test]
fn dump_rejects_other_files() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("song.mp3");
    fs::write(&input, b"ID3\x04\x00\x00 not an ncm container").unwrap();
    assert!(dump(&input, dir.path(), DumpTarget::All).is_err());
}

#[test]
fn audio_extension_is_sniffed_without_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let mut audio = b"ID3\x04\x00".to_vec();
    audio.extend(std::iter::repeat(0x55).take(300));
    let bytes = ContainerBuilder::new().no_meta().audio(&audio).build();
    let input = dir.path().join("no meta.ncm");
    fs::write(&input, bytes).unwrap();

    let options = NcmOptions::default().with_copy_buffer_size(7);
    let mut ncm = NcmFile::open(&input).unwrap().with_options(options);
    ncm.parse(ParseTargets::all()).unwrap();
    let path = ncm.save_raw_audio(dir.path()).unwrap();
    assert_eq!(path, dir.path().join("no meta.mp3"));
    assert_eq!(fs::read(path).unwrap(), audio);
}

#[test]
fn unknown_audio_gets_a_neutral_extension() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = ContainerBuilder::new().no_meta().audio(b"RIFF....WAVE").build();
    let input = dir.path().join("odd.ncm");
    fs::write(&input, bytes).unwrap();

    let mut ncm = NcmFile::open(&input).unwrap();
    let path = ncm.save_raw_audio(dir.path()).unwrap();
    assert_eq!(path, dir.path().join("odd.unknown"));
}

#[test]
fn rewrite_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("song.ncm");
    fs::write(&input, ContainerBuilder::new().build()).unwrap();

    {
        let mut ncm = NcmFile::open_rw(&input).unwrap();
        ncm.parse(ParseTargets::META).unwrap();
        let mut overwrite = serde_json::Map::new();
        overwrite.insert("musicName".to_owned(), json!("On Disk"));
        ncm.overwrite_meta(&overwrite).unwrap();
        ncm.reset_album_image(Some(b"\xFF\xD8\xFF\xDBjpeg")).unwrap();
    }

    let written = dump(&input, dir.path(), DumpTarget::All).unwrap();
    assert_eq!(written[0], dir.path().join("song.jpg"));
    let meta: Value = serde_json::from_slice(&fs::read(&written[1]).unwrap()).unwrap();
    assert_eq!(meta["musicName"], json!("On Disk"));
    assert_eq!(meta["album"], json!("Test Album"));
    assert_eq!(fs::read(&written[2]).unwrap(), sample_audio());
}

#[test]
fn read_only_handle_can_not_be_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("song.ncm");
    let original = ContainerBuilder::new().build();
    fs::write(&input, &original).unwrap();

    let mut ncm = NcmFile::open(&input).unwrap();
    ncm.parse(ParseTargets::all()).unwrap();
    assert!(ncm.reset_album_image(None).is_err());
    drop(ncm);
    assert_eq!(fs::read(&input).unwrap(), original);
}

#[test]
fn audio_extension_follows_the_format_hint() {
    let dir = tempfile::tempdir().unwrap();
    let json = VENDOR_JSON.replace(r#""format":"flac""#, r#""format":"mp3""#);
    let input = dir.path().join("hinted.ncm");
    fs::write(&input, ContainerBuilder::new().meta_json(&json).build()).unwrap();

    // no META pass beforehand, the payload itself still looks like FLAC
    let mut ncm = NcmFile::open(&input).unwrap();
    ncm.parse(ParseTargets::AUDIO).unwrap();
    let path = ncm.save_raw_audio(dir.path()).unwrap();
    assert_eq!(path, dir.path().join("hinted.mp3"));
    assert!(ncm.parsed_targets().contains(ParseTargets::META));
}
