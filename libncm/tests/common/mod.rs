#![allow(dead_code)]

use base64::prelude::*;
use libncm::cipher::{ecb_encrypt, StreamCipher};
use libncm::NCM_MAGIC;

pub const SEED_KEY: &[u8; 16] = b"hzHRAmso5kInbaxW";
pub const META_KEY: &[u8; 16] = b"#14ljk_!\\]&0U<'(";

pub const SEED: &[u8] = b"123456789012345";
pub const VENDOR_JSON: &str = r#"{"musicId":1859245776,"musicName":"Test Song","artist":[["Someone",12345]],"albumId":135000000,"album":"Test Album","albumPicDocId":"109951166","albumPic":"https://p1.music.126.net/x.jpg","bitrate":999000,"mp3DocId":"abc","duration":180000,"mvId":0,"alias":[],"transNames":["Translated"],"format":"flac","flag":4}"#;
pub const COVER: &[u8] = b"\x89PNG\r\n\x1a\nnot really a png";

pub fn pkcs7(mut data: Vec<u8>) -> Vec<u8> {
    let pad = 16 - data.len() % 16;
    data.resize(data.len() + pad, pad as u8);
    data
}

/// Seed field as stored in a container
pub fn seed_section(seed: &[u8]) -> Vec<u8> {
    let mut plain = b"neteasecloudmusic".to_vec();
    plain.extend_from_slice(seed);
    let mut section = ecb_encrypt(SEED_KEY, &pkcs7(plain)).unwrap();
    for byte in &mut section {
        *byte ^= 0x64;
    }
    section
}

/// Metadata field as stored in a container
pub fn meta_section(json: &str) -> Vec<u8> {
    meta_section_bytes(json.as_bytes())
}

/// Metadata field around arbitrary, possibly ill-formed, JSON bytes
pub fn meta_section_bytes(json: &[u8]) -> Vec<u8> {
    let mut plain = b"music:".to_vec();
    plain.extend_from_slice(json);
    let encrypted = ecb_encrypt(META_KEY, &pkcs7(plain)).unwrap();
    let mut section = b"163 key(Don't modify):".to_vec();
    section.extend_from_slice(BASE64_STANDARD.encode(encrypted).as_bytes());
    for byte in &mut section {
        *byte ^= 0x63;
    }
    section
}

pub fn encrypt_audio(seed: &[u8], plain: &[u8]) -> Vec<u8> {
    let mut encrypted = plain.to_vec();
    StreamCipher::derive(seed).unwrap().transform(&mut encrypted);
    encrypted
}

/// A FLAC-looking payload long enough to span several keystream periods
pub fn sample_audio() -> Vec<u8> {
    let mut audio = b"fLaC".to_vec();
    audio.extend((0..1500u32).map(|i| (i * 31 % 251) as u8));
    audio
}

/// Assembles synthetic containers field by field.
pub struct ContainerBuilder {
    seed_section: Vec<u8>,
    meta_section: Vec<u8>,
    image: Vec<u8>,
    image_sizes: Option<[u32; 2]>,
    audio: Vec<u8>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        ContainerBuilder {
            seed_section: seed_section(SEED),
            meta_section: meta_section(VENDOR_JSON),
            image: COVER.to_vec(),
            image_sizes: None,
            audio: encrypt_audio(SEED, &sample_audio()),
        }
    }

    pub fn seed_section(mut self, section: Vec<u8>) -> Self {
        self.seed_section = section;
        self
    }

    pub fn meta_json(mut self, json: &str) -> Self {
        self.meta_section = meta_section(json);
        self
    }

    pub fn meta_bytes(mut self, json: &[u8]) -> Self {
        self.meta_section = meta_section_bytes(json);
        self
    }

    pub fn no_meta(mut self) -> Self {
        self.meta_section.clear();
        self
    }

    pub fn image(mut self, image: &[u8]) -> Self {
        self.image = image.to_vec();
        self
    }

    /// Write these values into the two image size fields instead of the image length
    pub fn image_sizes(mut self, skip: u32, read: u32) -> Self {
        self.image_sizes = Some([skip, read]);
        self
    }

    /// Plain audio, encrypted with [`SEED`]
    pub fn audio(mut self, plain: &[u8]) -> Self {
        self.audio = encrypt_audio(SEED, plain);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = NCM_MAGIC.to_le_bytes().to_vec();
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&(self.seed_section.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.seed_section);
        out.extend_from_slice(&(self.meta_section.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.meta_section);
        out.extend_from_slice(&[0; 5]);
        let len = self.image.len() as u32;
        for size in self.image_sizes.unwrap_or([len, len]) {
            out.extend_from_slice(&size.to_le_bytes());
        }
        out.extend_from_slice(&self.image);
        out.extend_from_slice(&self.audio);
        out
    }

    /// Offset of the audio payload in [`build`](Self::build)'s output
    pub fn audio_offset(&self) -> u64 {
        (8 + 2 + 4 + self.seed_section.len() + 4 + self.meta_section.len() + 5 + 8 + self.image.len()) as u64
    }
}
