use std::fmt;
use std::sync::Arc;

use crate::error::{FormatError, Result};

/// Longest seed accepted by the key schedule
pub const MAX_SEED_LEN: usize = 256;

/// RC4-like stream cipher used for the audio payload of ncm files.
///
/// The key schedule is textbook RC4, but the keystream is a fixed 256 byte
/// table derived once from the permutation without the PRGA swap, so byte `n`
/// of the audio is always XORed with `key_box[n % 256]`.
#[derive(Clone, Default)]
pub struct StreamCipher {
    seed: Vec<u8>,
    key_box: Option<Arc<[u8; 256]>>,
    counter: usize,
}

impl StreamCipher {
    /// Derive the keystream table from a decrypted seed of 1 to 256 bytes.
    pub fn derive(seed: &[u8]) -> Result<Self> {
        if seed.is_empty() || seed.len() > MAX_SEED_LEN {
            return Err(FormatError::InvalidSeedLength(seed.len() as u32).into());
        }
        let key_box = generate_key_box(seed);
        Ok(StreamCipher {
            seed: seed.to_vec(),
            key_box: Some(Arc::new(key_box)),
            counter: 0,
        })
    }

    pub fn is_valid(&self) -> bool {
        !self.seed.is_empty() && self.key_box.is_some()
    }

    pub fn seed(&self) -> &[u8] {
        &self.seed
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    /// Align the keystream with an audio-relative offset before a read or write.
    pub fn reset_counter(&mut self, offset: usize) -> &mut Self {
        self.counter = offset;
        self
    }

    /// XOR a single byte with the keystream at `offset`. Self-inverse.
    ///
    /// An invalid engine leaves the byte untouched; callers check
    /// [`is_valid`](Self::is_valid) first.
    pub fn transform_byte(&self, byte: u8, offset: usize) -> u8 {
        match &self.key_box {
            Some(key_box) => byte ^ key_box[offset & 0xFF],
            None => byte,
        }
    }

    /// Transform `buf` in place starting at the running counter, then advance it.
    pub fn transform(&mut self, buf: &mut [u8]) -> &mut Self {
        if let Some(key_box) = &self.key_box {
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte ^= key_box[(self.counter + i) & 0xFF];
            }
        }
        self.counter += buf.len();
        self
    }
}

impl fmt::Debug for StreamCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCipher")
            .field("seed", &hex::encode(&self.seed))
            .field("valid", &self.is_valid())
            .field("counter", &self.counter)
            .finish()
    }
}

fn generate_key_box(key_data: &[u8]) -> [u8; 256] {
    let key_length = key_data.len();
    let mut key_box = [0u8; 256];
    for (i, slot) in key_box.iter_mut().enumerate() {
        *slot = i as u8;
    }

    let mut last_byte: u8 = 0;
    let mut key_offset: usize = 0;
    for i in 0..256 {
        let swap = key_box[i];
        let c = (swap as usize + last_byte as usize + key_data[key_offset] as usize) & 0xFF;
        key_offset += 1;
        if key_offset >= key_length {
            key_offset = 0;
        }
        key_box[i] = key_box[c];
        key_box[c] = swap;
        last_byte = c as u8;
    }

    // RC4 PRGA would swap key_box[j] and key_box[k] here; ncm does not
    let mut stream = [0u8; 256];
    for (i, slot) in stream.iter_mut().enumerate() {
        let j = (i + 1) & 0xFF;
        let k = (j + key_box[j] as usize) & 0xFF;
        *slot = key_box[(key_box[j] as usize + key_box[k] as usize) & 0xFF];
    }
    stream
}
