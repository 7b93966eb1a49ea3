//! Block alignment helpers and the trailing padding guess used for the seed
//! and metadata sections.

/// AES block size in bytes
pub const AES_BLOCK_SIZE: usize = 16;

/// Smallest multiple of [`AES_BLOCK_SIZE`] strictly greater than `len`.
///
/// An already aligned length grows by a whole block, which is exactly the
/// room PKCS#7 padding needs.
pub fn aligned(len: usize) -> usize {
    (len | (AES_BLOCK_SIZE - 1)) + 1
}

/// Guess the length of PKCS#7-like padding at the end of `buffer`.
///
/// Returns the value `v` of the last byte when the last `v` bytes all equal
/// `v`, otherwise 0. Nothing else is verified: a plaintext that happens to end
/// in `0x01` loses its last byte.
pub fn guess_padding(buffer: &[u8]) -> usize {
    let last = match buffer.last() {
        Some(&b) => b as usize,
        None => return 0,
    };
    if last == 0 || last > buffer.len() {
        return 0;
    }
    if buffer[buffer.len() - last..].iter().all(|&b| b as usize == last) {
        last
    } else {
        0
    }
}
