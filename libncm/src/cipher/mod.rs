mod aes;
mod padding;
mod rc4;

pub use self::aes::{AesContext, ChainMode, ContextState, Output};
pub use self::padding::{aligned, guess_padding, AES_BLOCK_SIZE};
pub use self::rc4::{StreamCipher, MAX_SEED_LEN};

use crate::error::{FormatError, Result};

/// AES-ECB decrypt a whole section, leaving any padding in place.
pub fn ecb_decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(FormatError::UnalignedCiphertext(data.len()).into());
    }
    let mut out = Vec::new();
    AesContext::with_key(key)?
        .set_chain_mode(ChainMode::Ecb)
        .set_input(data)
        .set_output(Output::Growable(&mut out))
        .decrypt_all()?;
    Ok(out)
}

/// AES-ECB encrypt an already padded buffer.
pub fn ecb_encrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    AesContext::with_key(key)?
        .set_chain_mode(ChainMode::Ecb)
        .set_input(data)
        .set_output(Output::Growable(&mut out))
        .encrypt_all()?;
    Ok(out)
}
