//! Chunked AES engine shared by the seed, metadata and rewrite paths.
//!
//! A context is configured builder-style, then driven either in one call
//! (`decrypt_all`/`encrypt_all`) or chunk by chunk. It walks
//! `Idle -> Prepared -> Done`; the block mode instance only exists while the
//! context is `Prepared` and is dropped by [`AesContext::finish`].
//!
//! Padding is never handled here: input must add up to whole blocks and
//! callers strip or add padding themselves.

use aes::cipher::consts::U16;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockCipher, BlockDecrypt, BlockEncrypt, NewBlockCipher};
use aes::{Aes128, Aes192, Aes256};
use block_modes::block_padding::NoPadding;
use block_modes::{BlockMode, Cbc, Ecb};

use super::padding::{aligned, AES_BLOCK_SIZE};
use crate::error::{NcmError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainMode {
    Ecb,
    Cbc,
}

/// Lifecycle of an [`AesContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Idle,
    Prepared,
    Done,
}

/// Where a context writes its result.
pub enum Output<'a> {
    /// Caller-sized buffer; running out of room is an error.
    Fixed(&'a mut [u8]),
    /// Appended to, grown before every chunk and shrunk to the produced size after it.
    Growable(&'a mut Vec<u8>),
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Encrypt,
    Decrypt,
}

enum Mode<C: BlockCipher + BlockEncrypt + BlockDecrypt> {
    Ecb(Ecb<C, NoPadding>),
    Cbc(Cbc<C, NoPadding>),
}

impl<C> Mode<C>
where
    C: BlockCipher<BlockSize = U16> + BlockEncrypt + BlockDecrypt + NewBlockCipher,
{
    fn new(key: &[u8], chain_mode: ChainMode, iv: &[u8; AES_BLOCK_SIZE]) -> Option<Self> {
        match chain_mode {
            ChainMode::Ecb => Ecb::<C, NoPadding>::new_from_slices(key, &[]).ok().map(Mode::Ecb),
            ChainMode::Cbc => Cbc::<C, NoPadding>::new_from_slices(key, iv).ok().map(Mode::Cbc),
        }
    }

    fn apply(&mut self, op: Op, data: &mut [u8]) {
        for chunk in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            let block: &mut GenericArray<u8, U16> = GenericArray::from_mut_slice(chunk);
            let blocks = std::slice::from_mut(block);
            match (&mut *self, op) {
                (Mode::Ecb(m), Op::Encrypt) => m.encrypt_blocks(blocks),
                (Mode::Ecb(m), Op::Decrypt) => m.decrypt_blocks(blocks),
                (Mode::Cbc(m), Op::Encrypt) => m.encrypt_blocks(blocks),
                (Mode::Cbc(m), Op::Decrypt) => m.decrypt_blocks(blocks),
            }
        }
    }
}

/// The key size is only known at runtime, everything else is shared.
enum Engine {
    Aes128(Mode<Aes128>),
    Aes192(Mode<Aes192>),
    Aes256(Mode<Aes256>),
}

impl Engine {
    fn new(key: &[u8], chain_mode: ChainMode, iv: &[u8; AES_BLOCK_SIZE]) -> Option<Self> {
        match key.len() {
            16 => Mode::new(key, chain_mode, iv).map(Engine::Aes128),
            24 => Mode::new(key, chain_mode, iv).map(Engine::Aes192),
            32 => Mode::new(key, chain_mode, iv).map(Engine::Aes256),
            _ => None,
        }
    }

    fn apply(&mut self, op: Op, data: &mut [u8]) {
        match self {
            Engine::Aes128(m) => m.apply(op, data),
            Engine::Aes192(m) => m.apply(op, data),
            Engine::Aes256(m) => m.apply(op, data),
        }
    }
}

pub struct AesContext<'a> {
    key: Vec<u8>,
    chain_mode: ChainMode,
    iv: [u8; AES_BLOCK_SIZE],
    engine: Option<Engine>,
    input: Option<&'a [u8]>,
    output: Option<Output<'a>>,
    input_head: usize,
    output_head: usize,
    // bytes of an incomplete block waiting for the next chunk
    carry: Vec<u8>,
    last_chunk_size: usize,
    state: ContextState,
    finished_inputted: usize,
    finished_outputted: usize,
}

impl<'a> AesContext<'a> {
    /// Create a context for AES-128/192/256, chosen by the key length.
    pub fn with_key(key: &[u8]) -> Result<Self> {
        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(NcmError::InvalidKeyLength(key.len()));
        }
        Ok(AesContext {
            key: key.to_vec(),
            chain_mode: ChainMode::Ecb,
            iv: [0; AES_BLOCK_SIZE],
            engine: None,
            input: None,
            output: None,
            input_head: 0,
            output_head: 0,
            carry: Vec::with_capacity(AES_BLOCK_SIZE),
            last_chunk_size: 0,
            state: ContextState::Idle,
            finished_inputted: 0,
            finished_outputted: 0,
        })
    }

    pub fn set_chain_mode(&mut self, mode: ChainMode) -> &mut Self {
        self.chain_mode = mode;
        self
    }

    /// IV for CBC, zero unless set. Ignored by ECB.
    pub fn set_iv(&mut self, iv: [u8; AES_BLOCK_SIZE]) -> &mut Self {
        self.iv = iv;
        self
    }

    pub fn set_input(&mut self, input: &'a [u8]) -> &mut Self {
        self.input = Some(input);
        self.input_head = 0;
        if let Some(Output::Growable(vec)) = &mut self.output {
            vec.reserve(aligned(input.len()));
        }
        self
    }

    pub fn set_output(&mut self, mut output: Output<'a>) -> &mut Self {
        if let (Output::Growable(vec), Some(input)) = (&mut output, self.input) {
            vec.reserve(aligned(input.len()));
        }
        self.output = Some(output);
        self.output_head = 0;
        self
    }

    pub fn decrypt_all(&mut self) -> Result<&mut Self> {
        self.run_all(Op::Decrypt)
    }

    pub fn encrypt_all(&mut self) -> Result<&mut Self> {
        self.run_all(Op::Encrypt)
    }

    /// Decrypt at most `chunk_size` more bytes of input.
    pub fn decrypt_chunk(&mut self, chunk_size: usize) -> Result<&mut Self> {
        self.chunk_op(Op::Decrypt, chunk_size)
    }

    /// Encrypt at most `chunk_size` more bytes of input.
    pub fn encrypt_chunk(&mut self, chunk_size: usize) -> Result<&mut Self> {
        self.chunk_op(Op::Encrypt, chunk_size)
    }

    /// Repeat the previous chunk size.
    pub fn decrypt_next(&mut self) -> Result<&mut Self> {
        self.ensure_in_progress("can't repeat decryption")?;
        self.chunk_op(Op::Decrypt, self.last_chunk_size)
    }

    pub fn encrypt_next(&mut self) -> Result<&mut Self> {
        self.ensure_in_progress("can't repeat encryption")?;
        self.chunk_op(Op::Encrypt, self.last_chunk_size)
    }

    /// Release the block mode, freeze the byte counts and make the context inert.
    ///
    /// Fails if a partial block is left over, after finishing anyway.
    pub fn finish(&mut self) -> Result<&mut Self> {
        if self.state == ContextState::Done {
            return Ok(self);
        }
        self.finished_inputted = self.inputted_len();
        self.finished_outputted = self.outputted_len();
        self.state = ContextState::Done;
        self.engine = None;
        self.input = None;
        self.output = None;
        self.input_head = 0;
        self.output_head = 0;
        self.last_chunk_size = 0;

        if !self.carry.is_empty() {
            self.carry.clear();
            return Err(NcmError::crypto("input not block aligned", self.state));
        }
        Ok(self)
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn chain_mode(&self) -> ChainMode {
        self.chain_mode
    }

    pub fn is_done(&self) -> bool {
        self.state == ContextState::Done
    }

    pub fn key_bit_len(&self) -> usize {
        self.key.len() * 8
    }

    pub fn inputted_len(&self) -> usize {
        if self.is_done() {
            self.finished_inputted
        } else {
            self.input_head
        }
    }

    pub fn input_remain(&self) -> usize {
        match (self.state, self.input) {
            (ContextState::Done, _) | (_, None) => 0,
            (_, Some(input)) => input.len() - self.input_head,
        }
    }

    pub fn outputted_len(&self) -> usize {
        if self.is_done() {
            self.finished_outputted
        } else {
            self.output_head
        }
    }

    pub fn output_remain(&self) -> usize {
        if self.is_done() {
            return 0;
        }
        match &self.output {
            Some(Output::Fixed(buf)) => buf.len() - self.output_head,
            // growable buffers are always shrunk to the produced size
            Some(Output::Growable(_)) | None => 0,
        }
    }

    fn ensure_in_progress(&self, reason: &'static str) -> Result<()> {
        if self.state != ContextState::Prepared {
            return Err(NcmError::crypto(reason, self.state));
        }
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        match self.input {
            Some(input) if !input.is_empty() => {}
            _ => return Err(NcmError::crypto("input buffer not set", self.state)),
        }
        match &self.output {
            None => return Err(NcmError::crypto("output buffer not set", self.state)),
            Some(Output::Fixed(buf)) if buf.is_empty() => {
                return Err(NcmError::crypto("output buffer not set", self.state))
            }
            _ => {}
        }
        self.engine = Engine::new(&self.key, self.chain_mode, &self.iv);
        if self.engine.is_none() {
            return Err(NcmError::crypto("cipher initialisation failed", self.state));
        }
        self.state = ContextState::Prepared;
        Ok(())
    }

    fn run_all(&mut self, op: Op) -> Result<&mut Self> {
        if self.is_done() {
            return Err(NcmError::crypto("context finished", self.state));
        }
        while !self.is_done() {
            let remain = self.input_remain();
            self.chunk_op(op, remain)?;
        }
        Ok(self)
    }

    fn chunk_op(&mut self, op: Op, chunk_size: usize) -> Result<&mut Self> {
        if self.is_done() {
            return Err(NcmError::crypto("context finished", self.state));
        }
        if self.state == ContextState::Idle {
            self.prepare()?;
        }
        let input = match self.input {
            Some(input) => input,
            None => return Err(NcmError::crypto("input buffer not set", self.state)),
        };
        let take = chunk_size.min(input.len() - self.input_head);
        let produced = (self.carry.len() + take) / AES_BLOCK_SIZE * AES_BLOCK_SIZE;

        if let Some(Output::Fixed(buf)) = &self.output {
            if buf.len() - self.output_head < produced {
                return Err(NcmError::crypto("output buffer too small", self.state));
            }
        }

        let mut data = std::mem::take(&mut self.carry);
        data.extend_from_slice(&input[self.input_head..self.input_head + take]);
        self.carry = data.split_off(produced);

        if let Some(engine) = &mut self.engine {
            engine.apply(op, &mut data);
        }

        match &mut self.output {
            Some(Output::Fixed(buf)) => {
                buf[self.output_head..self.output_head + produced].copy_from_slice(&data);
            }
            Some(Output::Growable(vec)) => {
                // the block mode can't tell the output size up front, so grow
                // by the aligned chunk and cut back to what was produced
                let start = vec.len();
                vec.resize(start + aligned(take), 0);
                vec[start..start + produced].copy_from_slice(&data);
                vec.truncate(start + produced);
            }
            None => return Err(NcmError::crypto("output buffer not set", self.state)),
        }

        self.input_head += take;
        self.output_head += produced;
        self.last_chunk_size = chunk_size;

        if self.input_remain() == 0 {
            self.finish()?;
        }
        Ok(self)
    }
}
