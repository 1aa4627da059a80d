//! Bounds-checked cursor over untrusted reply buffers
//!
//! Every read either returns the requested bytes or fails with
//! [`CodecError::Truncated`] without advancing the cursor. All multi-byte
//! integers are big-endian.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("reply too short: {len} bytes")]
    TooShort { len: usize },
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("unknown reply type: 0x{0:02X}")]
    UnknownReply(u8),
    #[error("XML error: {0}")]
    Xml(String),
}

/// Cursor over a byte slice
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the buffer
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Take the next `n` bytes
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let slice = self
            .pos
            .checked_add(n)
            .and_then(|end| self.buf.get(self.pos..end))
            .ok_or(CodecError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            })?;
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        self.take(n).map(|_| ())
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        self.read_array().map(u16::from_be_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.read_array().map(u32::from_be_bytes)
    }

    /// Read a 16-bit length followed by that many bytes
    pub fn read_prefixed(&mut self) -> Result<&'a [u8], CodecError> {
        let start = self.pos;
        let len = self.read_u16()? as usize;
        match self.take(len) {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                self.pos = start;
                Err(e)
            }
        }
    }

    /// Read a length-prefixed string, replacing invalid UTF-8
    pub fn read_prefixed_string(&mut self) -> Result<String, CodecError> {
        self.read_prefixed()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn skip_prefixed(&mut self) -> Result<(), CodecError> {
        self.read_prefixed().map(|_| ())
    }
}
