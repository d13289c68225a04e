use mcl_hw::{CmdDecodeError, CommandStream};

use crate::types::align_up_usize;

/// Indirect object heap holding cross-thread and per-thread payloads.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndirectHeap {
    buf: Vec<u8>,
}

impl IndirectHeap {
    pub const ALIGNMENT: usize = 64;

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Reserves `size` zeroed bytes at the next aligned offset.
    pub fn reserve(&mut self, size: usize) -> usize {
        let offset = align_up_usize(self.buf.len(), Self::ALIGNMENT);
        self.buf.resize(offset + size, 0);
        offset
    }

    pub fn bytes_at(&self, offset: usize, len: usize) -> Result<&[u8], CmdDecodeError> {
        offset
            .checked_add(len)
            .and_then(|end| self.buf.get(offset..end))
            .ok_or(CmdDecodeError::OutOfBounds {
                offset,
                len,
                stream_len: self.buf.len(),
            })
    }

    pub fn read_u32_at(&self, offset: usize) -> Result<u32, CmdDecodeError> {
        let b = self.bytes_at(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_at(&self, offset: usize) -> Result<u64, CmdDecodeError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.bytes_at(offset, 8)?);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn write_bytes_at(&mut self, offset: usize, bytes: &[u8]) {
        self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Everything a recorded command list writes into.
#[derive(Debug, Default, Clone)]
pub struct CommandContainer {
    pub stream: CommandStream,
    pub ioh: IndirectHeap,
}

impl CommandContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.stream.clear();
        self.ioh.clear();
    }
}
