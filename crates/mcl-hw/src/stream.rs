//! Little-endian command stream buffer.
//!
//! Recording appends commands and returns their offsets; mutators later patch fields at
//! `offset + field_offset`. Patch offsets always come from an earlier append, so out-of-range
//! writes are a logic error and panic like slice indexing does.

use crate::cmd::{
    CmdDecodeError, CmdHdr, CmdIter, CmdOpcode, LoadRegisterImmCmd, PipeControlCmd,
    SemaphoreWaitCmd, StoreDataImmCmd, StoreRegisterMemCmd,
};
use crate::family::{GpuFamily, WalkerInit};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandStream {
    buf: Vec<u8>,
}

impl CommandStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn iter_commands(&self) -> CmdIter<'_> {
        CmdIter::new(&self.buf)
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
        let b = self.bytes_at(offset, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn write_bytes_at(&mut self, offset: usize, bytes: &[u8]) {
        self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn write_u32_at(&mut self, offset: usize, v: u32) {
        self.write_bytes_at(offset, &v.to_le_bytes());
    }

    pub fn write_u64_at(&mut self, offset: usize, v: u64) {
        self.write_bytes_at(offset, &v.to_le_bytes());
    }

    pub fn fill_zero(&mut self, offset: usize, len: usize) {
        self.buf[offset..offset + len].fill(0);
    }

    /// Appends raw bytes and returns the offset they start at.
    pub fn append_raw(&mut self, bytes: &[u8]) -> usize {
        let offset = self.buf.len();
        self.buf.extend_from_slice(bytes);
        offset
    }

    pub fn append_semaphore_wait(&mut self, address: u64, data: u32, compare_op: u32) -> usize {
        let cmd = SemaphoreWaitCmd {
            hdr: CmdHdr::new(CmdOpcode::SemaphoreWait, SemaphoreWaitCmd::SIZE_BYTES),
            semaphore_data: data,
            compare_op,
            semaphore_address: address,
        };
        self.append_raw(bytemuck::bytes_of(&cmd))
    }

    pub fn append_store_data_imm(&mut self, address: u64, data: u64) -> usize {
        let cmd = StoreDataImmCmd {
            hdr: CmdHdr::new(CmdOpcode::StoreDataImm, StoreDataImmCmd::SIZE_BYTES),
            address,
            data_dword0: data as u32,
            data_dword1: (data >> 32) as u32,
        };
        self.append_raw(bytemuck::bytes_of(&cmd))
    }

    pub fn append_store_register_mem(&mut self, register_address: u32, memory_address: u64) -> usize {
        let cmd = StoreRegisterMemCmd {
            hdr: CmdHdr::new(CmdOpcode::StoreRegisterMem, StoreRegisterMemCmd::SIZE_BYTES),
            register_address,
            reserved0: 0,
            memory_address,
        };
        self.append_raw(bytemuck::bytes_of(&cmd))
    }

    pub fn append_load_register_imm(&mut self, register_offset: u32, data: u32) -> usize {
        let cmd = LoadRegisterImmCmd {
            hdr: CmdHdr::new(CmdOpcode::LoadRegisterImm, LoadRegisterImmCmd::SIZE_BYTES),
            register_offset,
            data,
        };
        self.append_raw(bytemuck::bytes_of(&cmd))
    }

    pub fn append_pipe_control(&mut self, flags: u32, post_sync_address: u64, immediate_data: u64) -> usize {
        let cmd = PipeControlCmd {
            hdr: CmdHdr::new(CmdOpcode::PipeControl, PipeControlCmd::SIZE_BYTES),
            flags,
            reserved0: 0,
            post_sync_address,
            immediate_data,
        };
        self.append_raw(bytemuck::bytes_of(&cmd))
    }

    pub fn append_walker(&mut self, family: &dyn GpuFamily, init: &WalkerInit) -> usize {
        let bytes = family.encode_walker(init);
        self.append_raw(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::{GpuFamily, XE_HPC};

    #[test]
    fn appended_commands_decode_in_order() {
        let mut cs = CommandStream::new();
        let sem = cs.append_semaphore_wait(0x1000, 1, SemaphoreWaitCmd::COMPARE_SAD_NOT_EQUAL_SDD);
        let sdi = cs.append_store_data_imm(0x2000, 0x1_0000_0002);
        let walker = cs.append_walker(&XE_HPC, &WalkerInit::default());

        assert_eq!(sem, 0);
        assert_eq!(sdi, SemaphoreWaitCmd::SIZE_BYTES);
        assert_eq!(walker, sdi + StoreDataImmCmd::SIZE_BYTES);

        let opcodes: Vec<_> = cs
            .iter_commands()
            .map(|p| p.map(|p| p.opcode))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            opcodes,
            vec![CmdOpcode::SemaphoreWait, CmdOpcode::StoreDataImm, CmdOpcode::ComputeWalker]
        );
        assert_eq!(cs.len(), walker + XE_HPC.walker().size_bytes);
    }

    #[test]
    fn store_data_imm_splits_qword_payload() {
        let mut cs = CommandStream::new();
        let at = cs.append_store_data_imm(0, 0xaaaa_bbbb_cccc_dddd);
        let layout = XE_HPC.store_data_imm();
        assert_eq!(cs.read_u32_at(at + layout.data_dword0).unwrap(), 0xcccc_dddd);
        assert_eq!(cs.read_u32_at(at + layout.data_dword1).unwrap(), 0xaaaa_bbbb);
    }

    #[test]
    fn reads_past_end_are_errors() {
        let cs = CommandStream::new();
        assert!(matches!(
            cs.read_u64_at(0),
            Err(CmdDecodeError::OutOfBounds { stream_len: 0, .. })
        ));
    }
}
