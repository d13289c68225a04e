//! Command layouts shared by the supported GPU families.
//!
//! Every command starts with a [`CmdHdr`]. A zeroed dword decodes as a one-dword `Noop`, which is
//! what a neutralized (nooped) command looks like in the stream.

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

pub type GpuAddress = u64;

/// Size of a bare `Noop` dword. Zeroed command bytes decode as a run of these.
pub const NOOP_SIZE_BYTES: usize = 4;

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmdOpcode {
    Noop = 0,
    SemaphoreWait = 0x1c,
    StoreDataImm = 0x20,
    LoadRegisterImm = 0x22,
    StoreRegisterMem = 0x24,
    GpgpuWalker = 0x7105,
    ComputeWalker = 0x7202,
    PipeControl = 0x7a00,
}

impl CmdOpcode {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Noop),
            0x1c => Some(Self::SemaphoreWait),
            0x20 => Some(Self::StoreDataImm),
            0x22 => Some(Self::LoadRegisterImm),
            0x24 => Some(Self::StoreRegisterMem),
            0x7105 => Some(Self::GpgpuWalker),
            0x7202 => Some(Self::ComputeWalker),
            0x7a00 => Some(Self::PipeControl),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdHdr {
    pub opcode: u32,
    pub size_bytes: u32,
}

impl CmdHdr {
    pub const SIZE_BYTES: usize = 8;

    pub fn new(opcode: CmdOpcode, size_bytes: usize) -> Self {
        Self {
            opcode: opcode as u32,
            size_bytes: size_bytes as u32,
        }
    }
}

/// `MI_SEMAPHORE_WAIT`: polls `semaphore_address` until the compare against `semaphore_data`
/// passes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct SemaphoreWaitCmd {
    pub hdr: CmdHdr,
    pub semaphore_data: u32,
    pub compare_op: u32,
    pub semaphore_address: u64,
}

impl SemaphoreWaitCmd {
    pub const SIZE_BYTES: usize = 24;
    /// `*address >= data`
    pub const COMPARE_SAD_GREATER_THAN_OR_EQUAL_SDD: u32 = 1;
    /// `*address != data`
    pub const COMPARE_SAD_NOT_EQUAL_SDD: u32 = 5;
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct StoreDataImmCmd {
    pub hdr: CmdHdr,
    pub address: u64,
    pub data_dword0: u32,
    pub data_dword1: u32,
}

impl StoreDataImmCmd {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct StoreRegisterMemCmd {
    pub hdr: CmdHdr,
    pub register_address: u32,
    pub reserved0: u32,
    pub memory_address: u64,
}

impl StoreRegisterMemCmd {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct LoadRegisterImmCmd {
    pub hdr: CmdHdr,
    pub register_offset: u32,
    pub data: u32,
}

impl LoadRegisterImmCmd {
    pub const SIZE_BYTES: usize = 16;
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct PipeControlCmd {
    pub hdr: CmdHdr,
    pub flags: u32,
    pub reserved0: u32,
    pub post_sync_address: u64,
    pub immediate_data: u64,
}

impl PipeControlCmd {
    pub const SIZE_BYTES: usize = 32;
    pub const FLAG_POST_SYNC_WRITE_IMMEDIATE: u32 = 1 << 14;
    pub const FLAG_DC_FLUSH: u32 = 1 << 5;
}

/// Dispatch command of the Gen12LP family. It has no inline data window and no hardware local ID
/// generation.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct GpgpuWalkerGen12LpCmd {
    pub hdr: CmdHdr,
    pub kernel_start_pointer: u64,
    pub indirect_data_start_address: u32,
    pub indirect_data_length: u32,
    pub thread_group_id_x_dimension: u32,
    pub thread_group_id_y_dimension: u32,
    pub thread_group_id_z_dimension: u32,
    pub threads_per_thread_group: u32,
    pub execution_mask: u32,
    pub shared_local_memory_size: u32,
}

impl GpgpuWalkerGen12LpCmd {
    pub const SIZE_BYTES: usize = 48;
}

pub const XE_HPC_INLINE_DATA_DWORDS: usize = 16;

/// Dispatch command of the XeHPC family, including its trailing inline data window.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ComputeWalkerXeHpcCmd {
    pub hdr: CmdHdr,
    pub kernel_start_pointer: u64,
    pub indirect_data_start_address: u32,
    pub indirect_data_length: u32,
    pub thread_group_id_x_dimension: u32,
    pub thread_group_id_y_dimension: u32,
    pub thread_group_id_z_dimension: u32,
    pub local_x_maximum: u32,
    pub local_y_maximum: u32,
    pub local_z_maximum: u32,
    pub emit_local_id: u32,
    pub generate_local_id: u32,
    pub walk_order: u32,
    pub threads_per_thread_group: u32,
    pub execution_mask: u32,
    pub shared_local_memory_size: u32,
    pub post_sync_address: u64,
    pub post_sync_immediate_data: u64,
    pub inline_data: [u32; XE_HPC_INLINE_DATA_DWORDS],
}

impl ComputeWalkerXeHpcCmd {
    pub const SIZE_BYTES: usize = 152;
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CmdDecodeError {
    #[error("read out of bounds: offset={offset} len={len} stream_len={stream_len}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        stream_len: usize,
    },

    #[error("unknown opcode 0x{opcode:x} at offset {offset}")]
    UnknownOpcode { opcode: u32, offset: usize },

    #[error("command at offset {offset} has invalid size_bytes {size_bytes}")]
    BadSizeBytes { offset: usize, size_bytes: u32 },
}

/// One decoded command header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdPacket {
    pub offset: usize,
    pub opcode: CmdOpcode,
    pub size_bytes: usize,
}

/// Walks the commands of a stream. Zeroed dwords are reported as one-dword `Noop` packets.
#[derive(Debug, Clone)]
pub struct CmdIter<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> CmdIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            failed: false,
        }
    }

    fn read_u32(&self, at: usize) -> Result<u32, CmdDecodeError> {
        let end = at.checked_add(4).ok_or(CmdDecodeError::OutOfBounds {
            offset: at,
            len: 4,
            stream_len: self.buf.len(),
        })?;
        let bytes = self.buf.get(at..end).ok_or(CmdDecodeError::OutOfBounds {
            offset: at,
            len: 4,
            stream_len: self.buf.len(),
        })?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn decode_next(&mut self) -> Result<CmdPacket, CmdDecodeError> {
        let offset = self.offset;
        let raw_opcode = self.read_u32(offset)?;
        let opcode = CmdOpcode::from_u32(raw_opcode).ok_or(CmdDecodeError::UnknownOpcode {
            opcode: raw_opcode,
            offset,
        })?;
        if opcode == CmdOpcode::Noop {
            return Ok(CmdPacket {
                offset,
                opcode,
                size_bytes: NOOP_SIZE_BYTES,
            });
        }

        let size_bytes = self.read_u32(offset + 4)?;
        let size = size_bytes as usize;
        if size < CmdHdr::SIZE_BYTES || size % 4 != 0 {
            return Err(CmdDecodeError::BadSizeBytes { offset, size_bytes });
        }
        match offset.checked_add(size) {
            Some(end) if end <= self.buf.len() => Ok(CmdPacket {
                offset,
                opcode,
                size_bytes: size,
            }),
            _ => Err(CmdDecodeError::OutOfBounds {
                offset,
                len: size,
                stream_len: self.buf.len(),
            }),
        }
    }
}

impl Iterator for CmdIter<'_> {
    type Item = Result<CmdPacket, CmdDecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        match self.decode_next() {
            Ok(packet) => {
                self.offset = packet.offset + packet.size_bytes;
                Some(Ok(packet))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn command_sizes_match_declared_constants() {
        assert_eq!(size_of::<CmdHdr>(), CmdHdr::SIZE_BYTES);
        assert_eq!(size_of::<SemaphoreWaitCmd>(), SemaphoreWaitCmd::SIZE_BYTES);
        assert_eq!(size_of::<StoreDataImmCmd>(), StoreDataImmCmd::SIZE_BYTES);
        assert_eq!(size_of::<StoreRegisterMemCmd>(), StoreRegisterMemCmd::SIZE_BYTES);
        assert_eq!(size_of::<LoadRegisterImmCmd>(), LoadRegisterImmCmd::SIZE_BYTES);
        assert_eq!(size_of::<PipeControlCmd>(), PipeControlCmd::SIZE_BYTES);
        assert_eq!(size_of::<GpgpuWalkerGen12LpCmd>(), GpgpuWalkerGen12LpCmd::SIZE_BYTES);
        assert_eq!(size_of::<ComputeWalkerXeHpcCmd>(), ComputeWalkerXeHpcCmd::SIZE_BYTES);
    }

    #[test]
    fn opcode_round_trips_through_u32() {
        for op in [
            CmdOpcode::Noop,
            CmdOpcode::SemaphoreWait,
            CmdOpcode::StoreDataImm,
            CmdOpcode::LoadRegisterImm,
            CmdOpcode::StoreRegisterMem,
            CmdOpcode::GpgpuWalker,
            CmdOpcode::ComputeWalker,
            CmdOpcode::PipeControl,
        ] {
            assert_eq!(CmdOpcode::from_u32(op as u32), Some(op));
        }
        assert_eq!(CmdOpcode::from_u32(0xdead), None);
    }

    #[test]
    fn iter_reports_zeroed_bytes_as_noop_dwords() {
        let mut buf = Vec::new();
        let lri = LoadRegisterImmCmd {
            hdr: CmdHdr::new(CmdOpcode::LoadRegisterImm, LoadRegisterImmCmd::SIZE_BYTES),
            register_offset: 0x2600,
            data: 7,
        };
        buf.extend_from_slice(bytemuck::bytes_of(&lri));
        buf.extend_from_slice(&[0u8; 8]);

        let packets: Vec<_> = CmdIter::new(&buf).collect::<Result<_, _>>().unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].opcode, CmdOpcode::LoadRegisterImm);
        assert_eq!(packets[1].opcode, CmdOpcode::Noop);
        assert_eq!(packets[2].offset, LoadRegisterImmCmd::SIZE_BYTES + 4);
    }

    #[test]
    fn iter_stops_on_truncated_command() {
        let hdr = CmdHdr::new(CmdOpcode::PipeControl, PipeControlCmd::SIZE_BYTES);
        let buf = bytemuck::bytes_of(&hdr).to_vec();
        let mut iter = CmdIter::new(&buf);
        assert!(matches!(
            iter.next(),
            Some(Err(CmdDecodeError::OutOfBounds { offset: 0, .. }))
        ));
        assert!(iter.next().is_none());
    }
}
