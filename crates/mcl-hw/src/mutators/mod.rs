//! In-place mutators for commands that were already recorded into a [`CommandStream`].
//!
//! A mutator remembers where its command lives and keeps a shadow of the last programmed command
//! bytes. `noop` zeroes the command in the stream; `restore` writes the shadow back, including any
//! field that was programmed while the command was nooped.

mod compute_walker;
mod load_register_imm;
mod pipe_control;
mod semaphore_wait;
mod store_data_imm;
mod store_register_mem;

pub use compute_walker::MutableComputeWalker;
pub use load_register_imm::MutableLoadRegisterImm;
pub use pipe_control::MutablePipeControl;
pub use semaphore_wait::{MutableSemaphoreWait, SemaphoreWaitKind};
pub use store_data_imm::MutableStoreDataImm;
pub use store_register_mem::MutableStoreRegisterMem;

use crate::cmd::CmdDecodeError;
use crate::stream::CommandStream;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CommandShadow {
    offset: usize,
    bytes: Vec<u8>,
    nooped: bool,
}

impl CommandShadow {
    fn capture(stream: &CommandStream, offset: usize, size: usize) -> Result<Self, CmdDecodeError> {
        Ok(Self {
            offset,
            bytes: stream.bytes_at(offset, size)?.to_vec(),
            nooped: false,
        })
    }

    fn write_bytes(&mut self, stream: &mut CommandStream, field: usize, bytes: &[u8]) {
        self.bytes[field..field + bytes.len()].copy_from_slice(bytes);
        if !self.nooped {
            stream.write_bytes_at(self.offset + field, bytes);
        }
    }

    fn write_u32(&mut self, stream: &mut CommandStream, field: usize, v: u32) {
        self.write_bytes(stream, field, &v.to_le_bytes());
    }

    fn write_u64(&mut self, stream: &mut CommandStream, field: usize, v: u64) {
        self.write_bytes(stream, field, &v.to_le_bytes());
    }

    fn read_u32(&self, field: usize) -> u32 {
        let b = &self.bytes[field..field + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    fn read_u64(&self, field: usize) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.bytes[field..field + 8]);
        u64::from_le_bytes(raw)
    }

    fn noop(&mut self, stream: &mut CommandStream) {
        stream.fill_zero(self.offset, self.bytes.len());
        self.nooped = true;
    }

    fn restore(&mut self, stream: &mut CommandStream) {
        stream.write_bytes_at(self.offset, &self.bytes);
        self.nooped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_programmed_while_nooped_land_on_restore() {
        let mut cs = CommandStream::new();
        let at = cs.append_load_register_imm(0x2600, 1);
        let mut shadow = CommandShadow::capture(&cs, at, 16).unwrap();

        shadow.noop(&mut cs);
        shadow.write_u32(&mut cs, 12, 9);
        assert_eq!(cs.as_bytes(), &[0u8; 16]);

        shadow.restore(&mut cs);
        assert_eq!(cs.read_u32_at(at + 12).unwrap(), 9);
        assert!(!shadow.nooped);
    }
}
