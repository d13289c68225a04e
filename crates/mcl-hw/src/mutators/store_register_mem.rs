use super::CommandShadow;
use crate::cmd::{CmdDecodeError, GpuAddress};
use crate::family::StoreRegisterMemLayout;
use crate::stream::CommandStream;

/// Timestamp register store used by profiling events.
#[derive(Debug, Clone)]
pub struct MutableStoreRegisterMem {
    cmd: CommandShadow,
    layout: &'static StoreRegisterMemLayout,
    address_offset: u64,
}

impl MutableStoreRegisterMem {
    pub fn new(
        stream: &CommandStream,
        offset: usize,
        layout: &'static StoreRegisterMemLayout,
    ) -> Result<Self, CmdDecodeError> {
        Ok(Self {
            cmd: CommandShadow::capture(stream, offset, layout.size_bytes)?,
            layout,
            address_offset: 0,
        })
    }

    /// Offset of this store's slot inside the event's timestamp packet.
    pub fn with_address_offset(mut self, address_offset: u64) -> Self {
        self.address_offset = address_offset;
        self
    }

    pub fn offset(&self) -> usize {
        self.cmd.offset
    }

    pub fn is_nooped(&self) -> bool {
        self.cmd.nooped
    }

    pub fn set_memory_address(&mut self, stream: &mut CommandStream, address: GpuAddress) {
        self.cmd.write_u64(stream, self.layout.memory_address, address + self.address_offset);
    }

    pub fn memory_address(&self) -> GpuAddress {
        self.cmd.read_u64(self.layout.memory_address)
    }

    pub fn noop(&mut self, stream: &mut CommandStream) {
        self.cmd.noop(stream);
    }

    pub fn restore(&mut self, stream: &mut CommandStream) {
        self.cmd.restore(stream);
    }
}
