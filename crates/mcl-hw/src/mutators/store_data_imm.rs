use super::CommandShadow;
use crate::cmd::{CmdDecodeError, GpuAddress};
use crate::family::StoreDataImmLayout;
use crate::stream::CommandStream;

#[derive(Debug, Clone)]
pub struct MutableStoreDataImm {
    cmd: CommandShadow,
    layout: &'static StoreDataImmLayout,
    workload_partition: bool,
    address_offset: u64,
}

impl MutableStoreDataImm {
    pub fn new(
        stream: &CommandStream,
        offset: usize,
        layout: &'static StoreDataImmLayout,
        workload_partition: bool,
    ) -> Result<Self, CmdDecodeError> {
        Ok(Self {
            cmd: CommandShadow::capture(stream, offset, layout.size_bytes)?,
            layout,
            workload_partition,
            address_offset: 0,
        })
    }

    pub fn with_address_offset(mut self, address_offset: u64) -> Self {
        self.address_offset = address_offset;
        self
    }

    pub fn offset(&self) -> usize {
        self.cmd.offset
    }

    pub fn is_workload_partition(&self) -> bool {
        self.workload_partition
    }

    pub fn is_nooped(&self) -> bool {
        self.cmd.nooped
    }

    pub fn set_address(&mut self, stream: &mut CommandStream, address: GpuAddress) {
        self.cmd.write_u64(stream, self.layout.address, address + self.address_offset);
    }

    pub fn address(&self) -> GpuAddress {
        self.cmd.read_u64(self.layout.address)
    }

    pub fn set_value(&mut self, stream: &mut CommandStream, value: u64) {
        self.cmd.write_u32(stream, self.layout.data_dword0, value as u32);
        self.cmd.write_u32(stream, self.layout.data_dword1, (value >> 32) as u32);
    }

    pub fn noop(&mut self, stream: &mut CommandStream) {
        self.cmd.noop(stream);
    }

    pub fn restore(&mut self, stream: &mut CommandStream) {
        self.cmd.restore(stream);
    }
}
