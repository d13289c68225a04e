use super::CommandShadow;
use crate::cmd::{CmdDecodeError, GpuAddress};
use crate::family::PipeControlLayout;
use crate::stream::CommandStream;

/// Pipe control whose post-sync write signals an event.
#[derive(Debug, Clone)]
pub struct MutablePipeControl {
    cmd: CommandShadow,
    layout: &'static PipeControlLayout,
}

impl MutablePipeControl {
    pub fn new(
        stream: &CommandStream,
        offset: usize,
        layout: &'static PipeControlLayout,
    ) -> Result<Self, CmdDecodeError> {
        Ok(Self {
            cmd: CommandShadow::capture(stream, offset, layout.size_bytes)?,
            layout,
        })
    }

    pub fn offset(&self) -> usize {
        self.cmd.offset
    }

    pub fn is_nooped(&self) -> bool {
        self.cmd.nooped
    }

    pub fn set_post_sync_address(&mut self, stream: &mut CommandStream, address: GpuAddress) {
        self.cmd.write_u64(stream, self.layout.post_sync_address, address);
    }

    pub fn post_sync_address(&self) -> GpuAddress {
        self.cmd.read_u64(self.layout.post_sync_address)
    }

    pub fn noop(&mut self, stream: &mut CommandStream) {
        self.cmd.noop(stream);
    }

    pub fn restore(&mut self, stream: &mut CommandStream) {
        self.cmd.restore(stream);
    }
}
