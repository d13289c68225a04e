use super::CommandShadow;
use crate::cmd::CmdDecodeError;
use crate::family::LoadRegisterImmLayout;
use crate::stream::CommandStream;

/// LRI that loads one half of a qword in-order counter compare value.
#[derive(Debug, Clone)]
pub struct MutableLoadRegisterImm {
    cmd: CommandShadow,
    layout: &'static LoadRegisterImmLayout,
    in_order_patch_index: Option<usize>,
}

impl MutableLoadRegisterImm {
    pub fn new(
        stream: &CommandStream,
        offset: usize,
        layout: &'static LoadRegisterImmLayout,
        in_order_patch_index: Option<usize>,
    ) -> Result<Self, CmdDecodeError> {
        Ok(Self {
            cmd: CommandShadow::capture(stream, offset, layout.size_bytes)?,
            layout,
            in_order_patch_index,
        })
    }

    pub fn offset(&self) -> usize {
        self.cmd.offset
    }

    pub fn in_order_patch_index(&self) -> Option<usize> {
        self.in_order_patch_index
    }

    pub fn is_nooped(&self) -> bool {
        self.cmd.nooped
    }

    pub fn set_value(&mut self, stream: &mut CommandStream, value: u32) {
        self.cmd.write_u32(stream, self.layout.data, value);
    }

    pub fn value(&self) -> u32 {
        self.cmd.read_u32(self.layout.data)
    }

    pub fn noop(&mut self, stream: &mut CommandStream) {
        self.cmd.noop(stream);
    }

    pub fn restore(&mut self, stream: &mut CommandStream) {
        self.cmd.restore(stream);
    }
}
