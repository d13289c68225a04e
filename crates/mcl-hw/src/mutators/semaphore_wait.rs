use tracing::trace;

use super::CommandShadow;
use crate::cmd::{CmdDecodeError, GpuAddress};
use crate::family::SemaphoreWaitLayout;
use crate::stream::CommandStream;

/// What a captured semaphore wait is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreWaitKind {
    RegularEventWait,
    CbEventWait,
    CbEventTimestampSyncWait,
}

#[derive(Debug, Clone)]
pub struct MutableSemaphoreWait {
    cmd: CommandShadow,
    layout: &'static SemaphoreWaitLayout,
    kind: SemaphoreWaitKind,
    in_order_patch_index: Option<usize>,
    qword_indirect: bool,
    address_offset: u64,
}

impl MutableSemaphoreWait {
    pub fn new(
        stream: &CommandStream,
        offset: usize,
        layout: &'static SemaphoreWaitLayout,
        kind: SemaphoreWaitKind,
        in_order_patch_index: Option<usize>,
        qword_indirect: bool,
    ) -> Result<Self, CmdDecodeError> {
        Ok(Self {
            cmd: CommandShadow::capture(stream, offset, layout.size_bytes)?,
            layout,
            kind,
            in_order_patch_index,
            qword_indirect,
            address_offset: 0,
        })
    }

    /// Offset added to every address programmed into this command (packet offset inside the
    /// event's storage).
    pub fn with_address_offset(mut self, address_offset: u64) -> Self {
        self.address_offset = address_offset;
        self
    }

    pub fn offset(&self) -> usize {
        self.cmd.offset
    }

    pub fn kind(&self) -> SemaphoreWaitKind {
        self.kind
    }

    pub fn in_order_patch_index(&self) -> Option<usize> {
        self.in_order_patch_index
    }

    pub fn is_qword_indirect(&self) -> bool {
        self.qword_indirect
    }

    pub fn is_nooped(&self) -> bool {
        self.cmd.nooped
    }

    pub fn set_semaphore_address(&mut self, stream: &mut CommandStream, address: GpuAddress) {
        let patched = address + self.address_offset;
        trace!(offset = self.cmd.offset, address = patched, "semaphore wait address");
        self.cmd.write_u64(stream, self.layout.semaphore_address, patched);
    }

    /// Ignored for qword counters, where the compare value comes from registers loaded by LRI.
    pub fn set_semaphore_value(&mut self, stream: &mut CommandStream, value: u32) {
        if self.qword_indirect {
            return;
        }
        self.cmd.write_u32(stream, self.layout.semaphore_data, value);
    }

    pub fn noop(&mut self, stream: &mut CommandStream) {
        trace!(offset = self.cmd.offset, "semaphore wait noop");
        self.cmd.noop(stream);
    }

    pub fn restore_with_semaphore_address(&mut self, stream: &mut CommandStream, address: GpuAddress) {
        self.set_semaphore_address(stream, address);
        trace!(offset = self.cmd.offset, "semaphore wait restore");
        self.cmd.restore(stream);
    }

    /// Address as last programmed, including the per-command offset.
    pub fn semaphore_address(&self) -> GpuAddress {
        self.cmd.read_u64(self.layout.semaphore_address)
    }

    pub fn semaphore_value(&self) -> u32 {
        self.cmd.read_u32(self.layout.semaphore_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::SemaphoreWaitCmd;
    use crate::family::{GpuFamily, XE_HPC};

    fn recorded() -> (CommandStream, MutableSemaphoreWait) {
        let mut cs = CommandStream::new();
        let at = cs.append_semaphore_wait(0x1000, 1, SemaphoreWaitCmd::COMPARE_SAD_GREATER_THAN_OR_EQUAL_SDD);
        let sem = MutableSemaphoreWait::new(
            &cs,
            at,
            XE_HPC.semaphore_wait(),
            SemaphoreWaitKind::RegularEventWait,
            None,
            false,
        )
        .unwrap()
        .with_address_offset(0x10);
        (cs, sem)
    }

    #[test]
    fn address_includes_per_command_offset() {
        let (mut cs, mut sem) = recorded();
        sem.set_semaphore_address(&mut cs, 0x4000);
        let field = sem.offset() + XE_HPC.semaphore_wait().semaphore_address;
        assert_eq!(cs.read_u64_at(field).unwrap(), 0x4010);
        assert_eq!(sem.semaphore_address(), 0x4010);
    }

    #[test]
    fn noop_zeroes_whole_command_and_restore_brings_it_back() {
        let (mut cs, mut sem) = recorded();
        let before = cs.as_bytes().to_vec();

        sem.noop(&mut cs);
        assert!(sem.is_nooped());
        assert_eq!(cs.as_bytes(), vec![0u8; SemaphoreWaitCmd::SIZE_BYTES].as_slice());

        sem.restore_with_semaphore_address(&mut cs, 0x1000 - 0x10);
        assert!(!sem.is_nooped());
        assert_eq!(cs.as_bytes(), before.as_slice());
    }

    #[test]
    fn qword_indirect_wait_ignores_value() {
        let mut cs = CommandStream::new();
        let at = cs.append_semaphore_wait(0, 5, SemaphoreWaitCmd::COMPARE_SAD_GREATER_THAN_OR_EQUAL_SDD);
        let mut sem =
            MutableSemaphoreWait::new(&cs, at, XE_HPC.semaphore_wait(), SemaphoreWaitKind::CbEventWait, Some(0), true)
                .unwrap();
        sem.set_semaphore_value(&mut cs, 77);
        assert_eq!(sem.semaphore_value(), 5);
    }
}
