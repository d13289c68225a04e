use tracing::trace;

use crate::cmd::{CmdDecodeError, GpuAddress};
use crate::family::WalkerLayout;
use crate::stream::CommandStream;

/// Dispatch walker with a CPU-side copy.
///
/// Setters only touch the CPU copy; [`MutableComputeWalker::save_cpu_buffer_into_gpu_buffer`]
/// publishes it. The inline data window is never part of that copy because its bytes are owned by
/// the argument patch locations that write straight into the stream.
#[derive(Debug, Clone)]
pub struct MutableComputeWalker {
    offset: usize,
    layout: &'static WalkerLayout,
    cpu: Vec<u8>,
}

impl MutableComputeWalker {
    pub fn new(
        stream: &CommandStream,
        offset: usize,
        layout: &'static WalkerLayout,
    ) -> Result<Self, CmdDecodeError> {
        Ok(Self {
            offset,
            layout,
            cpu: stream.bytes_at(offset, layout.size_bytes)?.to_vec(),
        })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn layout(&self) -> &'static WalkerLayout {
        self.layout
    }

    /// Stream offset of the inline data window.
    pub fn inline_data_stream_offset(&self) -> usize {
        self.offset + self.layout.inline_data_offset
    }

    pub fn inline_data_size(&self) -> usize {
        self.layout.inline_data_size
    }

    fn put_u32(&mut self, field: usize, v: u32) {
        self.cpu[field..field + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn put_u64(&mut self, field: usize, v: u64) {
        self.cpu[field..field + 8].copy_from_slice(&v.to_le_bytes());
    }

    fn get_u32(&self, field: usize) -> u32 {
        let b = &self.cpu[field..field + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    fn get_u64(&self, field: usize) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.cpu[field..field + 8]);
        u64::from_le_bytes(raw)
    }

    pub fn set_kernel_start_address(&mut self, address: GpuAddress) {
        self.put_u64(self.layout.kernel_start_pointer, address);
    }

    pub fn set_indirect_data_start_address(&mut self, address: u32) {
        self.put_u32(self.layout.indirect_data_start_address, address);
    }

    pub fn set_indirect_data_size(&mut self, size: u32) {
        self.put_u32(self.layout.indirect_data_length, size);
    }

    pub fn set_number_work_groups(&mut self, group_count: [u32; 3]) {
        for (field, count) in self.layout.thread_group_id.into_iter().zip(group_count) {
            self.put_u32(field, count);
        }
    }

    /// Programs the local maximum fields (`size - 1`) where the family has them.
    pub fn set_work_group_size(&mut self, group_size: [u32; 3]) {
        if let Some(fields) = self.layout.local_maximum {
            for (field, size) in fields.into_iter().zip(group_size) {
                self.put_u32(field, size.saturating_sub(1));
            }
        }
    }

    pub fn set_generate_local_id(&mut self, generate: bool, walk_order: u32, emit_mask: u32) {
        if let Some(field) = self.layout.generate_local_id {
            self.put_u32(field, generate as u32);
        }
        if let Some(field) = self.layout.emit_local_id {
            self.put_u32(field, emit_mask);
        }
        if let Some(field) = self.layout.walk_order {
            self.put_u32(field, walk_order);
        }
    }

    pub fn set_number_threads_per_thread_group(&mut self, threads: u32) {
        self.put_u32(self.layout.threads_per_thread_group, threads);
    }

    pub fn set_execution_mask(&mut self, mask: u32) {
        self.put_u32(self.layout.execution_mask, mask);
    }

    /// `encoded` is already in the family's SLM field encoding.
    pub fn update_slm_size(&mut self, encoded: u32) {
        self.put_u32(self.layout.shared_local_memory_size, encoded);
    }

    /// Post-sync is rebound outside of the staged walker commit, so both copies are written.
    pub fn set_post_sync_address(&mut self, stream: &mut CommandStream, address: GpuAddress) {
        if let Some(field) = self.layout.post_sync_address {
            self.put_u64(field, address);
            stream.write_u64_at(self.offset + field, address);
        }
    }

    pub fn save_cpu_buffer_into_gpu_buffer(&self, stream: &mut CommandStream) {
        let len = self.layout.inline_data_offset;
        trace!(offset = self.offset, len, "walker publish");
        stream.write_bytes_at(self.offset, &self.cpu[..len]);
    }

    pub fn kernel_start_address(&self) -> GpuAddress {
        self.get_u64(self.layout.kernel_start_pointer)
    }

    pub fn indirect_data_size(&self) -> u32 {
        self.get_u32(self.layout.indirect_data_length)
    }

    pub fn number_work_groups(&self) -> [u32; 3] {
        self.layout.thread_group_id.map(|field| self.get_u32(field))
    }

    pub fn local_maximum(&self) -> Option<[u32; 3]> {
        self.layout
            .local_maximum
            .map(|fields| fields.map(|field| self.get_u32(field)))
    }

    pub fn emit_local_id(&self) -> Option<u32> {
        self.layout.emit_local_id.map(|field| self.get_u32(field))
    }

    pub fn generate_local_id(&self) -> Option<bool> {
        self.layout.generate_local_id.map(|field| self.get_u32(field) != 0)
    }

    pub fn walk_order(&self) -> Option<u32> {
        self.layout.walk_order.map(|field| self.get_u32(field))
    }

    pub fn number_threads_per_thread_group(&self) -> u32 {
        self.get_u32(self.layout.threads_per_thread_group)
    }

    pub fn execution_mask(&self) -> u32 {
        self.get_u32(self.layout.execution_mask)
    }

    pub fn slm_size(&self) -> u32 {
        self.get_u32(self.layout.shared_local_memory_size)
    }

    pub fn post_sync_address(&self) -> Option<GpuAddress> {
        self.layout.post_sync_address.map(|field| self.get_u64(field))
    }
}
