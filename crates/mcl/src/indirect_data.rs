use crate::container::CommandContainer;
use crate::kernel::CrossThreadOffsets;
use crate::patch::PayloadLayout;
use crate::types::Dim3;

/// Writable view of one dispatch's implicit cross-thread arguments and per-thread payload.
#[derive(Debug, Clone)]
pub struct MutableIndirectData {
    offsets: CrossThreadOffsets,
    payload: PayloadLayout,
    /// Heap part of the cross-thread payload.
    cross_thread_heap_size: usize,
    per_thread_offset: usize,
    per_thread_capacity: usize,
}

impl MutableIndirectData {
    pub fn new(
        offsets: CrossThreadOffsets,
        payload: PayloadLayout,
        cross_thread_heap_size: usize,
        per_thread_offset: usize,
        per_thread_capacity: usize,
    ) -> Self {
        Self {
            offsets,
            payload,
            cross_thread_heap_size,
            per_thread_offset,
            per_thread_capacity,
        }
    }

    pub fn offsets(&self) -> &CrossThreadOffsets {
        &self.offsets
    }

    pub fn payload(&self) -> &PayloadLayout {
        &self.payload
    }

    pub fn cross_thread_data_size(&self) -> usize {
        self.cross_thread_heap_size
    }

    pub fn per_thread_offset(&self) -> usize {
        self.per_thread_offset
    }

    fn write_u32(&self, container: &mut CommandContainer, offset: Option<u16>, v: u32) {
        if let Some(offset) = offset {
            self.payload
                .locate_scalar(usize::from(offset), 4)
                .write_all(container, &v.to_le_bytes());
        }
    }

    fn write_dim3(&self, container: &mut CommandContainer, offsets: [Option<u16>; 3], values: Dim3) {
        for (offset, v) in offsets.into_iter().zip(values) {
            self.write_u32(container, offset, v);
        }
    }

    pub fn set_num_work_groups(&self, container: &mut CommandContainer, group_count: Dim3) {
        self.write_dim3(container, self.offsets.num_work_groups, group_count);
    }

    pub fn set_global_work_size(&self, container: &mut CommandContainer, gws: Dim3) {
        self.write_dim3(container, self.offsets.global_work_size, gws);
    }

    pub fn set_global_work_offset(&self, container: &mut CommandContainer, offset: Dim3) {
        self.write_dim3(container, self.offsets.global_work_offset, offset);
    }

    pub fn set_local_work_size(&self, container: &mut CommandContainer, lws: Dim3) {
        self.write_dim3(container, self.offsets.local_work_size, lws);
    }

    pub fn set_local_work_size2(&self, container: &mut CommandContainer, lws: Dim3) {
        self.write_dim3(container, self.offsets.local_work_size2, lws);
    }

    pub fn set_enq_local_work_size(&self, container: &mut CommandContainer, lws: Dim3) {
        self.write_dim3(container, self.offsets.enqueued_local_work_size, lws);
    }

    pub fn set_work_dimensions(&self, container: &mut CommandContainer, work_dim: u32) {
        self.write_u32(container, self.offsets.work_dimensions, work_dim);
    }

    /// Copies software-generated local IDs behind the cross-thread payload and zeroes the rest of
    /// the reservation, so no IDs of an earlier, larger work-group survive.
    ///
    /// The region is sized at record time for the largest work-group; anything beyond it is
    /// dropped.
    pub fn set_per_thread_data(&self, container: &mut CommandContainer, data: &[u8]) {
        let len = data.len().min(self.per_thread_capacity);
        debug_assert_eq!(len, data.len(), "per-thread payload exceeds its reservation");
        if self.per_thread_capacity == 0 {
            return;
        }
        let mut region = vec![0u8; self.per_thread_capacity];
        region[..len].copy_from_slice(&data[..len]);
        container.ioh.write_bytes_at(self.per_thread_offset, &region);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcl_hw::{GpuFamily, WalkerInit, XE_HPC};

    #[test]
    fn fields_past_inline_window_land_in_heap() {
        let mut container = CommandContainer::new();
        let walker = container.stream.append_walker(&XE_HPC, &WalkerInit::default());
        let heap_offset = container.ioh.reserve(64);
        let layout = XE_HPC.walker();
        let payload = PayloadLayout {
            inline_stream_offset: walker + layout.inline_data_offset,
            inline_size: layout.inline_data_size,
            heap_offset,
        };
        let offsets = CrossThreadOffsets {
            num_work_groups: CrossThreadOffsets::dim3_at(0),
            global_work_size: CrossThreadOffsets::dim3_at(64),
            work_dimensions: Some(76),
            ..CrossThreadOffsets::default()
        };
        let data = MutableIndirectData::new(offsets, payload, 64, heap_offset + 64, 0);

        data.set_num_work_groups(&mut container, [4, 2, 1]);
        data.set_global_work_size(&mut container, [64, 2, 1]);
        data.set_work_dimensions(&mut container, 2);

        assert_eq!(container.stream.read_u32_at(payload.inline_stream_offset + 4).unwrap(), 2);
        assert_eq!(container.ioh.read_u32_at(heap_offset).unwrap(), 64);
        assert_eq!(container.ioh.read_u32_at(heap_offset + 12).unwrap(), 2);
    }
}
