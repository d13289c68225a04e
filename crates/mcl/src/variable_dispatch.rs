//! Per-dispatch derivation of walker fields and implicit arguments.
//!
//! A [`VariableDispatch`] keeps its own copy of the dispatch geometry, so group size and group
//! count can be changed independently while global work size and work dimensions stay consistent.
//! Under staged commit the setters only recompute derived state and raise a `commit_*` flag;
//! [`VariableDispatch::commit_changes`] applies everything pending in one pass.

use mcl_hw::{GpuFamily, MutableComputeWalker};
use tracing::trace;

use crate::container::CommandContainer;
use crate::indirect_data::MutableIndirectData;
use crate::kernel::KernelData;
use crate::local_ids::{
    generate_local_ids, num_threads, per_thread_data_size, requires_runtime_local_ids,
    thread_execution_mask, wrapping_product, LocalIdRequest,
};
use crate::types::{Dim3, VariableId};

#[derive(Debug)]
pub struct VariableDispatch {
    family: &'static dyn GpuFamily,
    kernel_data: KernelData,
    force_sw_local_ids: bool,
    indirect_data: MutableIndirectData,
    walker: MutableComputeWalker,

    pub(crate) group_count_var: Option<VariableId>,
    pub(crate) group_size_var: Option<VariableId>,
    pub(crate) global_offset_var: Option<VariableId>,
    pub(crate) slm_vars: Vec<VariableId>,

    group_size: Dim3,
    group_count: Dim3,
    global_offset: Dim3,
    total_lws_size: u32,
    thread_group_count: u32,
    num_threads_per_thread_group: u32,
    thread_execution_mask: u32,
    local_id_generation_by_runtime: bool,
    walk_order: u32,
    per_thread_data_size: usize,
    per_thread_data: Vec<u8>,
    slm_total_size: u32,

    commit_group_count: bool,
    commit_group_size: bool,
    commit_slm_size: bool,
}

impl VariableDispatch {
    pub(crate) fn new(
        family: &'static dyn GpuFamily,
        kernel_data: KernelData,
        force_sw_local_ids: bool,
        indirect_data: MutableIndirectData,
        walker: MutableComputeWalker,
    ) -> Self {
        Self {
            family,
            slm_total_size: kernel_data.slm_inline_size,
            kernel_data,
            force_sw_local_ids,
            indirect_data,
            walker,
            group_count_var: None,
            group_size_var: None,
            global_offset_var: None,
            slm_vars: Vec::new(),
            group_size: [1, 1, 1],
            group_count: [1, 1, 1],
            global_offset: [0, 0, 0],
            total_lws_size: 1,
            thread_group_count: 1,
            num_threads_per_thread_group: 1,
            thread_execution_mask: 0,
            local_id_generation_by_runtime: false,
            walk_order: 0,
            per_thread_data_size: 0,
            per_thread_data: Vec::new(),
            commit_group_count: false,
            commit_group_size: false,
            commit_slm_size: false,
        }
    }

    pub fn walker(&self) -> &MutableComputeWalker {
        &self.walker
    }

    pub(crate) fn walker_mut(&mut self) -> &mut MutableComputeWalker {
        &mut self.walker
    }

    pub fn indirect_data(&self) -> &MutableIndirectData {
        &self.indirect_data
    }

    pub fn group_size(&self) -> Dim3 {
        self.group_size
    }

    pub fn group_count(&self) -> Dim3 {
        self.group_count
    }

    pub fn global_offset(&self) -> Dim3 {
        self.global_offset
    }

    pub fn total_lws_size(&self) -> u32 {
        self.total_lws_size
    }

    pub fn thread_group_count(&self) -> u32 {
        self.thread_group_count
    }

    pub fn num_threads_per_thread_group(&self) -> u32 {
        self.num_threads_per_thread_group
    }

    pub fn thread_execution_mask(&self) -> u32 {
        self.thread_execution_mask
    }

    pub fn local_id_generation_by_runtime(&self) -> bool {
        self.local_id_generation_by_runtime
    }

    pub fn per_thread_data_size(&self) -> usize {
        self.per_thread_data_size
    }

    pub fn slm_total_size(&self) -> u32 {
        self.slm_total_size
    }

    pub fn slm_inline_size(&self) -> u32 {
        self.kernel_data.slm_inline_size
    }

    pub fn is_commit_pending(&self) -> bool {
        self.commit_group_count || self.commit_group_size || self.commit_slm_size
    }

    /// Variables whose commit feeds this dispatch.
    pub fn variables(&self) -> impl Iterator<Item = VariableId> + '_ {
        [self.group_count_var, self.group_size_var, self.global_offset_var]
            .into_iter()
            .flatten()
            .chain(self.slm_vars.iter().copied())
    }

    pub fn set_group_size(&mut self, container: &mut CommandContainer, group_size: Dim3, stage: bool) {
        self.group_size = group_size;
        self.total_lws_size = wrapping_product(group_size);

        let kd = &self.kernel_data;
        let generation = requires_runtime_local_ids(
            self.family,
            &LocalIdRequest {
                num_channels: kd.num_local_id_channels,
                simd_size: kd.simd_size,
                group_size,
                requires_walk_order: kd.requires_workgroup_walk_order,
                walk_order: kd.workgroup_walk_order,
                force_sw: self.force_sw_local_ids,
            },
        );
        self.local_id_generation_by_runtime = generation.by_runtime;
        self.walk_order = generation.walk_order;

        if generation.by_runtime {
            let grf = self.family.grf_size();
            self.per_thread_data_size =
                per_thread_data_size(kd.simd_size, grf, kd.num_local_id_channels, self.total_lws_size);
            self.per_thread_data.resize(self.per_thread_data_size, 0);
            generate_local_ids(
                &mut self.per_thread_data,
                kd.simd_size,
                grf,
                kd.num_local_id_channels,
                group_size,
                kd.workgroup_walk_order,
            );
        } else {
            self.per_thread_data_size = 0;
            self.per_thread_data.clear();
        }

        self.num_threads_per_thread_group = num_threads(self.total_lws_size, kd.simd_size);
        self.thread_execution_mask = thread_execution_mask(self.total_lws_size, kd.simd_size);

        trace!(
            ?group_size,
            runtime_local_ids = generation.by_runtime,
            per_thread_data_size = self.per_thread_data_size,
            threads = self.num_threads_per_thread_group,
            stage,
            "dispatch group size"
        );

        if stage {
            self.commit_group_size = true;
            return;
        }
        self.apply_group_size(container);
        self.apply_work_size(container);
        self.walker.save_cpu_buffer_into_gpu_buffer(&mut container.stream);
    }

    pub fn set_group_count(&mut self, container: &mut CommandContainer, group_count: Dim3, stage: bool) {
        self.group_count = group_count;
        self.thread_group_count = wrapping_product(group_count);
        trace!(?group_count, stage, "dispatch group count");

        if stage {
            self.commit_group_count = true;
            return;
        }
        self.apply_group_count(container);
        self.apply_work_size(container);
        self.walker.save_cpu_buffer_into_gpu_buffer(&mut container.stream);
    }

    /// Global offsets are pure payload; they never touch the walker.
    pub fn set_global_offset(&mut self, container: &mut CommandContainer, global_offset: Dim3) {
        self.global_offset = global_offset;
        self.indirect_data.set_global_work_offset(container, global_offset);
    }

    /// Takes the aligned size of all SLM arguments; the kernel's static SLM is added on top.
    pub fn set_slm_size(&mut self, container: &mut CommandContainer, slm_args_total_size: u32, stage: bool) {
        self.slm_total_size = slm_args_total_size.saturating_add(self.kernel_data.slm_inline_size);
        trace!(slm_total_size = self.slm_total_size, stage, "dispatch slm size");

        if stage {
            self.commit_slm_size = true;
            return;
        }
        self.apply_slm_size();
        self.walker.save_cpu_buffer_into_gpu_buffer(&mut container.stream);
    }

    /// Applies every staged change. Returns false when nothing was pending.
    pub fn commit_changes(&mut self, container: &mut CommandContainer) -> bool {
        if !self.is_commit_pending() {
            return false;
        }
        if self.commit_group_size {
            self.apply_group_size(container);
        }
        if self.commit_group_count {
            self.apply_group_count(container);
        }
        if self.commit_group_size || self.commit_group_count {
            self.apply_work_size(container);
        }
        if self.commit_slm_size {
            self.apply_slm_size();
        }
        self.walker.save_cpu_buffer_into_gpu_buffer(&mut container.stream);

        self.commit_group_count = false;
        self.commit_group_size = false;
        self.commit_slm_size = false;
        true
    }

    fn apply_group_size(&mut self, container: &mut CommandContainer) {
        let kd = &self.kernel_data;
        let runtime = self.local_id_generation_by_runtime;

        self.indirect_data.set_per_thread_data(container, &self.per_thread_data);
        if runtime || kd.num_local_id_channels == 0 {
            self.walker.set_generate_local_id(false, 0, 0);
        } else {
            let mask = (1u32 << kd.num_local_id_channels.min(3)) - 1;
            self.walker.set_generate_local_id(true, self.walk_order, mask);
        }
        self.walker.set_work_group_size(self.group_size);

        let indirect_size = self.indirect_data.cross_thread_data_size() + self.per_thread_data_size;
        self.walker.set_indirect_data_size(indirect_size as u32);

        let mut kernel_start = kd.kernel_start_address;
        if !runtime {
            kernel_start += u64::from(kd.skip_per_thread_data_load);
        }
        self.walker.set_kernel_start_address(kernel_start);

        self.indirect_data.set_local_work_size(container, self.group_size);
        self.indirect_data.set_local_work_size2(container, self.group_size);
        self.indirect_data.set_enq_local_work_size(container, self.group_size);

        self.walker.set_number_threads_per_thread_group(self.num_threads_per_thread_group);
        self.walker.set_execution_mask(self.thread_execution_mask);
    }

    fn apply_group_count(&mut self, container: &mut CommandContainer) {
        self.walker.set_number_work_groups(self.group_count);
        self.indirect_data.set_num_work_groups(container, self.group_count);
    }

    fn apply_work_size(&self, container: &mut CommandContainer) {
        let gws: Dim3 = std::array::from_fn(|d| self.group_size[d].wrapping_mul(self.group_count[d]));
        self.indirect_data.set_global_work_size(container, gws);
        self.indirect_data.set_work_dimensions(container, work_dimensions(self.group_count, self.group_size));
    }

    fn apply_slm_size(&mut self) {
        let encoded = self.family.encode_slm_size(self.slm_total_size);
        self.walker.update_slm_size(encoded);
    }
}

/// Highest dimension with more than one work-item, at least 1.
pub fn work_dimensions(group_count: Dim3, group_size: Dim3) -> u32 {
    let items = |d: usize| u64::from(group_count[d]) * u64::from(group_size[d]);
    if items(2) > 1 {
        3
    } else if items(1) > 1 {
        2
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::CrossThreadOffsets;
    use crate::patch::PayloadLayout;
    use mcl_hw::{WalkerInit, GEN12LP, XE_HPC};

    fn dispatch(family: &'static dyn GpuFamily, kernel_data: KernelData) -> (CommandContainer, VariableDispatch) {
        let mut container = CommandContainer::new();
        let walker_offset = container.stream.append_walker(family, &WalkerInit::default());
        let heap_offset = container.ioh.reserve(64 + 4096);
        let layout = family.walker();
        let payload = PayloadLayout {
            inline_stream_offset: walker_offset + layout.inline_data_offset,
            inline_size: layout.inline_data_size,
            heap_offset,
        };
        let offsets = CrossThreadOffsets {
            num_work_groups: CrossThreadOffsets::dim3_at(0),
            local_work_size: CrossThreadOffsets::dim3_at(12),
            global_work_size: CrossThreadOffsets::dim3_at(24),
            work_dimensions: Some(36),
            ..CrossThreadOffsets::default()
        };
        let indirect = MutableIndirectData::new(offsets, payload, 64, heap_offset + 64, 4096);
        let walker = MutableComputeWalker::new(&container.stream, walker_offset, layout).unwrap();
        (container, VariableDispatch::new(family, kernel_data, false, indirect, walker))
    }

    #[test]
    fn work_dimensions_follow_highest_non_unit_dimension() {
        assert_eq!(work_dimensions([4, 2, 1], [1, 1, 1]), 2);
        assert_eq!(work_dimensions([1, 1, 1], [1, 1, 1]), 1);
        assert_eq!(work_dimensions([1, 1, 2], [1, 1, 1]), 3);
        assert_eq!(work_dimensions([1, 1, 1], [1, 8, 1]), 2);
    }

    #[test]
    fn staged_group_count_waits_for_commit() {
        let (mut container, mut d) = dispatch(&XE_HPC, KernelData::default());
        d.set_group_count(&mut container, [4, 2, 1], true);
        assert_eq!(d.walker().number_work_groups(), [0, 0, 0]);
        assert!(d.is_commit_pending());

        assert!(d.commit_changes(&mut container));
        assert!(!d.commit_changes(&mut container));
        assert_eq!(d.walker().number_work_groups(), [4, 2, 1]);
        let at = d.walker().offset() + XE_HPC.walker().thread_group_id[0];
        assert_eq!(container.stream.read_u32_at(at).unwrap(), 4);
    }

    #[test]
    fn hardware_local_ids_skip_per_thread_load() {
        let kd = KernelData {
            simd_size: 16,
            num_local_id_channels: 3,
            kernel_start_address: 0x1000,
            skip_per_thread_data_load: 0x40,
            ..KernelData::default()
        };
        let (mut container, mut d) = dispatch(&XE_HPC, kd);
        d.set_group_size(&mut container, [8, 4, 1], false);
        assert!(!d.local_id_generation_by_runtime());
        assert_eq!(d.walker().kernel_start_address(), 0x1040);
        assert_eq!(d.walker().generate_local_id(), Some(true));
        assert_eq!(d.walker().emit_local_id(), Some(0b111));
        assert_eq!(d.walker().local_maximum(), Some([7, 3, 0]));
        assert_eq!(d.num_threads_per_thread_group(), 2);
        assert_eq!(d.walker().indirect_data_size(), 64);
    }

    #[test]
    fn runtime_local_ids_fill_per_thread_payload() {
        let kd = KernelData {
            simd_size: 8,
            num_local_id_channels: 1,
            kernel_start_address: 0x1000,
            skip_per_thread_data_load: 0x40,
            ..KernelData::default()
        };
        let (mut container, mut d) = dispatch(&GEN12LP, kd);
        d.set_group_size(&mut container, [10, 1, 1], false);
        assert!(d.local_id_generation_by_runtime());
        assert_eq!(d.per_thread_data_size(), 2 * 32);
        assert_eq!(d.walker().kernel_start_address(), 0x1000);
        assert_eq!(d.walker().indirect_data_size(), 64 + 64);
        assert_eq!(d.thread_execution_mask(), 0b11);

        let second_thread = d.indirect_data().per_thread_offset() + 32;
        assert_eq!(container.ioh.bytes_at(second_thread, 4).unwrap(), &[8, 0, 9, 0]);
    }

    #[test]
    fn slm_total_includes_inline_reservation() {
        let kd = KernelData {
            slm_inline_size: 512,
            ..KernelData::default()
        };
        let (mut container, mut d) = dispatch(&GEN12LP, kd);
        d.set_slm_size(&mut container, 1024, false);
        assert_eq!(d.slm_total_size(), 1536);
        assert_eq!(d.walker().slm_size(), GEN12LP.encode_slm_size(1536));
    }
}
