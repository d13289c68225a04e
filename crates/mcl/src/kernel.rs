//! Read-only kernel metadata supplied at record time.

use crate::types::Dim3;

/// Cross-thread data offsets of the implicit dispatch arguments. `None` means the kernel does not
/// read that component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrossThreadOffsets {
    pub num_work_groups: [Option<u16>; 3],
    pub global_work_size: [Option<u16>; 3],
    pub global_work_offset: [Option<u16>; 3],
    pub local_work_size: [Option<u16>; 3],
    pub local_work_size2: [Option<u16>; 3],
    pub enqueued_local_work_size: [Option<u16>; 3],
    pub work_dimensions: Option<u16>,
}

impl CrossThreadOffsets {
    /// Packs the three components of a dim3 field contiguously starting at `offset`.
    pub fn dim3_at(offset: u16) -> [Option<u16>; 3] {
        [Some(offset), Some(offset + 4), Some(offset + 8)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpace {
    Global,
    /// SLM pointer; the argument receives an offset into the work-group's SLM.
    Local { required_alignment: u32 },
}

/// One piece of a by-value argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueElement {
    /// Destination offset in cross-thread data.
    pub offset: u16,
    pub size: u16,
    /// Offset in the argument bytes supplied by the caller.
    pub source_offset: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelArg {
    Pointer {
        /// Cross-thread data offset of the pointer (or SLM offset), if the kernel reads it.
        offset: Option<u16>,
        address_space: AddressSpace,
    },
    Value {
        elements: Vec<ValueElement>,
    },
}

impl KernelArg {
    pub fn global_pointer(offset: u16) -> Self {
        Self::Pointer {
            offset: Some(offset),
            address_space: AddressSpace::Global,
        }
    }

    pub fn slm_pointer(offset: u16, required_alignment: u32) -> Self {
        Self::Pointer {
            offset: Some(offset),
            address_space: AddressSpace::Local { required_alignment },
        }
    }

    /// A by-value argument copied as one flat chunk.
    pub fn value(offset: u16, size: u16) -> Self {
        Self::Value {
            elements: vec![ValueElement {
                offset,
                size,
                source_offset: 0,
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelData {
    pub simd_size: u32,
    pub num_local_id_channels: u32,
    pub kernel_start_address: u64,
    /// Instruction offset that skips the per-thread payload load when hardware generates IDs.
    pub skip_per_thread_data_load: u32,
    pub requires_workgroup_walk_order: bool,
    pub workgroup_walk_order: [u8; 3],
    /// Full cross-thread payload size, including whatever lands in the inline window.
    pub cross_thread_data_size: u32,
    /// SLM the kernel declares statically, on top of SLM arguments.
    pub slm_inline_size: u32,
}

impl Default for KernelData {
    fn default() -> Self {
        Self {
            simd_size: 32,
            num_local_id_channels: 0,
            kernel_start_address: 0,
            skip_per_thread_data_load: 0,
            requires_workgroup_walk_order: false,
            workgroup_walk_order: [0, 1, 2],
            cross_thread_data_size: 0,
            slm_inline_size: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelDescriptor {
    pub name: String,
    pub data: KernelData,
    pub offsets: CrossThreadOffsets,
    pub args: Vec<KernelArg>,
}

impl KernelDescriptor {
    pub fn local_id_channels_mask(&self) -> u32 {
        (1u32 << self.data.num_local_id_channels.min(3)) - 1
    }
}

/// Dispatch geometry a kernel is recorded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGeometry {
    pub group_count: Dim3,
    pub group_size: Dim3,
    pub global_offset: Dim3,
}

impl Default for DispatchGeometry {
    fn default() -> Self {
        Self {
            group_count: [1, 1, 1],
            group_size: [1, 1, 1],
            global_offset: [0, 0, 0],
        }
    }
}
