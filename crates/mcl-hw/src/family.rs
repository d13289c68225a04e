//! Runtime description of a GPU family: command field offsets and the few encoding rules the
//! mutation engine depends on.
//!
//! A family is picked once per device (see [`gpu_family_by_name`]) and then passed around as
//! `&'static dyn GpuFamily`.

use core::fmt;
use core::mem::offset_of;

use crate::cmd::{
    CmdHdr, CmdOpcode, ComputeWalkerXeHpcCmd, GpgpuWalkerGen12LpCmd, LoadRegisterImmCmd,
    PipeControlCmd, SemaphoreWaitCmd, StoreDataImmCmd, StoreRegisterMemCmd,
};

/// Field offsets (in bytes, relative to the start of the command) of a dispatch walker.
///
/// Optional fields do not exist on every family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkerLayout {
    pub opcode: CmdOpcode,
    pub size_bytes: usize,
    pub kernel_start_pointer: usize,
    pub indirect_data_start_address: usize,
    pub indirect_data_length: usize,
    pub thread_group_id: [usize; 3],
    pub local_maximum: Option<[usize; 3]>,
    pub emit_local_id: Option<usize>,
    pub generate_local_id: Option<usize>,
    pub walk_order: Option<usize>,
    pub threads_per_thread_group: usize,
    pub execution_mask: usize,
    pub shared_local_memory_size: usize,
    pub post_sync_address: Option<usize>,
    /// Offset of the inline data window.
    pub inline_data_offset: usize,
    /// Size of the inline data window; 0 when the family has none.
    pub inline_data_size: usize,
}

impl WalkerLayout {
    pub fn has_inline_data(&self) -> bool {
        self.inline_data_size != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreWaitLayout {
    pub size_bytes: usize,
    pub semaphore_data: usize,
    pub semaphore_address: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreDataImmLayout {
    pub size_bytes: usize,
    pub address: usize,
    pub data_dword0: usize,
    pub data_dword1: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreRegisterMemLayout {
    pub size_bytes: usize,
    pub register_address: usize,
    pub memory_address: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRegisterImmLayout {
    pub size_bytes: usize,
    pub register_offset: usize,
    pub data: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeControlLayout {
    pub size_bytes: usize,
    pub flags: usize,
    pub post_sync_address: usize,
    pub immediate_data: usize,
}

pub const SEMAPHORE_WAIT_LAYOUT: SemaphoreWaitLayout = SemaphoreWaitLayout {
    size_bytes: SemaphoreWaitCmd::SIZE_BYTES,
    semaphore_data: offset_of!(SemaphoreWaitCmd, semaphore_data),
    semaphore_address: offset_of!(SemaphoreWaitCmd, semaphore_address),
};

pub const STORE_DATA_IMM_LAYOUT: StoreDataImmLayout = StoreDataImmLayout {
    size_bytes: StoreDataImmCmd::SIZE_BYTES,
    address: offset_of!(StoreDataImmCmd, address),
    data_dword0: offset_of!(StoreDataImmCmd, data_dword0),
    data_dword1: offset_of!(StoreDataImmCmd, data_dword1),
};

pub const STORE_REGISTER_MEM_LAYOUT: StoreRegisterMemLayout = StoreRegisterMemLayout {
    size_bytes: StoreRegisterMemCmd::SIZE_BYTES,
    register_address: offset_of!(StoreRegisterMemCmd, register_address),
    memory_address: offset_of!(StoreRegisterMemCmd, memory_address),
};

pub const LOAD_REGISTER_IMM_LAYOUT: LoadRegisterImmLayout = LoadRegisterImmLayout {
    size_bytes: LoadRegisterImmCmd::SIZE_BYTES,
    register_offset: offset_of!(LoadRegisterImmCmd, register_offset),
    data: offset_of!(LoadRegisterImmCmd, data),
};

pub const PIPE_CONTROL_LAYOUT: PipeControlLayout = PipeControlLayout {
    size_bytes: PipeControlCmd::SIZE_BYTES,
    flags: offset_of!(PipeControlCmd, flags),
    post_sync_address: offset_of!(PipeControlCmd, post_sync_address),
    immediate_data: offset_of!(PipeControlCmd, immediate_data),
};

pub const GEN12LP_WALKER_LAYOUT: WalkerLayout = WalkerLayout {
    opcode: CmdOpcode::GpgpuWalker,
    size_bytes: GpgpuWalkerGen12LpCmd::SIZE_BYTES,
    kernel_start_pointer: offset_of!(GpgpuWalkerGen12LpCmd, kernel_start_pointer),
    indirect_data_start_address: offset_of!(GpgpuWalkerGen12LpCmd, indirect_data_start_address),
    indirect_data_length: offset_of!(GpgpuWalkerGen12LpCmd, indirect_data_length),
    thread_group_id: [
        offset_of!(GpgpuWalkerGen12LpCmd, thread_group_id_x_dimension),
        offset_of!(GpgpuWalkerGen12LpCmd, thread_group_id_y_dimension),
        offset_of!(GpgpuWalkerGen12LpCmd, thread_group_id_z_dimension),
    ],
    local_maximum: None,
    emit_local_id: None,
    generate_local_id: None,
    walk_order: None,
    threads_per_thread_group: offset_of!(GpgpuWalkerGen12LpCmd, threads_per_thread_group),
    execution_mask: offset_of!(GpgpuWalkerGen12LpCmd, execution_mask),
    shared_local_memory_size: offset_of!(GpgpuWalkerGen12LpCmd, shared_local_memory_size),
    post_sync_address: None,
    inline_data_offset: GpgpuWalkerGen12LpCmd::SIZE_BYTES,
    inline_data_size: 0,
};

pub const XE_HPC_WALKER_LAYOUT: WalkerLayout = WalkerLayout {
    opcode: CmdOpcode::ComputeWalker,
    size_bytes: ComputeWalkerXeHpcCmd::SIZE_BYTES,
    kernel_start_pointer: offset_of!(ComputeWalkerXeHpcCmd, kernel_start_pointer),
    indirect_data_start_address: offset_of!(ComputeWalkerXeHpcCmd, indirect_data_start_address),
    indirect_data_length: offset_of!(ComputeWalkerXeHpcCmd, indirect_data_length),
    thread_group_id: [
        offset_of!(ComputeWalkerXeHpcCmd, thread_group_id_x_dimension),
        offset_of!(ComputeWalkerXeHpcCmd, thread_group_id_y_dimension),
        offset_of!(ComputeWalkerXeHpcCmd, thread_group_id_z_dimension),
    ],
    local_maximum: Some([
        offset_of!(ComputeWalkerXeHpcCmd, local_x_maximum),
        offset_of!(ComputeWalkerXeHpcCmd, local_y_maximum),
        offset_of!(ComputeWalkerXeHpcCmd, local_z_maximum),
    ]),
    emit_local_id: Some(offset_of!(ComputeWalkerXeHpcCmd, emit_local_id)),
    generate_local_id: Some(offset_of!(ComputeWalkerXeHpcCmd, generate_local_id)),
    walk_order: Some(offset_of!(ComputeWalkerXeHpcCmd, walk_order)),
    threads_per_thread_group: offset_of!(ComputeWalkerXeHpcCmd, threads_per_thread_group),
    execution_mask: offset_of!(ComputeWalkerXeHpcCmd, execution_mask),
    shared_local_memory_size: offset_of!(ComputeWalkerXeHpcCmd, shared_local_memory_size),
    post_sync_address: Some(offset_of!(ComputeWalkerXeHpcCmd, post_sync_address)),
    inline_data_offset: offset_of!(ComputeWalkerXeHpcCmd, inline_data),
    inline_data_size: 4 * crate::cmd::XE_HPC_INLINE_DATA_DWORDS,
};

/// Dimension orders the hardware local ID generator can walk, indexed by their walker encoding.
pub const HW_WALK_ORDERS: [[u8; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

/// Initial field values for a freshly encoded walker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkerInit {
    pub kernel_start_pointer: u64,
    pub indirect_data_start_address: u32,
    pub indirect_data_length: u32,
    pub thread_group_dimensions: [u32; 3],
    pub local_maximum: [u32; 3],
    pub emit_local_id: u32,
    pub generate_local_id: bool,
    pub walk_order: u32,
    pub threads_per_thread_group: u32,
    pub execution_mask: u32,
    pub shared_local_memory_size: u32,
    pub post_sync_address: u64,
}

pub trait GpuFamily: fmt::Debug + Sync {
    fn name(&self) -> &'static str;

    fn walker(&self) -> &'static WalkerLayout;

    fn semaphore_wait(&self) -> &'static SemaphoreWaitLayout {
        &SEMAPHORE_WAIT_LAYOUT
    }

    fn store_data_imm(&self) -> &'static StoreDataImmLayout {
        &STORE_DATA_IMM_LAYOUT
    }

    fn store_register_mem(&self) -> &'static StoreRegisterMemLayout {
        &STORE_REGISTER_MEM_LAYOUT
    }

    fn load_register_imm(&self) -> &'static LoadRegisterImmLayout {
        &LOAD_REGISTER_IMM_LAYOUT
    }

    fn pipe_control(&self) -> &'static PipeControlLayout {
        &PIPE_CONTROL_LAYOUT
    }

    /// Register file granularity used to size per-thread payloads.
    fn grf_size(&self) -> u32;

    /// Walk orders the hardware local ID generator supports. Empty when the family cannot
    /// generate local IDs at all.
    fn hw_walk_orders(&self) -> &'static [[u8; 3]];

    /// Whether in-order counters are 64-bit (waits then need two LRI commands per semaphore).
    fn qword_in_order_counter(&self) -> bool;

    /// Encodes a total SLM size (bytes) into the walker's SLM field.
    fn encode_slm_size(&self, slm_total_size: u32) -> u32;

    fn encode_walker(&self, init: &WalkerInit) -> Vec<u8>;
}

const KB: u32 = 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct Gen12LpFamily;

impl GpuFamily for Gen12LpFamily {
    fn name(&self) -> &'static str {
        "gen12lp"
    }

    fn walker(&self) -> &'static WalkerLayout {
        &GEN12LP_WALKER_LAYOUT
    }

    fn grf_size(&self) -> u32 {
        32
    }

    fn hw_walk_orders(&self) -> &'static [[u8; 3]] {
        &[]
    }

    fn qword_in_order_counter(&self) -> bool {
        false
    }

    fn encode_slm_size(&self, slm_total_size: u32) -> u32 {
        match slm_total_size {
            0 => 0,
            s if s <= KB => 1,
            s if s <= 2 * KB => 2,
            s if s <= 4 * KB => 3,
            s if s <= 8 * KB => 4,
            s if s <= 16 * KB => 5,
            s if s <= 32 * KB => 6,
            _ => 7,
        }
    }

    fn encode_walker(&self, init: &WalkerInit) -> Vec<u8> {
        let cmd = GpgpuWalkerGen12LpCmd {
            hdr: CmdHdr::new(CmdOpcode::GpgpuWalker, GpgpuWalkerGen12LpCmd::SIZE_BYTES),
            kernel_start_pointer: init.kernel_start_pointer,
            indirect_data_start_address: init.indirect_data_start_address,
            indirect_data_length: init.indirect_data_length,
            thread_group_id_x_dimension: init.thread_group_dimensions[0],
            thread_group_id_y_dimension: init.thread_group_dimensions[1],
            thread_group_id_z_dimension: init.thread_group_dimensions[2],
            threads_per_thread_group: init.threads_per_thread_group,
            execution_mask: init.execution_mask,
            shared_local_memory_size: init.shared_local_memory_size,
        };
        bytemuck::bytes_of(&cmd).to_vec()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct XeHpcFamily;

impl GpuFamily for XeHpcFamily {
    fn name(&self) -> &'static str {
        "xe_hpc"
    }

    fn walker(&self) -> &'static WalkerLayout {
        &XE_HPC_WALKER_LAYOUT
    }

    fn grf_size(&self) -> u32 {
        64
    }

    fn hw_walk_orders(&self) -> &'static [[u8; 3]] {
        &HW_WALK_ORDERS
    }

    fn qword_in_order_counter(&self) -> bool {
        true
    }

    fn encode_slm_size(&self, slm_total_size: u32) -> u32 {
        // Sizes are not monotonic in their encoding: 24K/48K/96K were added after 64K.
        const TABLE: [(u32, u32); 11] = [
            (KB, 1),
            (2 * KB, 2),
            (4 * KB, 3),
            (8 * KB, 4),
            (16 * KB, 5),
            (24 * KB, 8),
            (32 * KB, 6),
            (48 * KB, 9),
            (64 * KB, 7),
            (96 * KB, 10),
            (128 * KB, 11),
        ];
        if slm_total_size == 0 {
            return 0;
        }
        TABLE
            .iter()
            .find(|(limit, _)| slm_total_size <= *limit)
            .map_or(11, |(_, encoded)| *encoded)
    }

    fn encode_walker(&self, init: &WalkerInit) -> Vec<u8> {
        let cmd = ComputeWalkerXeHpcCmd {
            hdr: CmdHdr::new(CmdOpcode::ComputeWalker, ComputeWalkerXeHpcCmd::SIZE_BYTES),
            kernel_start_pointer: init.kernel_start_pointer,
            indirect_data_start_address: init.indirect_data_start_address,
            indirect_data_length: init.indirect_data_length,
            thread_group_id_x_dimension: init.thread_group_dimensions[0],
            thread_group_id_y_dimension: init.thread_group_dimensions[1],
            thread_group_id_z_dimension: init.thread_group_dimensions[2],
            local_x_maximum: init.local_maximum[0],
            local_y_maximum: init.local_maximum[1],
            local_z_maximum: init.local_maximum[2],
            emit_local_id: init.emit_local_id,
            generate_local_id: init.generate_local_id as u32,
            walk_order: init.walk_order,
            threads_per_thread_group: init.threads_per_thread_group,
            execution_mask: init.execution_mask,
            shared_local_memory_size: init.shared_local_memory_size,
            post_sync_address: init.post_sync_address,
            post_sync_immediate_data: 0,
            inline_data: [0; crate::cmd::XE_HPC_INLINE_DATA_DWORDS],
        };
        bytemuck::bytes_of(&cmd).to_vec()
    }
}

pub static GEN12LP: Gen12LpFamily = Gen12LpFamily;
pub static XE_HPC: XeHpcFamily = XeHpcFamily;

/// Looks up a family by the name reported from [`GpuFamily::name`].
pub fn gpu_family_by_name(name: &str) -> Option<&'static dyn GpuFamily> {
    match name {
        "gen12lp" => Some(&GEN12LP),
        "xe_hpc" => Some(&XE_HPC),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_window_is_trailing_part_of_xe_hpc_walker() {
        let layout = XE_HPC.walker();
        assert!(layout.has_inline_data());
        assert_eq!(layout.inline_data_offset + layout.inline_data_size, layout.size_bytes);
        assert!(!GEN12LP.walker().has_inline_data());
    }

    #[test]
    fn encoded_walker_places_fields_at_layout_offsets() {
        let init = WalkerInit {
            kernel_start_pointer: 0x1234_5678_9000,
            thread_group_dimensions: [4, 2, 1],
            threads_per_thread_group: 3,
            ..WalkerInit::default()
        };
        for family in [&GEN12LP as &dyn GpuFamily, &XE_HPC] {
            let bytes = family.encode_walker(&init);
            let layout = family.walker();
            assert_eq!(bytes.len(), layout.size_bytes);

            let ksp_at = layout.kernel_start_pointer;
            let ksp = u64::from_le_bytes(bytes[ksp_at..ksp_at + 8].try_into().unwrap());
            assert_eq!(ksp, 0x1234_5678_9000);

            let y_at = layout.thread_group_id[1];
            let y = u32::from_le_bytes(bytes[y_at..y_at + 4].try_into().unwrap());
            assert_eq!(y, 2);
        }
    }

    #[test]
    fn slm_encoding_rounds_up_to_next_supported_size() {
        assert_eq!(GEN12LP.encode_slm_size(0), 0);
        assert_eq!(GEN12LP.encode_slm_size(1), 1);
        assert_eq!(GEN12LP.encode_slm_size(3 * KB), 3);
        assert_eq!(XE_HPC.encode_slm_size(20 * KB), 8);
        assert_eq!(XE_HPC.encode_slm_size(33 * KB), 9);
        assert_eq!(XE_HPC.encode_slm_size(1024 * KB), 11);
    }

    #[test]
    fn family_lookup_by_name() {
        assert_eq!(gpu_family_by_name("xe_hpc").map(|f| f.name()), Some("xe_hpc"));
        assert!(gpu_family_by_name("gen9").is_none());
    }
}
