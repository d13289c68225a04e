//! Test doubles and fixtures shared by unit and integration tests.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::allocation::{Device, GraphicsAllocation};
use crate::event::{Event, EventRef, InOrderExecInfo};
use crate::kernel::{CrossThreadOffsets, KernelArg, KernelData, KernelDescriptor};
use crate::types::{CommandListId, GpuAddress};

/// Arguments of one `update_in_order_exec_state` call.
#[derive(Debug, Clone)]
pub struct ExecStateUpdate {
    pub exec_info: Rc<InOrderExecInfo>,
    pub signal_value: u64,
    pub allocation_offset: u64,
}

/// Event with plain, freely adjustable state.
#[derive(Debug, Default)]
pub struct MockEvent {
    pub gpu_address: Cell<GpuAddress>,
    pub allocation: RefCell<Option<Rc<GraphicsAllocation>>>,
    pub counter_based: Cell<bool>,
    pub exec_info: RefCell<Option<Rc<InOrderExecInfo>>>,
    pub allocation_offset: Cell<u64>,
    pub base_signal_value: Cell<u64>,
    pub increment_value: Cell<u64>,
    pub producer: Cell<Option<CommandListId>>,
    pub timestamp_node: Cell<bool>,
    pub kernel_count: Cell<u32>,
    pub packets_in_use: Cell<u32>,
    pub packets_to_wait: Cell<u32>,
    pub timestamp_resets: Cell<u32>,
    pub exec_state_updates: RefCell<Vec<ExecStateUpdate>>,
}

impl MockEvent {
    /// Regular event backed by a fresh pool allocation.
    pub fn regular(device: &Device) -> Self {
        let allocation = device.allocate(0x100);
        let ev = Self {
            kernel_count: Cell::new(1),
            packets_in_use: Cell::new(1),
            packets_to_wait: Cell::new(1),
            ..Self::default()
        };
        ev.gpu_address.set(allocation.gpu_address());
        *ev.allocation.borrow_mut() = Some(allocation);
        ev
    }

    /// Counter-based event signalled through `exec_info` by `producer`.
    pub fn counter_based(
        exec_info: Rc<InOrderExecInfo>,
        producer: Option<CommandListId>,
        base_signal_value: u64,
    ) -> Self {
        Self {
            counter_based: Cell::new(true),
            exec_info: RefCell::new(Some(exec_info)),
            base_signal_value: Cell::new(base_signal_value),
            producer: Cell::new(producer),
            kernel_count: Cell::new(1),
            packets_in_use: Cell::new(1),
            packets_to_wait: Cell::new(1),
            ..Self::default()
        }
    }

    pub fn with_packets(self, packets: u32) -> Self {
        self.packets_in_use.set(packets);
        self.packets_to_wait.set(packets);
        self
    }

    pub fn with_timestamp_node(self) -> Self {
        self.timestamp_node.set(true);
        self
    }

    pub fn with_increment(self, value: u64) -> Self {
        self.increment_value.set(value);
        self
    }

    pub fn into_ref(self) -> EventRef {
        Rc::new(self)
    }
}

impl Event for MockEvent {
    fn gpu_address(&self) -> GpuAddress {
        self.gpu_address.get()
    }

    fn allocation(&self) -> Option<Rc<GraphicsAllocation>> {
        self.allocation.borrow().clone()
    }

    fn is_counter_based(&self) -> bool {
        self.counter_based.get()
    }

    fn in_order_exec_info(&self) -> Option<Rc<InOrderExecInfo>> {
        self.exec_info.borrow().clone()
    }

    fn in_order_allocation_offset(&self) -> u64 {
        self.allocation_offset.get()
    }

    fn in_order_exec_base_signal_value(&self) -> u64 {
        self.base_signal_value.get()
    }

    fn in_order_increment_value(&self) -> u64 {
        self.increment_value.get()
    }

    fn producer(&self) -> Option<CommandListId> {
        self.producer.get()
    }

    fn has_in_order_timestamp_node(&self) -> bool {
        self.timestamp_node.get()
    }

    fn kernel_count(&self) -> u32 {
        self.kernel_count.get()
    }

    fn packets_in_use(&self) -> u32 {
        self.packets_in_use.get()
    }

    fn packets_to_wait(&self) -> u32 {
        self.packets_to_wait.get()
    }

    fn set_kernel_count(&self, kernel_count: u32) {
        self.kernel_count.set(kernel_count);
    }

    fn set_packets_in_use(&self, packets: u32) {
        self.packets_in_use.set(packets);
    }

    fn update_in_order_exec_state(&self, exec_info: Rc<InOrderExecInfo>, signal_value: u64, allocation_offset: u64) {
        *self.exec_info.borrow_mut() = Some(exec_info.clone());
        self.base_signal_value.set(signal_value);
        self.allocation_offset.set(allocation_offset);
        self.exec_state_updates.borrow_mut().push(ExecStateUpdate {
            exec_info,
            signal_value,
            allocation_offset,
        });
    }

    fn reset_in_order_timestamp_node(&self) {
        self.timestamp_resets.set(self.timestamp_resets.get() + 1);
    }
}

/// Cross-thread layout used by [`kernel`]: dispatch fields first, arguments from 0x40.
pub fn dispatch_offsets() -> CrossThreadOffsets {
    CrossThreadOffsets {
        num_work_groups: CrossThreadOffsets::dim3_at(0x00),
        global_work_size: CrossThreadOffsets::dim3_at(0x0c),
        local_work_size: CrossThreadOffsets::dim3_at(0x18),
        global_work_offset: CrossThreadOffsets::dim3_at(0x24),
        work_dimensions: Some(0x30),
        ..CrossThreadOffsets::default()
    }
}

/// First cross-thread offset free for kernel arguments.
pub const ARGS_BASE: u16 = 0x40;

/// Kernel with the standard dispatch layout and the given arguments.
pub fn kernel(name: &str, args: Vec<KernelArg>, cross_thread_data_size: u32) -> KernelDescriptor {
    KernelDescriptor {
        name: name.to_owned(),
        data: KernelData {
            simd_size: 16,
            kernel_start_address: 0xff00_0000,
            cross_thread_data_size,
            ..KernelData::default()
        },
        offsets: dispatch_offsets(),
        args,
    }
}
