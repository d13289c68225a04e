//! The event contract the mutation engine consumes.
//!
//! Events are owned elsewhere and shared between command lists; the engine only reads addresses
//! and counter state from them and pushes back the few values a rebind has to transfer.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::allocation::GraphicsAllocation;
use crate::types::{CommandListId, GpuAddress};

/// Counter storage shared by a command list and the counter-based events it signals.
#[derive(Debug)]
pub struct InOrderExecInfo {
    base_device_address: GpuAddress,
    device_counter_allocation: Option<Rc<GraphicsAllocation>>,
    counter_value: Cell<u64>,
    num_device_partitions_to_wait: u32,
    external_memory: bool,
}

impl InOrderExecInfo {
    pub fn new(device_counter_allocation: Rc<GraphicsAllocation>) -> Self {
        Self {
            base_device_address: device_counter_allocation.gpu_address(),
            device_counter_allocation: Some(device_counter_allocation),
            counter_value: Cell::new(0),
            num_device_partitions_to_wait: 1,
            external_memory: false,
        }
    }

    /// Counter living in imported memory; waits compare against a fixed value instead of a
    /// patched one.
    pub fn external(base_device_address: GpuAddress, counter_value: u64) -> Self {
        Self {
            base_device_address,
            device_counter_allocation: None,
            counter_value: Cell::new(counter_value),
            num_device_partitions_to_wait: 1,
            external_memory: true,
        }
    }

    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.num_device_partitions_to_wait = partitions.max(1);
        self
    }

    pub fn base_device_address(&self) -> GpuAddress {
        self.base_device_address
    }

    pub fn device_counter_allocation(&self) -> Option<&Rc<GraphicsAllocation>> {
        self.device_counter_allocation.as_ref()
    }

    pub fn counter_value(&self) -> u64 {
        self.counter_value.get()
    }

    pub fn set_counter_value(&self, value: u64) {
        self.counter_value.set(value);
    }

    pub fn num_device_partitions_to_wait(&self) -> u32 {
        self.num_device_partitions_to_wait
    }

    pub fn is_external_memory_exec_info(&self) -> bool {
        self.external_memory
    }
}

pub trait Event: fmt::Debug {
    fn gpu_address(&self) -> GpuAddress;

    /// Event pool storage, made resident while the event is bound.
    fn allocation(&self) -> Option<Rc<GraphicsAllocation>>;

    fn is_counter_based(&self) -> bool;

    fn in_order_exec_info(&self) -> Option<Rc<InOrderExecInfo>>;

    fn in_order_allocation_offset(&self) -> u64;

    fn in_order_exec_base_signal_value(&self) -> u64;

    /// Non-zero for events signalled by atomically incrementing the counter.
    fn in_order_increment_value(&self) -> u64 {
        0
    }

    /// Command list whose in-order counter signals this event.
    fn producer(&self) -> Option<CommandListId>;

    fn has_in_order_timestamp_node(&self) -> bool {
        false
    }

    fn kernel_count(&self) -> u32 {
        1
    }

    fn packets_in_use(&self) -> u32 {
        1
    }

    fn packets_to_wait(&self) -> u32 {
        1
    }

    fn single_packet_size(&self) -> u64 {
        0x40
    }

    /// Offset of the field a wait polls, inside each packet.
    fn completion_field_offset(&self) -> u64 {
        0
    }

    fn set_kernel_count(&self, kernel_count: u32);

    fn set_packets_in_use(&self, packets: u32);

    /// Re-targets a counter-based event at another command list's counter.
    fn update_in_order_exec_state(&self, exec_info: Rc<InOrderExecInfo>, signal_value: u64, allocation_offset: u64);

    fn reset_in_order_timestamp_node(&self) {}
}

pub type EventRef = Rc<dyn Event>;

/// Identity comparison; vtable pointers are ignored.
pub fn same_event(a: &EventRef, b: &EventRef) -> bool {
    std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}

pub(crate) fn same_optional_event(a: Option<&EventRef>, b: Option<&EventRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => same_event(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Register pair the qword wait compares against.
pub(crate) const SEMAPHORE_COMPARE_LOW_REGISTER: u32 = 0x2600;
pub(crate) const SEMAPHORE_COMPARE_HIGH_REGISTER: u32 = 0x2604;
/// Timestamp register sampled by profiling stores.
pub(crate) const TIMESTAMP_REGISTER: u32 = 0x2358;
/// Value of an unsignalled packet.
pub(crate) const EVENT_STATE_CLEARED: u32 = 1;
pub(crate) const EVENT_STATE_SIGNALED: u64 = 0;

pub(crate) fn low_part(v: u64) -> u32 {
    v as u32
}

pub(crate) fn high_part(v: u64) -> u32 {
    (v >> 32) as u32
}
