//! Graphics allocations, the tracked (SVM) allocation table and the device a command list records
//! for.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use mcl_hw::GpuFamily;
use tracing::debug;

use crate::types::GpuAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AllocationId(u64);

impl AllocationId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct GraphicsAllocation {
    id: AllocationId,
    gpu_address: GpuAddress,
    size: u64,
    root_device_index: u32,
}

impl GraphicsAllocation {
    pub fn new(gpu_address: GpuAddress, size: u64, root_device_index: u32) -> Self {
        Self {
            id: AllocationId::next(),
            gpu_address,
            size,
            root_device_index,
        }
    }

    pub fn id(&self) -> AllocationId {
        self.id
    }

    pub fn gpu_address(&self) -> GpuAddress {
        self.gpu_address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn root_device_index(&self) -> u32 {
        self.root_device_index
    }
}

#[derive(Debug, Clone)]
pub struct SvmAllocation {
    pub cpu_base: u64,
    pub size: u64,
    pub allocation: Rc<GraphicsAllocation>,
}

/// Host-visible allocations keyed by their CPU base pointer.
#[derive(Debug, Default)]
pub struct SvmAllocations {
    by_base: BTreeMap<u64, SvmAllocation>,
}

impl SvmAllocations {
    pub fn insert(&mut self, cpu_base: u64, size: u64, allocation: Rc<GraphicsAllocation>) {
        self.by_base.insert(
            cpu_base,
            SvmAllocation {
                cpu_base,
                size,
                allocation,
            },
        );
    }

    pub fn remove(&mut self, cpu_base: u64) -> Option<SvmAllocation> {
        self.by_base.remove(&cpu_base)
    }

    /// Finds the allocation containing `ptr`.
    pub fn find(&self, ptr: u64) -> Option<&SvmAllocation> {
        let (_, entry) = self.by_base.range(..=ptr).next_back()?;
        (ptr - entry.cpu_base < entry.size).then_some(entry)
    }

    pub fn len(&self) -> usize {
        self.by_base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_base.is_empty()
    }
}

/// GPU address a buffer argument resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedPointer {
    Tracked {
        gpu_address: GpuAddress,
        allocation: Rc<GraphicsAllocation>,
    },
    /// Shared-system pointer passed to the kernel as-is.
    System(GpuAddress),
}

impl ResolvedPointer {
    pub fn gpu_address(&self) -> GpuAddress {
        match self {
            Self::Tracked { gpu_address, .. } => *gpu_address,
            Self::System(address) => *address,
        }
    }

    pub fn allocation(&self) -> Option<&Rc<GraphicsAllocation>> {
        match self {
            Self::Tracked { allocation, .. } => Some(allocation),
            Self::System(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct Device {
    root_device_index: u32,
    family: &'static dyn GpuFamily,
    svm: RefCell<SvmAllocations>,
    peer_allocations: RefCell<HashMap<AllocationId, Rc<GraphicsAllocation>>>,
    next_gpu_address: RefCell<GpuAddress>,
}

impl Device {
    const HEAP_BASE: GpuAddress = 0x1_0000_0000;

    pub fn new(root_device_index: u32, family: &'static dyn GpuFamily) -> Self {
        Self {
            root_device_index,
            family,
            svm: RefCell::new(SvmAllocations::default()),
            peer_allocations: RefCell::new(HashMap::new()),
            next_gpu_address: RefCell::new(Self::HEAP_BASE + (u64::from(root_device_index) << 40)),
        }
    }

    pub fn root_device_index(&self) -> u32 {
        self.root_device_index
    }

    pub fn family(&self) -> &'static dyn GpuFamily {
        self.family
    }

    /// Allocates device memory at the next free 64 KiB aligned GPU address.
    pub fn allocate(&self, size: u64) -> Rc<GraphicsAllocation> {
        let mut next = self.next_gpu_address.borrow_mut();
        let gpu_address = *next;
        *next += size.max(1).div_ceil(0x1_0000) * 0x1_0000;
        Rc::new(GraphicsAllocation::new(gpu_address, size, self.root_device_index))
    }

    /// Allocates and registers a host-visible allocation whose CPU mapping starts at `cpu_base`.
    pub fn allocate_svm(&self, cpu_base: u64, size: u64) -> Rc<GraphicsAllocation> {
        let allocation = self.allocate(size);
        self.svm.borrow_mut().insert(cpu_base, size, allocation.clone());
        allocation
    }

    pub fn free_svm(&self, cpu_base: u64) {
        self.svm.borrow_mut().remove(cpu_base);
    }

    pub fn resolve_pointer(&self, ptr: u64) -> ResolvedPointer {
        match self.svm.borrow().find(ptr) {
            Some(entry) => ResolvedPointer::Tracked {
                gpu_address: entry.allocation.gpu_address() + (ptr - entry.cpu_base),
                allocation: entry.allocation.clone(),
            },
            None => ResolvedPointer::System(ptr),
        }
    }

    /// Returns this device's view of an allocation owned by another root device, importing it on
    /// first use.
    pub fn import_peer_allocation(&self, allocation: &Rc<GraphicsAllocation>) -> Rc<GraphicsAllocation> {
        if allocation.root_device_index() == self.root_device_index {
            return allocation.clone();
        }
        self.peer_allocations
            .borrow_mut()
            .entry(allocation.id())
            .or_insert_with(|| {
                debug!(
                    source = allocation.root_device_index(),
                    target = self.root_device_index,
                    gpu_address = allocation.gpu_address(),
                    "importing peer allocation"
                );
                Rc::new(GraphicsAllocation::new(
                    allocation.gpu_address(),
                    allocation.size(),
                    self.root_device_index,
                ))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcl_hw::XE_HPC;

    #[test]
    fn pointer_inside_tracked_allocation_is_rebased() {
        let device = Device::new(0, &XE_HPC);
        let alloc = device.allocate_svm(0x7000_0000, 0x1000);
        let resolved = device.resolve_pointer(0x7000_0010);
        assert_eq!(resolved.gpu_address(), alloc.gpu_address() + 0x10);
        assert_eq!(resolved.allocation().map(|a| a.id()), Some(alloc.id()));
    }

    #[test]
    fn pointer_past_the_end_is_a_system_pointer() {
        let device = Device::new(0, &XE_HPC);
        device.allocate_svm(0x7000_0000, 0x1000);
        assert_eq!(device.resolve_pointer(0x7000_1000), ResolvedPointer::System(0x7000_1000));
        assert_eq!(device.resolve_pointer(0x10), ResolvedPointer::System(0x10));
    }

    #[test]
    fn peer_import_is_cached_per_source_allocation() {
        let owner = Device::new(1, &XE_HPC);
        let device = Device::new(0, &XE_HPC);
        let counter = owner.allocate(64);

        let a = device.import_peer_allocation(&counter);
        let b = device.import_peer_allocation(&counter);
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(a.root_device_index(), 0);
        assert_eq!(a.gpu_address(), counter.gpu_address());

        let local = device.allocate(64);
        assert!(Rc::ptr_eq(&device.import_peer_allocation(&local), &local));
    }

    #[test]
    fn freed_svm_allocation_is_no_longer_tracked() {
        let device = Device::new(0, &XE_HPC);
        device.allocate_svm(0x5000, 0x100);
        device.free_svm(0x5000);
        assert!(matches!(device.resolve_pointer(0x5000), ResolvedPointer::System(_)));
    }
}
