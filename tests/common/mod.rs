#![allow(dead_code)]

use std::rc::Rc;
use std::sync::Once;

use mcl::{Device, DispatchId, MclConfig, MutableCommandList};
use mcl_hw::GpuFamily;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    });
}

pub fn new_list(family: &'static dyn GpuFamily, config: MclConfig) -> MutableCommandList {
    init_tracing();
    MutableCommandList::new(Rc::new(Device::new(0, family)), config)
}

/// Reads `size` bytes of a dispatch's cross-thread payload wherever they landed.
pub fn payload_bytes(list: &MutableCommandList, dispatch: DispatchId, offset: usize, size: usize) -> Vec<u8> {
    let layout = list
        .dispatch(dispatch)
        .expect("dispatch")
        .indirect_data()
        .payload();
    let (inline, heap) = layout.locate(offset, size);
    inline
        .into_iter()
        .chain(heap)
        .flat_map(|site| site.read(list.container()).expect("site in range").to_vec())
        .collect()
}

pub fn payload_u32(list: &MutableCommandList, dispatch: DispatchId, offset: usize) -> u32 {
    let b = payload_bytes(list, dispatch, offset, 4);
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// Every byte the GPU would see: command stream followed by the indirect heap.
pub fn snapshot(list: &MutableCommandList) -> (Vec<u8>, Vec<u8>) {
    (
        list.container().stream.as_bytes().to_vec(),
        list.container().ioh.as_bytes().to_vec(),
    )
}

pub fn dispatch_of(list: &MutableCommandList, command_id: u64) -> DispatchId {
    list.command(command_id)
        .and_then(|c| c.dispatch)
        .expect("recorded dispatch")
}
