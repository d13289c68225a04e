mod common;

use mcl::testing::kernel;
use mcl::{ArgValue, KernelArg, KernelLaunch, MclConfig};
use mcl_hw::{GpuFamily, XE_HPC};
use proptest::prelude::*;

use common::{dispatch_of, new_list, payload_bytes};

const CROSS_THREAD_SIZE: u16 = 0x80;

fn case() -> impl Strategy<Value = (u16, Vec<u8>, Vec<u8>)> {
    (0x34u16..0x70, 1usize..=16).prop_flat_map(|(offset, size)| {
        let size = size.min(usize::from(CROSS_THREAD_SIZE - offset));
        (
            Just(offset),
            prop::collection::vec(any::<u8>(), size),
            prop::collection::vec(any::<u8>(), size),
        )
    })
}

proptest! {
    #[test]
    fn value_straddling_inline_window_reads_back((offset, first, second) in case()) {
        let inline_size = XE_HPC.walker().inline_data_size;
        let size = first.len() as u16;
        let kernel = kernel("split", vec![KernelArg::value(offset, size)], u32::from(CROSS_THREAD_SIZE));

        let mut list = new_list(&XE_HPC, MclConfig::immediate());
        let args = [ArgValue::Bytes(&first)];
        let id = list.append_launch_kernel(&KernelLaunch::new(&kernel, &args)).unwrap();
        let dispatch = dispatch_of(&list, id);
        prop_assert_eq!(payload_bytes(&list, dispatch, usize::from(offset), first.len()), first.clone());

        let var = list.command(id).unwrap().kernel_arguments[0].unwrap();
        let chunk = list.variable(var).unwrap().value().unwrap().chunks[0];
        let start = usize::from(offset);
        prop_assert_eq!(chunk.is_split(), start < inline_size && start + first.len() > inline_size);

        list.set_value(var, ArgValue::Bytes(&second)).unwrap();
        prop_assert_eq!(payload_bytes(&list, dispatch, start, second.len()), second);
    }
}
