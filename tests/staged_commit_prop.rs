mod common;

use mcl::testing::{kernel, ARGS_BASE};
use mcl::{ArgValue, Dim3, DispatchGeometry, KernelArg, KernelLaunch, MclConfig, MutableCommandDesc, MutableCommandList};
use mcl_hw::{GpuFamily, GEN12LP, XE_HPC};
use proptest::prelude::*;

use common::{new_list, snapshot};

const VALUE_ARG: u16 = ARGS_BASE;
const SLM_A_ARG: u16 = ARGS_BASE + 8;
const SLM_B_ARG: u16 = ARGS_BASE + 12;

#[derive(Debug, Clone)]
enum Update {
    GroupCount(Dim3),
    GroupSize(Dim3),
    GlobalOffset(Dim3),
    Value(u32),
    SlmA(u32),
    SlmB(u32),
}

fn update_strategy() -> impl Strategy<Value = Update> {
    prop_oneof![
        (1u32..16, 1u32..8, 1u32..4).prop_map(|(x, y, z)| Update::GroupCount([x, y, z])),
        (1u32..=64, 1u32..=4, 1u32..=2).prop_map(|(x, y, z)| Update::GroupSize([x, y, z])),
        (0u32..1024, 0u32..1024, 0u32..1024).prop_map(|(x, y, z)| Update::GlobalOffset([x, y, z])),
        any::<u32>().prop_map(Update::Value),
        (0u32..8192).prop_map(Update::SlmA),
        (0u32..8192).prop_map(Update::SlmB),
    ]
}

fn record(family: &'static dyn GpuFamily, config: MclConfig) -> (MutableCommandList, u64) {
    let mut kernel = kernel(
        "prop",
        vec![
            KernelArg::value(VALUE_ARG, 4),
            KernelArg::slm_pointer(SLM_A_ARG, 256),
            KernelArg::slm_pointer(SLM_B_ARG, 1024),
        ],
        0x60,
    );
    kernel.data.num_local_id_channels = 3;
    kernel.data.skip_per_thread_data_load = 0x40;

    let mut list = new_list(family, config);
    let value = 1u32.to_le_bytes();
    let args = [ArgValue::Bytes(&value), ArgValue::SlmSize(64), ArgValue::SlmSize(128)];
    let launch = KernelLaunch::new(&kernel, &args).with_geometry(DispatchGeometry {
        group_count: [2, 1, 1],
        group_size: [16, 1, 1],
        global_offset: [0, 0, 0],
    });
    let id = list.append_launch_kernel(&launch).expect("record");
    list.close();
    (list, id)
}

fn apply(list: &mut MutableCommandList, command_id: u64, update: &Update) {
    let bytes;
    let desc = match *update {
        Update::GroupCount(group_count) => MutableCommandDesc::GroupCount {
            command_id,
            group_count,
        },
        Update::GroupSize(group_size) => MutableCommandDesc::GroupSize { command_id, group_size },
        Update::GlobalOffset(global_offset) => MutableCommandDesc::GlobalOffset {
            command_id,
            global_offset,
        },
        Update::Value(v) => {
            bytes = v.to_le_bytes();
            MutableCommandDesc::KernelArgument {
                command_id,
                arg_index: 0,
                value: ArgValue::Bytes(&bytes),
            }
        }
        Update::SlmA(size) => MutableCommandDesc::KernelArgument {
            command_id,
            arg_index: 1,
            value: ArgValue::SlmSize(size),
        },
        Update::SlmB(size) => MutableCommandDesc::KernelArgument {
            command_id,
            arg_index: 2,
            value: ArgValue::SlmSize(size),
        },
    };
    list.update_mutable_commands(&[desc]).expect("update");
}

fn staged_matches_immediate(family: &'static dyn GpuFamily, updates: &[Update]) -> Result<(), TestCaseError> {
    let (mut immediate, immediate_id) = record(family, MclConfig::immediate());
    let (mut staged, staged_id) = record(family, MclConfig::default());

    for update in updates {
        apply(&mut immediate, immediate_id, update);
        apply(&mut staged, staged_id, update);
    }
    immediate.close();
    staged.close();

    prop_assert_eq!(staged.staged_variable_count(), 0);
    prop_assert_eq!(snapshot(&staged), snapshot(&immediate));
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn staged_commit_matches_immediate_on_xe_hpc(updates in prop::collection::vec(update_strategy(), 1..12)) {
        staged_matches_immediate(&XE_HPC, &updates)?;
    }

    #[test]
    fn staged_commit_matches_immediate_on_gen12lp(updates in prop::collection::vec(update_strategy(), 1..12)) {
        staged_matches_immediate(&GEN12LP, &updates)?;
    }
}
