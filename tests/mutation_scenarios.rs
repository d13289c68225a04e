mod common;

use std::rc::Rc;

use mcl::testing::{kernel, MockEvent, ARGS_BASE};
use mcl::{
    ArgValue, DispatchGeometry, Event, EventRef, KernelArg, KernelLaunch, MclConfig, MclError, MutableCommandDesc,
    MutationFlags, VariableKind,
};
use mcl_hw::XE_HPC;
use pretty_assertions::assert_eq;

use common::{dispatch_of, new_list, payload_u32};

const SRC_ARG: u16 = ARGS_BASE;
const DST_ARG: u16 = ARGS_BASE + 8;
const COUNT_ARG: u16 = ARGS_BASE + 16;

fn copy_kernel() -> mcl::KernelDescriptor {
    kernel(
        "copy",
        vec![
            KernelArg::global_pointer(SRC_ARG),
            KernelArg::global_pointer(DST_ARG),
            KernelArg::value(COUNT_ARG, 4),
        ],
        0x80,
    )
}

#[test]
fn producer_and_consumer_lists_rebind_counter_waits() {
    let mut producer = new_list(&XE_HPC, MclConfig::default());
    let mut consumer = new_list(&XE_HPC, MclConfig::default());
    let kernel = copy_kernel();
    let count = 256u32.to_le_bytes();
    let args = [ArgValue::Buffer(None), ArgValue::Buffer(None), ArgValue::Bytes(&count)];

    let done: EventRef = MockEvent::counter_based(producer.in_order_exec_info().clone(), Some(producer.id()), 1).into_ref();
    producer
        .append_launch_kernel(&KernelLaunch::new(&kernel, &args).with_signal_event(done.clone()))
        .unwrap();
    producer.close();

    let waits = [done.clone()];
    let consume = consumer
        .append_launch_kernel(&KernelLaunch::new(&kernel, &args).with_wait_events(&waits))
        .unwrap();
    consumer.close();

    let producer_counter = producer.in_order_exec_info().device_counter_allocation().unwrap().clone();
    assert!(consumer.residency().iter().any(|a| a.id() == producer_counter.id()));
    let wait_var = consumer.command(consume).unwrap().wait_events[0];
    assert!(!consumer.variable(wait_var).unwrap().event().unwrap().noop_state);

    let host_event: EventRef = MockEvent::regular(consumer.device()).into_ref();
    consumer.update_wait_events(consume, &[Some(host_event.clone())]).unwrap();
    consumer.close();
    let ev = consumer.variable(wait_var).unwrap().event().unwrap();
    assert_eq!(ev.sem_wait_cmds[0].semaphore_address(), host_event.gpu_address());
    assert!(ev.cb_event_device_counter_allocation.is_none());
    assert_eq!(consumer.mutable_residency().ref_count(&producer_counter), 0);

    consumer.update_wait_events(consume, &[Some(done)]).unwrap();
    consumer.close();
    let ev = consumer.variable(wait_var).unwrap().event().unwrap();
    assert_eq!(
        ev.sem_wait_cmds[0].semaphore_address(),
        producer.in_order_exec_info().base_device_address()
    );
    assert_eq!(consumer.mutable_residency().ref_count(&producer_counter), 1);
}

#[test]
fn batch_update_across_commands_then_reset() {
    let mut list = new_list(&XE_HPC, MclConfig::default());
    let src = list.device().allocate_svm(0x1000_0000, 0x1_0000);
    let dst = list.device().allocate_svm(0x2000_0000, 0x1_0000);
    let other = list.device().allocate_svm(0x3000_0000, 0x1_0000);
    let kernel = copy_kernel();
    let count = 16u32.to_le_bytes();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let args = [
            ArgValue::Buffer(Some(0x1000_0000)),
            ArgValue::Buffer(Some(0x2000_0000)),
            ArgValue::Bytes(&count),
        ];
        let launch = KernelLaunch::new(&kernel, &args).with_geometry(DispatchGeometry {
            group_count: [4, 1, 1],
            group_size: [32, 1, 1],
            global_offset: [0, 0, 0],
        });
        ids.push(list.append_launch_kernel(&launch).unwrap());
    }
    list.close();
    let residency: Vec<_> = list.residency().iter().map(|a| a.id()).collect();
    assert!(residency.contains(&src.id()));
    assert!(residency.contains(&dst.id()));

    let new_count = 64u32.to_le_bytes();
    let descs: Vec<MutableCommandDesc<'_>> = ids
        .iter()
        .flat_map(|&command_id| {
            [
                MutableCommandDesc::KernelArgument {
                    command_id,
                    arg_index: 1,
                    value: ArgValue::Buffer(Some(0x3000_0040)),
                },
                MutableCommandDesc::KernelArgument {
                    command_id,
                    arg_index: 2,
                    value: ArgValue::Bytes(&new_count),
                },
            ]
        })
        .collect();
    list.update_mutable_commands(&descs).unwrap();
    assert!(list.is_updated());
    list.close();

    assert_eq!(list.mutable_residency().ref_count(&other), 3);
    assert!(list.residency().iter().any(|a| Rc::ptr_eq(a, &other)));
    for &id in &ids {
        let dispatch = dispatch_of(&list, id);
        assert_eq!(payload_u32(&list, dispatch, usize::from(COUNT_ARG)), 64);
        let dst_var = list.command(id).unwrap().kernel_arguments[1].unwrap();
        assert_eq!(list.variable(dst_var).unwrap().buffer().unwrap().gpu_address, other.gpu_address() + 0x40);
    }

    list.reset();
    assert!(list.variables().is_empty());
    assert!(list.container().stream.is_empty());
}

#[test]
fn only_flagged_parameters_are_exposed() {
    let mut list = new_list(&XE_HPC, MclConfig::immediate());
    let kernel = copy_kernel();
    let count = 1u32.to_le_bytes();
    let args = [ArgValue::Buffer(None), ArgValue::Buffer(None), ArgValue::Bytes(&count)];
    let signal: EventRef = MockEvent::regular(list.device()).into_ref();

    let id = list.next_command_id_with_flags(MutationFlags::GROUP_COUNT | MutationFlags::GROUP_SIZE);
    list.append_launch_kernel(&KernelLaunch::new(&kernel, &args).with_signal_event(signal))
        .unwrap();

    let command = list.command(id).unwrap();
    assert!(command.kernel_arguments.is_empty());
    assert!(command.signal_event.is_none());
    assert!(command.global_offset.is_none());
    let group_count = command.group_count.unwrap();
    assert_eq!(list.variable(group_count).unwrap().kind(), VariableKind::GroupCount);

    assert_eq!(
        list.update_signal_event(id, None),
        Err(MclError::InvalidArgument("command has no mutable signal event"))
    );
}

#[test]
fn wait_list_shorter_than_recorded_leaves_the_rest() {
    let mut list = new_list(&XE_HPC, MclConfig::immediate());
    let kernel = copy_kernel();
    let count = 1u32.to_le_bytes();
    let args = [ArgValue::Buffer(None), ArgValue::Buffer(None), ArgValue::Bytes(&count)];
    let a: EventRef = MockEvent::regular(list.device()).into_ref();
    let b: EventRef = MockEvent::regular(list.device()).into_ref();
    let c: EventRef = MockEvent::regular(list.device()).into_ref();

    let waits = [a, b.clone()];
    let id = list
        .append_launch_kernel(&KernelLaunch::new(&kernel, &args).with_wait_events(&waits))
        .unwrap();
    list.update_wait_events(id, &[Some(c.clone())]).unwrap();

    let command = list.command(id).unwrap();
    let first = list.variable(command.wait_events[0]).unwrap().event().unwrap();
    let second = list.variable(command.wait_events[1]).unwrap().event().unwrap();
    assert_eq!(first.sem_wait_cmds[0].semaphore_address(), c.gpu_address());
    assert_eq!(second.sem_wait_cmds[0].semaphore_address(), b.gpu_address());

    assert!(list.update_wait_events(id, &[None, None, None]).is_err());
}

#[test]
fn timestamp_signal_is_sampled_at_both_slots() {
    let mut list = new_list(&XE_HPC, MclConfig::immediate());
    let kernel = copy_kernel();
    let count = 1u32.to_le_bytes();
    let args = [ArgValue::Buffer(None), ArgValue::Buffer(None), ArgValue::Bytes(&count)];
    let first = Rc::new(MockEvent::regular(list.device()).with_timestamp_node());
    let second = Rc::new(MockEvent::regular(list.device()).with_timestamp_node());

    let first_ref: EventRef = first.clone();
    let id = list
        .append_launch_kernel(&KernelLaunch::new(&kernel, &args).with_signal_event(first_ref))
        .unwrap();
    let var = list.command(id).unwrap().signal_event.unwrap();
    let addresses = |list: &mcl::MutableCommandList| -> Vec<u64> {
        list.variable(var)
            .unwrap()
            .event()
            .unwrap()
            .store_reg_mem_cmds
            .iter()
            .map(|c| c.memory_address())
            .collect()
    };
    assert_eq!(addresses(&list), vec![first.gpu_address(), first.gpu_address() + 8]);

    let second_ref: EventRef = second.clone();
    list.update_signal_event(id, Some(second_ref)).unwrap();
    assert_eq!(addresses(&list), vec![second.gpu_address(), second.gpu_address() + 8]);
    assert_eq!(second.timestamp_resets.get(), 1);
}
