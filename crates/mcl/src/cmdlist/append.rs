//! Recording of mutable kernel launches and signal commands.
//!
//! Recording programs every initial value immediately, whatever the commit mode; only later
//! mutations stage.

use mcl_hw::cmd::{PipeControlCmd, SemaphoreWaitCmd};
use mcl_hw::{
    MutableComputeWalker, MutableLoadRegisterImm, MutablePipeControl, MutableSemaphoreWait,
    MutableStoreDataImm, MutableStoreRegisterMem, SemaphoreWaitKind, WalkerInit,
};

use crate::allocation::ResolvedPointer;
use crate::error::{MclError, Result};
use crate::event::{
    high_part, low_part, EventRef, EVENT_STATE_CLEARED, EVENT_STATE_SIGNALED,
    SEMAPHORE_COMPARE_HIGH_REGISTER, SEMAPHORE_COMPARE_LOW_REGISTER, TIMESTAMP_REGISTER,
};
use crate::indirect_data::MutableIndirectData;
use crate::kernel::{AddressSpace, DispatchGeometry, KernelArg, KernelDescriptor};
use crate::local_ids::{check_work_group_size, per_thread_data_size, MAX_WORK_GROUP_SIZE};
use crate::patch::PayloadLayout;
use crate::types::{align_up_u32, Dim3, DispatchId, VariableId};
use crate::variable::{ArgValue, VariableKind, VariablePayload, VariableState};
use crate::variable_dispatch::VariableDispatch;

use super::event_binding::wait_address;
use super::mutation::MutationFlags;
use super::variable_ops::SLM_ARGS_ALIGNMENT;
use super::{InOrderPatchCommand, MutableCommandList};

/// Size of one partition's slot in an in-order counter allocation.
const IN_ORDER_PARTITION_STRIDE: u64 = 8;

/// One kernel launch to record.
#[derive(Debug, Clone)]
pub struct KernelLaunch<'a> {
    pub kernel: &'a KernelDescriptor,
    pub geometry: DispatchGeometry,
    /// One value per kernel argument, in argument order.
    pub args: &'a [ArgValue<'a>],
    pub signal_event: Option<EventRef>,
    pub wait_events: &'a [EventRef],
}

impl<'a> KernelLaunch<'a> {
    pub fn new(kernel: &'a KernelDescriptor, args: &'a [ArgValue<'a>]) -> Self {
        Self {
            kernel,
            geometry: DispatchGeometry::default(),
            args,
            signal_event: None,
            wait_events: &[],
        }
    }

    pub fn with_geometry(mut self, geometry: DispatchGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_signal_event(mut self, event: EventRef) -> Self {
        self.signal_event = Some(event);
        self
    }

    pub fn with_wait_events(mut self, events: &'a [EventRef]) -> Self {
        self.wait_events = events;
        self
    }
}

fn variable_kind_for(arg: &KernelArg) -> VariableKind {
    match arg {
        KernelArg::Pointer {
            address_space: AddressSpace::Global,
            ..
        } => VariableKind::Buffer,
        KernelArg::Pointer { .. } => VariableKind::SlmBuffer,
        KernelArg::Value { .. } => VariableKind::Value,
    }
}

impl MutableCommandList {
    fn validate_launch(&self, launch: &KernelLaunch<'_>) -> Result<()> {
        if self.base_closed {
            return Err(MclError::InvalidArgument("command list is closed"));
        }
        check_work_group_size(launch.geometry.group_size)?;
        let kernel = launch.kernel;
        if kernel.args.len() != launch.args.len() {
            return Err(MclError::InvalidArgument("kernel argument count mismatch"));
        }
        for (arg, value) in kernel.args.iter().zip(launch.args) {
            let kind = variable_kind_for(arg);
            if !value.fits(kind) {
                return Err(MclError::UnsupportedKind { kind });
            }
            match (arg, value) {
                (KernelArg::Value { elements }, ArgValue::Bytes(bytes)) => {
                    if elements.iter().any(|e| usize::from(e.source_offset) >= bytes.len()) {
                        return Err(MclError::InvalidArgument("value shorter than argument element"));
                    }
                }
                (_, ArgValue::Buffer(Some(pointer)))
                    if self.config.disable_system_pointer_kernel_argument
                        && matches!(self.device.resolve_pointer(*pointer), ResolvedPointer::System(_)) =>
                {
                    return Err(MclError::InvalidArgument("system pointer kernel arguments are disabled"));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn take_command_id(&mut self) -> u64 {
        match self.pending_command_id.take() {
            Some(id) => id,
            None => {
                let id = self.next_command_id();
                self.pending_command_id = None;
                id
            }
        }
    }

    /// Records a kernel launch with its waits and signal, returning its command id.
    ///
    /// The id reserved by the last [`MutableCommandList::next_command_id`] call is used when
    /// there is one; otherwise a fully mutable id is allocated.
    pub fn append_launch_kernel(&mut self, launch: &KernelLaunch<'_>) -> Result<u64> {
        self.validate_launch(launch)?;
        let command_id = self.take_command_id();
        let command_index = (command_id - 1) as usize;
        let flags = self.commands[command_index].flags;

        let mut wait_events = Vec::with_capacity(launch.wait_events.len());
        for event in launch.wait_events {
            wait_events.push(self.record_wait_event(event)?);
        }

        let dispatch = self.record_dispatch(launch.kernel, launch.geometry)?;
        let kernel_arguments = self.record_kernel_arguments(dispatch, launch)?;

        let group_count = flags
            .contains(MutationFlags::GROUP_COUNT)
            .then(|| self.create_geometry_variable(VariableKind::GroupCount, launch.geometry.group_count, dispatch));
        let group_size = flags
            .contains(MutationFlags::GROUP_SIZE)
            .then(|| self.create_geometry_variable(VariableKind::GroupSize, launch.geometry.group_size, dispatch));
        let global_offset = flags.contains(MutationFlags::GLOBAL_OFFSET).then(|| {
            self.create_geometry_variable(VariableKind::GlobalOffset, launch.geometry.global_offset, dispatch)
        });
        {
            let d = &mut self.dispatches[dispatch.index()];
            d.group_count_var = group_count;
            d.group_size_var = group_size;
            d.global_offset_var = global_offset;
        }

        let signal_event = match &launch.signal_event {
            Some(event) => Some(self.record_walker_signal(event, dispatch)?),
            None => None,
        };

        let command = &mut self.commands[command_index];
        command.dispatch = Some(dispatch);
        if flags.contains(MutationFlags::KERNEL_ARGUMENTS) {
            command.kernel_arguments = kernel_arguments.into_iter().map(Some).collect();
        }
        command.group_count = group_count;
        command.group_size = group_size;
        command.global_offset = global_offset;
        if flags.contains(MutationFlags::SIGNAL_EVENT) {
            command.signal_event = signal_event;
        }
        if flags.contains(MutationFlags::WAIT_EVENTS) {
            command.wait_events = wait_events;
        }

        mcl_log!(
            self.config,
            command_id,
            kernel = %launch.kernel.name,
            dispatch = dispatch.0,
            waits = launch.wait_events.len(),
            signal = launch.signal_event.is_some(),
            "recorded kernel launch"
        );
        Ok(command_id)
    }

    /// Records a standalone signal through a pipe-control post-sync write.
    pub fn append_signal_event(&mut self, event: EventRef) -> Result<VariableId> {
        if self.base_closed {
            return Err(MclError::InvalidArgument("command list is closed"));
        }
        let family = self.device.family();
        let stream = &mut self.container.stream;
        let at = stream.append_pipe_control(
            PipeControlCmd::FLAG_POST_SYNC_WRITE_IMMEDIATE | PipeControlCmd::FLAG_DC_FLUSH,
            event.gpu_address(),
            EVENT_STATE_SIGNALED,
        );
        let pipe_control = MutablePipeControl::new(stream, at, family.pipe_control())?;
        if let Some(pool) = event.allocation() {
            self.add_immutable_residency(&pool);
        }
        let id = self.create_variable(VariableKind::SignalEvent);
        self.set_as_signal_event(id, event, None, Some(pipe_control))?;
        Ok(id)
    }

    fn record_wait_event(&mut self, event: &EventRef) -> Result<VariableId> {
        let family = self.device.family();
        let layout = family.semaphore_wait();
        let mut sem_wait_cmds = Vec::new();
        let mut load_reg_imm_cmds = Vec::new();

        let counter_exec_info = event
            .in_order_exec_info()
            .filter(|_| event.is_counter_based() && !event.has_in_order_timestamp_node());

        if let Some(info) = counter_exec_info {
            let address = wait_address(event.as_ref());
            let counter = if info.is_external_memory_exec_info() {
                info.counter_value()
            } else {
                event.in_order_exec_base_signal_value()
            };
            let qword = family.qword_in_order_counter();
            let patch_index = self.in_order_patch_list.len();
            self.in_order_patch_list
                .push(InOrderPatchCommand::new(info.clone(), counter));

            let stream = &mut self.container.stream;
            for partition in 0..u64::from(info.num_device_partitions_to_wait()) {
                let offset = partition * IN_ORDER_PARTITION_STRIDE;
                let sem = if qword {
                    for (register, half) in [
                        (SEMAPHORE_COMPARE_LOW_REGISTER, low_part(counter)),
                        (SEMAPHORE_COMPARE_HIGH_REGISTER, high_part(counter)),
                    ] {
                        let at = stream.append_load_register_imm(register, half);
                        load_reg_imm_cmds.push(MutableLoadRegisterImm::new(
                            stream,
                            at,
                            family.load_register_imm(),
                            Some(patch_index),
                        )?);
                    }
                    stream.append_semaphore_wait(
                        address + offset,
                        0,
                        SemaphoreWaitCmd::COMPARE_SAD_GREATER_THAN_OR_EQUAL_SDD,
                    )
                } else {
                    stream.append_semaphore_wait(
                        address + offset,
                        low_part(counter),
                        SemaphoreWaitCmd::COMPARE_SAD_GREATER_THAN_OR_EQUAL_SDD,
                    )
                };
                sem_wait_cmds.push(
                    MutableSemaphoreWait::new(
                        stream,
                        sem,
                        layout,
                        SemaphoreWaitKind::CbEventWait,
                        Some(patch_index),
                        qword,
                    )?
                    .with_address_offset(offset),
                );
            }

            if !self.is_cb_event_bound_to_cmd_list(event.as_ref()) {
                if let Some(counter_allocation) =
                    self.device_counter_alloc_for_residency(info.device_counter_allocation())
                {
                    self.add_immutable_residency(&counter_allocation);
                }
            }
        } else {
            let kind = if event.is_counter_based() {
                SemaphoreWaitKind::CbEventTimestampSyncWait
            } else {
                SemaphoreWaitKind::RegularEventWait
            };
            let address = event.gpu_address();
            let stream = &mut self.container.stream;
            for packet in 0..u64::from(event.packets_to_wait()) {
                let offset = event.completion_field_offset() + packet * event.single_packet_size();
                let at = stream.append_semaphore_wait(
                    address + offset,
                    EVENT_STATE_CLEARED,
                    SemaphoreWaitCmd::COMPARE_SAD_NOT_EQUAL_SDD,
                );
                sem_wait_cmds.push(MutableSemaphoreWait::new(stream, at, layout, kind, None, false)?.with_address_offset(offset));
            }
        }

        if let Some(pool) = event.allocation() {
            self.add_immutable_residency(&pool);
        }

        let id = self.create_variable(VariableKind::WaitEvent);
        self.set_as_wait_event(id, event.clone())?;

        let Self {
            variables,
            container,
            in_order_patch_list,
            ..
        } = self;
        if let VariablePayload::Event(ev) = &mut variables[id.index()].payload {
            if ev.noop_state {
                let stream = &mut container.stream;
                for cmd in &mut sem_wait_cmds {
                    cmd.noop(stream);
                    if let Some(entry) = cmd.in_order_patch_index().and_then(|i| in_order_patch_list.get_mut(i)) {
                        entry.set_skip_patching();
                    }
                }
                for cmd in &mut load_reg_imm_cmds {
                    cmd.noop(stream);
                }
            }
            ev.sem_wait_cmds = sem_wait_cmds;
            ev.load_reg_imm_cmds = load_reg_imm_cmds;
        }
        Ok(id)
    }

    fn record_dispatch(&mut self, kernel: &KernelDescriptor, geometry: DispatchGeometry) -> Result<DispatchId> {
        let family = self.device.family();
        let kd = &kernel.data;
        let layout = family.walker();

        let inline_size = layout.inline_data_size;
        let cross_thread_heap_size = (kd.cross_thread_data_size as usize).saturating_sub(inline_size);
        let per_thread_capacity = if kd.num_local_id_channels > 0 {
            per_thread_data_size(kd.simd_size, family.grf_size(), kd.num_local_id_channels, MAX_WORK_GROUP_SIZE)
        } else {
            0
        };
        let heap_offset = self.container.ioh.reserve(cross_thread_heap_size + per_thread_capacity);

        let walker_offset = self.container.stream.append_walker(
            family,
            &WalkerInit {
                kernel_start_pointer: kd.kernel_start_address,
                indirect_data_start_address: heap_offset as u32,
                ..WalkerInit::default()
            },
        );
        let walker = MutableComputeWalker::new(&self.container.stream, walker_offset, layout)?;
        let payload = PayloadLayout {
            inline_stream_offset: walker_offset + layout.inline_data_offset,
            inline_size,
            heap_offset,
        };
        let indirect_data = MutableIndirectData::new(
            kernel.offsets.clone(),
            payload,
            cross_thread_heap_size,
            heap_offset + cross_thread_heap_size,
            per_thread_capacity,
        );

        let mut dispatch = VariableDispatch::new(
            family,
            kd.clone(),
            self.config.force_sw_local_ids,
            indirect_data,
            walker,
        );
        dispatch.set_group_size(&mut self.container, geometry.group_size, false);
        dispatch.set_group_count(&mut self.container, geometry.group_count, false);
        dispatch.set_global_offset(&mut self.container, geometry.global_offset);

        let id = DispatchId(self.dispatches.len() as u32);
        self.dispatches.push(dispatch);
        Ok(id)
    }

    fn record_kernel_arguments(&mut self, dispatch: DispatchId, launch: &KernelLaunch<'_>) -> Result<Vec<VariableId>> {
        let mut ids = Vec::with_capacity(launch.args.len());
        let mut slm_vars: Vec<VariableId> = Vec::new();
        let mut slm_running = 0u32;

        for (arg, value) in launch.kernel.args.iter().zip(launch.args) {
            let id = self.create_variable(variable_kind_for(arg));
            self.bind_kernel_argument(id, dispatch, arg)?;
            ids.push(id);

            match (arg, value) {
                (
                    KernelArg::Pointer {
                        address_space: AddressSpace::Local { required_alignment },
                        ..
                    },
                    ArgValue::SlmSize(size),
                ) => {
                    let offset = align_up_u32(slm_running, *required_alignment);
                    slm_running = offset + size;
                    let var = &mut self.variables[id.index()];
                    if let Some(slm) = var.slm_mut() {
                        slm.slm_size = *size;
                        slm.slm_offset_value = offset;
                    }
                    var.desc.state = VariableState::Initialized;
                    var.locations.write_all(&mut self.container, &offset.to_le_bytes());
                    if let Some(&prev) = slm_vars.last() {
                        if let Some(prev_slm) = self.variables[prev.index()].slm_mut() {
                            prev_slm.next_slm_variable = Some(id);
                        }
                    }
                    slm_vars.push(id);
                }
                (_, ArgValue::Buffer(pointer)) => {
                    let resolved = pointer.map(|ptr| self.device.resolve_pointer(ptr));
                    let var = &mut self.variables[id.index()];
                    if let VariablePayload::Buffer(buffer) = &mut var.payload {
                        buffer.pointer = *pointer;
                        buffer.gpu_address = resolved.as_ref().map_or(0, |r| r.gpu_address());
                        buffer.allocation = resolved.as_ref().and_then(|r| r.allocation().cloned());
                    }
                    if pointer.is_some() {
                        var.desc.state = VariableState::Initialized;
                    }
                    var.write_payload(&mut self.container);
                    if let Some(allocation) = resolved.as_ref().and_then(|r| r.allocation()) {
                        self.add_immutable_residency(allocation);
                    }
                }
                (_, ArgValue::Bytes(bytes)) => {
                    let var = &mut self.variables[id.index()];
                    if let VariablePayload::Value(current) = &mut var.payload {
                        current.bytes = bytes.to_vec();
                    }
                    var.desc.state = VariableState::Initialized;
                    var.write_payload(&mut self.container);
                }
                _ => return Err(MclError::UnsupportedKind { kind: variable_kind_for(arg) }),
            }
        }

        let slm_args_total = if slm_vars.is_empty() {
            0
        } else {
            align_up_u32(slm_running, SLM_ARGS_ALIGNMENT)
        };
        if let Some(&last) = slm_vars.last() {
            self.variables[last.index()].add_used_in_dispatch(dispatch);
        }
        let d = &mut self.dispatches[dispatch.index()];
        d.set_slm_size(&mut self.container, slm_args_total, false);
        d.slm_vars = slm_vars;
        Ok(ids)
    }

    fn create_geometry_variable(&mut self, kind: VariableKind, value: Dim3, dispatch: DispatchId) -> VariableId {
        let id = self.create_variable(kind);
        let var = &mut self.variables[id.index()];
        var.payload = VariablePayload::Dim3(value);
        var.desc.state = VariableState::Initialized;
        var.add_used_in_dispatch(dispatch);
        id
    }

    fn record_walker_signal(&mut self, event: &EventRef, dispatch: DispatchId) -> Result<VariableId> {
        let family = self.device.family();
        let address = event.gpu_address();
        let post_sync = match event.in_order_exec_info() {
            Some(info) if address == 0 && event.in_order_increment_value() > 0 => info.base_device_address(),
            _ => address,
        };
        let stream = &mut self.container.stream;
        self.dispatches[dispatch.index()]
            .walker_mut()
            .set_post_sync_address(stream, post_sync);

        let mut store_data_imm_cmds = Vec::new();
        for packet in 1..u64::from(event.packets_in_use()) {
            let offset = packet * event.single_packet_size();
            let at = stream.append_store_data_imm(address + offset, EVENT_STATE_SIGNALED);
            store_data_imm_cmds.push(
                MutableStoreDataImm::new(stream, at, family.store_data_imm(), false)?.with_address_offset(offset),
            );
        }
        let mut store_reg_mem_cmds = Vec::new();
        if event.has_in_order_timestamp_node() {
            for offset in [0u64, 8] {
                let at = stream.append_store_register_mem(TIMESTAMP_REGISTER, address + offset);
                store_reg_mem_cmds.push(
                    MutableStoreRegisterMem::new(stream, at, family.store_register_mem())?.with_address_offset(offset),
                );
            }
        }
        if let Some(pool) = event.allocation() {
            self.add_immutable_residency(&pool);
        }

        let id = self.create_variable(VariableKind::SignalEvent);
        self.set_as_signal_event(id, event.clone(), Some(dispatch), None)?;
        if let VariablePayload::Event(ev) = &mut self.variables[id.index()].payload {
            ev.store_data_imm_cmds = store_data_imm_cmds;
            ev.store_reg_mem_cmds = store_reg_mem_cmds;
        }
        Ok(id)
    }
}
