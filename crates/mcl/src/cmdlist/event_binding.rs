//! Binding and rebinding of signal and wait event variables.
//!
//! Rebinding is applied right away in both commit modes; the variable never becomes dirty.

use std::rc::Rc;

use mcl_hw::{CommandStream, MutablePipeControl};

use crate::allocation::GraphicsAllocation;
use crate::error::{MclError, Result};
use crate::event::{high_part, low_part, same_optional_event, Event, EventRef, InOrderExecInfo};
use crate::types::{DispatchId, GpuAddress, VariableId};
use crate::variable::{EventValue, VariableKind, VariablePayload, VariableState};

use super::{InOrderPatchCommand, MutableCommandList};

/// What a wait rebind does to the recorded wait commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitTransition {
    Restore,
    Noop,
    Set,
    Keep,
}

impl WaitTransition {
    fn new(old_nooped: bool, new_nooped: bool) -> Self {
        match (old_nooped, new_nooped) {
            (true, false) => Self::Restore,
            (false, true) => Self::Noop,
            (false, false) => Self::Set,
            (true, true) => Self::Keep,
        }
    }
}

/// Address a wait on `event` polls.
pub(crate) fn wait_address(event: &dyn Event) -> GpuAddress {
    match event.in_order_exec_info() {
        Some(info) if event.is_counter_based() => {
            info.base_device_address() + event.in_order_allocation_offset()
        }
        _ => event.gpu_address(),
    }
}

fn patch_in_order(
    list: &mut [InOrderPatchCommand],
    index: Option<usize>,
    exec_info: Option<&Rc<InOrderExecInfo>>,
    transition: WaitTransition,
) {
    let Some(entry) = index.and_then(|i| list.get_mut(i)) else {
        return;
    };
    match transition {
        WaitTransition::Noop => entry.set_skip_patching(),
        WaitTransition::Restore | WaitTransition::Set => {
            if let Some(info) = exec_info {
                entry.update_in_order_exec_info(info.clone());
            }
        }
        WaitTransition::Keep => {}
    }
}

fn noop_signal_commands(ev: &mut EventValue, stream: &mut CommandStream) {
    for cmd in &mut ev.store_data_imm_cmds {
        cmd.noop(stream);
    }
    for cmd in &mut ev.sem_wait_cmds {
        cmd.noop(stream);
    }
    for cmd in &mut ev.store_reg_mem_cmds {
        cmd.noop(stream);
    }
    if let Some(cmd) = &mut ev.pipe_control {
        cmd.noop(stream);
    }
}

impl MutableCommandList {
    /// Whether `event` is signalled by this list's own in-order counter.
    pub fn is_cb_event_bound_to_cmd_list(&self, event: &dyn Event) -> bool {
        event.is_counter_based() && event.producer() == Some(self.id)
    }

    /// This device's view of a counter allocation, importing peer allocations.
    pub fn device_counter_alloc_for_residency(
        &self,
        allocation: Option<&Rc<GraphicsAllocation>>,
    ) -> Option<Rc<GraphicsAllocation>> {
        allocation.map(|a| self.device.import_peer_allocation(a))
    }

    fn event_value_mut(&mut self, id: VariableId, kind: VariableKind) -> Result<&mut EventValue> {
        let var = self
            .variables
            .get_mut(id.index())
            .ok_or(MclError::InvalidArgument("unknown variable"))?;
        if var.desc.kind != kind {
            return Err(MclError::UnsupportedKind { kind: var.desc.kind });
        }
        var.desc.state = VariableState::Initialized;
        match &mut var.payload {
            VariablePayload::Event(ev) => Ok(&mut **ev),
            _ => Err(MclError::UnsupportedKind { kind }),
        }
    }

    /// First binding of a wait variable. Counter waits on this list's own counter start nooped.
    pub fn set_as_wait_event(&mut self, id: VariableId, event: EventRef) -> Result<()> {
        let cb_bound = self.is_cb_event_bound_to_cmd_list(event.as_ref());
        let exec_info = event.in_order_exec_info().filter(|_| event.is_counter_based());
        let counter_allocation = match &exec_info {
            Some(info) if !cb_bound => self.device_counter_alloc_for_residency(info.device_counter_allocation()),
            _ => None,
        };

        let ev = self.event_value_mut(id, VariableKind::WaitEvent)?;
        ev.event_pool_allocation = event.allocation();
        ev.counter_based_event = event.is_counter_based();
        ev.kernel_count = event.kernel_count();
        ev.packet_count = event.packets_in_use();
        match &exec_info {
            Some(info) => {
                ev.wait_packets = info.num_device_partitions_to_wait();
                ev.noop_state = cb_bound;
                ev.is_cb_event_bound_to_cmd_list = cb_bound;
                ev.cb_event_device_counter_allocation = counter_allocation;
                ev.in_order_allocation_offset = event.in_order_allocation_offset();
                ev.in_order_exec_base_signal_value = event.in_order_exec_base_signal_value();
            }
            None => {
                ev.wait_packets = event.packets_to_wait();
                ev.noop_state = false;
            }
        }
        ev.event = Some(event);
        Ok(())
    }

    /// First binding of a signal variable to the commands that signal it.
    pub fn set_as_signal_event(
        &mut self,
        id: VariableId,
        event: EventRef,
        walker: Option<DispatchId>,
        pipe_control: Option<MutablePipeControl>,
    ) -> Result<()> {
        let ev = self.event_value_mut(id, VariableKind::SignalEvent)?;
        ev.event_pool_allocation = event.allocation();
        ev.counter_based_event = event.is_counter_based();
        ev.in_order_increment_event = event.in_order_increment_value() > 0;
        ev.walker = walker;
        ev.pipe_control = pipe_control;
        ev.kernel_count = event.kernel_count();
        ev.packet_count = event.packets_in_use();
        ev.wait_packets = event.packets_to_wait();
        ev.has_standalone_profiling_node = event.has_in_order_timestamp_node();
        if ev.counter_based_event {
            ev.in_order_exec_base_signal_value = event.in_order_exec_base_signal_value();
            ev.in_order_allocation_offset = event.in_order_allocation_offset();
        }
        ev.noop_state = false;
        ev.event = Some(event);
        Ok(())
    }

    pub(crate) fn set_signal_event_variable(&mut self, id: VariableId, new_event: Option<EventRef>) -> Result<()> {
        let Self {
            variables,
            dispatches,
            container,
            residency,
            in_order_exec_info,
            config,
            ..
        } = self;
        let var = &mut variables[id.index()];
        let VariablePayload::Event(ev) = &mut var.payload else {
            return Err(MclError::UnsupportedKind { kind: var.desc.kind });
        };
        if same_optional_event(ev.event.as_ref(), new_event.as_ref()) {
            return Ok(());
        }
        let stream = &mut container.stream;

        if let Some(old) = ev.event_pool_allocation.take() {
            residency.remove_allocation(&old);
        }

        let Some(new) = new_event else {
            mcl_log!(config, variable = id.0, "signal event unbound");
            noop_signal_commands(ev, stream);
            if let Some(dispatch) = ev.walker {
                dispatches[dispatch.index()].walker_mut().set_post_sync_address(stream, 0);
            }
            ev.event = None;
            ev.noop_state = true;
            return Ok(());
        };

        if ev.has_standalone_profiling_node {
            new.reset_in_order_timestamp_node();
        }
        let pool_allocation = new.allocation();
        if let Some(pool) = &pool_allocation {
            residency.add_allocation(pool);
        }
        if ev.counter_based_event && !ev.in_order_increment_event {
            new.update_in_order_exec_state(
                in_order_exec_info.clone(),
                ev.in_order_exec_base_signal_value,
                ev.in_order_allocation_offset,
            );
        }

        let address = new.gpu_address();
        for cmd in &mut ev.store_data_imm_cmds {
            cmd.set_address(stream, address);
        }
        for cmd in &mut ev.sem_wait_cmds {
            cmd.set_semaphore_address(stream, address);
        }
        for cmd in &mut ev.store_reg_mem_cmds {
            cmd.set_memory_address(stream, address);
        }
        if let Some(cmd) = &mut ev.pipe_control {
            cmd.set_post_sync_address(stream, address);
        }
        if ev.noop_state {
            for cmd in &mut ev.store_data_imm_cmds {
                cmd.restore(stream);
            }
            for cmd in &mut ev.store_reg_mem_cmds {
                cmd.restore(stream);
            }
            for cmd in &mut ev.sem_wait_cmds {
                cmd.restore_with_semaphore_address(stream, address);
            }
            if let Some(cmd) = &mut ev.pipe_control {
                cmd.restore(stream);
            }
        }

        if let Some(dispatch) = ev.walker {
            let increment_address = if ev.in_order_increment_event {
                new.in_order_exec_info().map_or(0, |info| info.base_device_address())
            } else {
                0
            };
            let post_sync = if address != 0 { address } else { increment_address };
            dispatches[dispatch.index()]
                .walker_mut()
                .set_post_sync_address(stream, post_sync);
        }

        new.set_kernel_count(ev.kernel_count);
        new.set_packets_in_use(ev.packet_count);
        if ev.counter_based_event {
            ev.in_order_exec_base_signal_value = new.in_order_exec_base_signal_value();
            ev.in_order_allocation_offset = new.in_order_allocation_offset();
        }
        mcl_log!(config, variable = id.0, address, "signal event rebound");
        ev.event_pool_allocation = pool_allocation;
        ev.event = Some(new);
        ev.noop_state = false;
        Ok(())
    }

    pub(crate) fn set_wait_event_variable(&mut self, id: VariableId, new_event: Option<EventRef>) -> Result<()> {
        {
            let var = self.checked_variable(id)?;
            let Some(ev) = var.event() else {
                return Err(MclError::UnsupportedKind { kind: var.desc.kind });
            };
            if same_optional_event(ev.event.as_ref(), new_event.as_ref()) {
                return Ok(());
            }
        }

        let new_cb_bound = new_event
            .as_ref()
            .is_some_and(|e| self.is_cb_event_bound_to_cmd_list(e.as_ref()));
        let new_nooped = new_event.is_none() || new_cb_bound;
        let new_exec_info = new_event
            .as_ref()
            .filter(|e| e.is_counter_based())
            .and_then(|e| e.in_order_exec_info());
        let new_counter_allocation = match &new_exec_info {
            Some(info) if !new_cb_bound => self.device_counter_alloc_for_residency(info.device_counter_allocation()),
            _ => None,
        };
        let qword = self.device.family().qword_in_order_counter();

        let Self {
            variables,
            container,
            residency,
            in_order_patch_list,
            config,
            ..
        } = self;
        let VariablePayload::Event(ev) = &mut variables[id.index()].payload else {
            return Ok(());
        };
        let stream = &mut container.stream;

        if let Some(old) = ev.event_pool_allocation.take() {
            residency.remove_allocation(&old);
        }
        let new_pool_allocation = new_event.as_ref().and_then(|e| e.allocation());
        if let Some(pool) = &new_pool_allocation {
            residency.add_allocation(pool);
        }
        if let Some(old) = ev.cb_event_device_counter_allocation.take() {
            residency.remove_allocation(&old);
        }
        if let Some(counter) = &new_counter_allocation {
            residency.add_allocation(counter);
        }

        let old_nooped = ev.noop_state;
        let has_timestamp_node = new_event.as_ref().is_some_and(|e| e.has_in_order_timestamp_node());

        if ev.counter_based_event && !has_timestamp_node {
            let transition = WaitTransition::new(old_nooped, new_nooped);
            let address = new_event.as_ref().map_or(0, |e| wait_address(e.as_ref()));
            let external_counter = new_exec_info
                .as_ref()
                .filter(|info| info.is_external_memory_exec_info())
                .map(|info| info.counter_value())
                .filter(|_| !new_nooped);

            for cmd in &mut ev.sem_wait_cmds {
                match transition {
                    WaitTransition::Restore => cmd.restore_with_semaphore_address(stream, address),
                    WaitTransition::Noop => cmd.noop(stream),
                    WaitTransition::Set => cmd.set_semaphore_address(stream, address),
                    WaitTransition::Keep => {}
                }
                if let Some(counter) = external_counter.filter(|_| !qword) {
                    cmd.set_semaphore_value(stream, counter as u32);
                }
                patch_in_order(in_order_patch_list, cmd.in_order_patch_index(), new_exec_info.as_ref(), transition);
            }
            for (i, cmd) in ev.load_reg_imm_cmds.iter_mut().enumerate() {
                match transition {
                    WaitTransition::Restore => cmd.restore(stream),
                    WaitTransition::Noop => cmd.noop(stream),
                    WaitTransition::Set | WaitTransition::Keep => {}
                }
                if let Some(counter) = external_counter {
                    let half = if i % 2 == 0 { low_part(counter) } else { high_part(counter) };
                    cmd.set_value(stream, half);
                }
                patch_in_order(in_order_patch_list, cmd.in_order_patch_index(), new_exec_info.as_ref(), transition);
            }
            mcl_log!(config, variable = id.0, address, ?transition, "counter wait event rebound");
        } else {
            if let Some(new) = &new_event {
                let address = new.gpu_address();
                for cmd in &mut ev.sem_wait_cmds {
                    if old_nooped {
                        cmd.restore_with_semaphore_address(stream, address);
                    } else {
                        cmd.set_semaphore_address(stream, address);
                    }
                }
                mcl_log!(config, variable = id.0, address, "wait event rebound");
            }
            if new_nooped {
                for cmd in &mut ev.sem_wait_cmds {
                    cmd.noop(stream);
                }
            }
        }

        if let Some(new) = &new_event {
            if new.is_counter_based() {
                ev.in_order_allocation_offset = new.in_order_allocation_offset();
                ev.in_order_exec_base_signal_value = new.in_order_exec_base_signal_value();
            }
        }
        ev.event = new_event;
        ev.event_pool_allocation = new_pool_allocation;
        ev.is_cb_event_bound_to_cmd_list = new_cb_bound;
        ev.cb_event_device_counter_allocation = new_counter_allocation;
        ev.noop_state = new_nooped;
        Ok(())
    }
}
