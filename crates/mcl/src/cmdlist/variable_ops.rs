use crate::allocation::ResolvedPointer;
use crate::error::{MclError, Result};
use crate::kernel::KernelArg;
use crate::local_ids::check_work_group_size;
use crate::types::{align_up_u32, Dim3, DispatchId, VariableId};
use crate::variable::{ArgValue, VariableKind, VariablePayload, VariableState};

use super::MutableCommandList;

/// Granularity of the SLM footprint of all arguments together.
pub(crate) const SLM_ARGS_ALIGNMENT: u32 = 1024;

impl MutableCommandList {
    /// Sets a variable's value and propagates it according to the variable's commit mode.
    ///
    /// On error nothing has been written and no staged state has changed.
    pub fn set_value(&mut self, id: VariableId, value: ArgValue<'_>) -> Result<()> {
        let kind = self.checked_variable(id)?.kind();
        mcl_log!(self.config, variable = id.0, ?kind, value = value.describe(), "set variable value");
        match (kind, value) {
            (VariableKind::Buffer, ArgValue::Buffer(pointer)) => self.set_buffer_variable(id, pointer),
            (VariableKind::Value, ArgValue::Bytes(bytes)) => self.set_value_variable(id, bytes),
            (VariableKind::SlmBuffer, ArgValue::SlmSize(size)) => {
                self.set_slm_buffer_variable(id, size);
                Ok(())
            }
            (VariableKind::GroupCount, ArgValue::Dim3(v)) => {
                self.set_group_count_variable(id, v);
                Ok(())
            }
            (VariableKind::GroupSize, ArgValue::Dim3(v)) => {
                check_work_group_size(v)?;
                self.set_group_size_variable(id, v);
                Ok(())
            }
            (VariableKind::GlobalOffset, ArgValue::Dim3(v)) => {
                self.set_global_offset_variable(id, v);
                Ok(())
            }
            (VariableKind::SignalEvent, ArgValue::Event(event)) => self.set_signal_event_variable(id, event),
            (VariableKind::WaitEvent, ArgValue::Event(event)) => self.set_wait_event_variable(id, event),
            (kind, _) => Err(MclError::UnsupportedKind { kind }),
        }
    }

    /// Records the sites of a kernel argument of `dispatch` in the variable.
    pub fn bind_kernel_argument(&mut self, id: VariableId, dispatch: DispatchId, arg: &KernelArg) -> Result<()> {
        self.checked_variable(id)?;
        let payload = *self
            .dispatches
            .get(dispatch.index())
            .ok_or(MclError::InvalidArgument("unknown dispatch"))?
            .indirect_data()
            .payload();
        let var = &mut self.variables[id.index()];
        var.bind_kernel_argument(arg, &payload)?;
        mcl_log!(
            self.config,
            variable = id.0,
            dispatch = dispatch.0,
            sites = var.locations.len(),
            "captured kernel argument sites"
        );
        Ok(())
    }

    /// Writes the payload now, or stages it for the next commit.
    fn finish_payload_update(&mut self, id: VariableId) {
        let var = &mut self.variables[id.index()];
        if var.desc.is_stage_commit {
            var.desc.commit_required = true;
            self.stage_commit_variables.insert(id);
        } else {
            var.write_payload(&mut self.container);
        }
    }

    fn set_buffer_variable(&mut self, id: VariableId, pointer: Option<u64>) -> Result<()> {
        let resolved = match pointer.map(|ptr| self.device.resolve_pointer(ptr)) {
            Some(ResolvedPointer::System(_)) if self.config.disable_system_pointer_kernel_argument => {
                return Err(MclError::InvalidArgument("system pointer kernel arguments are disabled"));
            }
            resolved => resolved,
        };
        let gpu_address = resolved.as_ref().map_or(0, |r| r.gpu_address());
        let new_allocation = resolved.as_ref().and_then(|r| r.allocation().cloned());

        let var = &mut self.variables[id.index()];
        let VariablePayload::Buffer(buffer) = &mut var.payload else {
            return Err(MclError::UnsupportedKind { kind: var.desc.kind });
        };
        let old_allocation = std::mem::replace(&mut buffer.allocation, new_allocation.clone());
        buffer.pointer = pointer;
        buffer.gpu_address = gpu_address;
        var.desc.state = if pointer.is_some() {
            VariableState::Initialized
        } else {
            VariableState::Defined
        };
        mcl_log!(self.config, variable = id.0, gpu_address, tracked = new_allocation.is_some(), "buffer argument");

        if let Some(old) = old_allocation {
            self.residency.remove_allocation(&old);
        }
        if let Some(new) = &new_allocation {
            self.residency.add_allocation(new);
        }
        self.finish_payload_update(id);
        Ok(())
    }

    fn set_value_variable(&mut self, id: VariableId, bytes: &[u8]) -> Result<()> {
        let var = &mut self.variables[id.index()];
        let VariablePayload::Value(value) = &mut var.payload else {
            return Err(MclError::UnsupportedKind { kind: var.desc.kind });
        };
        value.validate(bytes)?;
        value.bytes.clear();
        value.bytes.extend_from_slice(bytes);
        var.desc.state = VariableState::Initialized;
        self.finish_payload_update(id);
        Ok(())
    }

    fn set_slm_buffer_variable(&mut self, id: VariableId, size: u32) {
        let var = &mut self.variables[id.index()];
        var.desc.state = VariableState::Initialized;
        let Some(slm) = var.slm_mut() else {
            return;
        };
        if slm.slm_size == size {
            return;
        }
        slm.slm_size = size;
        self.process_slm_chain(id);
    }

    /// Pushes the end of `start` into the following arguments' offsets and, once the end of the
    /// chain is reached, into the dispatch SLM size.
    pub(crate) fn process_slm_chain(&mut self, start: VariableId) {
        let mut current = start;
        loop {
            let Some(slm) = self.variables[current.index()].slm().copied() else {
                return;
            };
            let next_offset = slm.slm_offset_value.saturating_add(slm.slm_size);
            match slm.next_slm_variable {
                Some(next) => {
                    if !self.set_next_slm_variable_offset(next, next_offset) {
                        return;
                    }
                    current = next;
                }
                None => {
                    let args_total = align_up_u32(next_offset, SLM_ARGS_ALIGNMENT);
                    let Self {
                        variables,
                        dispatches,
                        container,
                        ..
                    } = self;
                    let var = &variables[current.index()];
                    let stage = var.desc.is_stage_commit;
                    for dispatch in &var.used_in_dispatch {
                        dispatches[dispatch.index()].set_slm_size(container, args_total, stage);
                    }
                    mcl_log!(self.config, variable = current.0, args_total, "slm chain end");
                    self.set_commit_variable(current);
                    return;
                }
            }
        }
    }

    /// Returns whether the offset moved.
    fn set_next_slm_variable_offset(&mut self, id: VariableId, offset: u32) -> bool {
        let var = &mut self.variables[id.index()];
        let Some(slm) = var.slm_mut() else {
            return false;
        };
        let aligned = align_up_u32(offset, slm.slm_alignment);
        if aligned == slm.slm_offset_value {
            return false;
        }
        slm.slm_offset_value = aligned;
        var.locations.write_all(&mut self.container, &aligned.to_le_bytes());
        mcl_log!(self.config, variable = id.0, offset = aligned, "slm argument offset");
        true
    }

    /// Stores a dim3 value and returns whether the variable stages; `None` when nothing changed.
    fn store_dim3(&mut self, id: VariableId, value: Dim3) -> Option<bool> {
        let var = &mut self.variables[id.index()];
        let VariablePayload::Dim3(current) = &mut var.payload else {
            return None;
        };
        if *current == value && var.desc.state == VariableState::Initialized {
            return None;
        }
        *current = value;
        var.desc.state = VariableState::Initialized;
        Some(var.desc.is_stage_commit)
    }

    fn set_group_count_variable(&mut self, id: VariableId, group_count: Dim3) {
        let Some(stage) = self.store_dim3(id, group_count) else {
            return;
        };
        let Self {
            variables,
            dispatches,
            container,
            ..
        } = self;
        for dispatch in &variables[id.index()].used_in_dispatch {
            dispatches[dispatch.index()].set_group_count(container, group_count, stage);
        }
        self.set_commit_variable(id);
    }

    fn set_group_size_variable(&mut self, id: VariableId, group_size: Dim3) {
        let Some(stage) = self.store_dim3(id, group_size) else {
            return;
        };
        let Self {
            variables,
            dispatches,
            container,
            ..
        } = self;
        for dispatch in &variables[id.index()].used_in_dispatch {
            dispatches[dispatch.index()].set_group_size(container, group_size, stage);
        }
        self.set_commit_variable(id);
    }

    /// Global offsets are written through in both modes.
    fn set_global_offset_variable(&mut self, id: VariableId, global_offset: Dim3) {
        if self.store_dim3(id, global_offset).is_none() {
            return;
        }
        let Self {
            variables,
            dispatches,
            container,
            ..
        } = self;
        for dispatch in &variables[id.index()].used_in_dispatch {
            dispatches[dispatch.index()].set_global_offset(container, global_offset);
        }
    }
}
