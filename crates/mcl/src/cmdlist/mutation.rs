//! Command ids and mutation of recorded commands by id.

use bitflags::bitflags;

use crate::allocation::ResolvedPointer;
use crate::error::{MclError, Result};
use crate::event::{same_optional_event, EventRef};
use crate::local_ids::check_work_group_size;
use crate::types::{Dim3, DispatchId, VariableId};
use crate::variable::{ArgValue, VariablePayload};

use super::MutableCommandList;

bitflags! {
    /// Parameters of a recorded command that may be mutated later.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct MutationFlags: u32 {
        const KERNEL_ARGUMENTS = 1 << 0;
        const GROUP_COUNT = 1 << 1;
        const GROUP_SIZE = 1 << 2;
        const GLOBAL_OFFSET = 1 << 3;
        const SIGNAL_EVENT = 1 << 4;
        const WAIT_EVENTS = 1 << 5;
    }
}

/// Variables created for one recorded command.
#[derive(Debug, Clone)]
pub struct MutableCommand {
    pub flags: MutationFlags,
    pub dispatch: Option<DispatchId>,
    /// Indexed by kernel argument index.
    pub kernel_arguments: Vec<Option<VariableId>>,
    pub group_count: Option<VariableId>,
    pub group_size: Option<VariableId>,
    pub global_offset: Option<VariableId>,
    pub signal_event: Option<VariableId>,
    /// In wait-list order.
    pub wait_events: Vec<VariableId>,
}

impl MutableCommand {
    fn new(flags: MutationFlags) -> Self {
        Self {
            flags,
            dispatch: None,
            kernel_arguments: Vec::new(),
            group_count: None,
            group_size: None,
            global_offset: None,
            signal_event: None,
            wait_events: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum MutableCommandDesc<'a> {
    KernelArgument {
        command_id: u64,
        arg_index: u32,
        value: ArgValue<'a>,
    },
    GroupCount {
        command_id: u64,
        group_count: Dim3,
    },
    GroupSize {
        command_id: u64,
        group_size: Dim3,
    },
    GlobalOffset {
        command_id: u64,
        global_offset: Dim3,
    },
}

impl MutableCommandDesc<'_> {
    pub fn command_id(&self) -> u64 {
        match self {
            Self::KernelArgument { command_id, .. }
            | Self::GroupCount { command_id, .. }
            | Self::GroupSize { command_id, .. }
            | Self::GlobalOffset { command_id, .. } => *command_id,
        }
    }
}

impl MutableCommandList {
    /// Reserves the id of the next appended command, mutable in every respect.
    pub fn next_command_id(&mut self) -> u64 {
        self.next_command_id_with_flags(MutationFlags::all())
    }

    /// Reserves the id of the next appended command. Ids start at 1.
    pub fn next_command_id_with_flags(&mut self, flags: MutationFlags) -> u64 {
        self.commands.push(MutableCommand::new(flags));
        let id = self.commands.len() as u64;
        self.pending_command_id = Some(id);
        mcl_log!(self.config, command_id = id, ?flags, "reserved command id");
        id
    }

    pub fn command(&self, command_id: u64) -> Option<&MutableCommand> {
        command_id
            .checked_sub(1)
            .and_then(|i| self.commands.get(i as usize))
    }

    fn checked_command(&self, command_id: u64) -> Result<&MutableCommand> {
        self.command(command_id)
            .ok_or(MclError::InvalidArgument("unknown command id"))
    }

    fn resolve_desc_variable(&self, desc: &MutableCommandDesc<'_>) -> Result<VariableId> {
        let command = self.checked_command(desc.command_id())?;
        let variable = match desc {
            MutableCommandDesc::KernelArgument { arg_index, .. } => *command
                .kernel_arguments
                .get(*arg_index as usize)
                .ok_or(MclError::InvalidArgument("kernel argument index out of range"))?,
            MutableCommandDesc::GroupCount { .. } => command.group_count,
            MutableCommandDesc::GroupSize { .. } => command.group_size,
            MutableCommandDesc::GlobalOffset { .. } => command.global_offset,
        };
        variable.ok_or(MclError::InvalidArgument("command parameter is not mutable"))
    }

    /// Runs the checks `set_value` would fail on, without touching anything.
    fn check_argument(&self, id: VariableId, value: &ArgValue<'_>) -> Result<()> {
        let var = &self.variables[id.index()];
        if !value.fits(var.kind()) {
            return Err(MclError::UnsupportedKind { kind: var.kind() });
        }
        match (value, &var.payload) {
            (ArgValue::Bytes(bytes), VariablePayload::Value(current)) => current.validate(bytes),
            (ArgValue::Buffer(Some(pointer)), _)
                if self.config.disable_system_pointer_kernel_argument
                    && matches!(self.device.resolve_pointer(*pointer), ResolvedPointer::System(_)) =>
            {
                Err(MclError::InvalidArgument("system pointer kernel arguments are disabled"))
            }
            _ => Ok(()),
        }
    }

    /// Applies a batch of kernel mutations. Every descriptor is validated before anything is
    /// written.
    pub fn update_mutable_commands(&mut self, descs: &[MutableCommandDesc<'_>]) -> Result<()> {
        let resolved = descs
            .iter()
            .map(|desc| self.resolve_desc_variable(desc))
            .collect::<Result<Vec<_>>>()?;
        for (desc, &id) in descs.iter().zip(&resolved) {
            match desc {
                MutableCommandDesc::KernelArgument { value, .. } => self.check_argument(id, value)?,
                MutableCommandDesc::GroupSize { group_size, .. } => check_work_group_size(*group_size)?,
                _ => {}
            }
        }

        for (desc, id) in descs.iter().zip(resolved) {
            let value = match desc {
                MutableCommandDesc::KernelArgument { value, .. } => {
                    if let (ArgValue::Buffer(pointer), VariablePayload::Buffer(current)) =
                        (value, &self.variables[id.index()].payload)
                    {
                        if current.pointer == *pointer {
                            continue;
                        }
                    }
                    value.clone()
                }
                MutableCommandDesc::GroupCount { group_count, .. } => ArgValue::Dim3(*group_count),
                MutableCommandDesc::GroupSize { group_size, .. } => ArgValue::Dim3(*group_size),
                MutableCommandDesc::GlobalOffset { global_offset, .. } => ArgValue::Dim3(*global_offset),
            };
            self.set_value(id, value)?;
            self.updated = true;
        }
        Ok(())
    }

    pub fn update_signal_event(&mut self, command_id: u64, event: Option<EventRef>) -> Result<()> {
        let id = self
            .checked_command(command_id)?
            .signal_event
            .ok_or(MclError::InvalidArgument("command has no mutable signal event"))?;
        if let Some(current) = self.variables[id.index()].event() {
            if same_optional_event(current.event.as_ref(), event.as_ref()) {
                return Ok(());
            }
        }
        self.set_value(id, ArgValue::Event(event))?;
        self.updated = true;
        Ok(())
    }

    /// Rebinds the first `events.len()` wait events of a command; `None` entries drop the wait.
    pub fn update_wait_events(&mut self, command_id: u64, events: &[Option<EventRef>]) -> Result<()> {
        let command = self.checked_command(command_id)?;
        if events.len() > command.wait_events.len() {
            return Err(MclError::InvalidArgument("more wait events than recorded"));
        }
        let ids: Vec<VariableId> = command.wait_events[..events.len()].to_vec();
        for (id, event) in ids.into_iter().zip(events) {
            if let Some(current) = self.variables[id.index()].event() {
                if same_optional_event(current.event.as_ref(), event.as_ref()) {
                    continue;
                }
            }
            self.set_value(id, ArgValue::Event(event.clone()))?;
            self.updated = true;
        }
        Ok(())
    }
}
