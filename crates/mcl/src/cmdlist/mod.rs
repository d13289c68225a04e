//! The mutable command list: recording, variable arena, staged commit and residency.

mod append;
mod event_binding;
mod mutation;
mod variable_ops;

use std::rc::Rc;

use hashbrown::HashSet;
use tracing::debug;

use crate::allocation::{Device, GraphicsAllocation};
use crate::config::MclConfig;
use crate::container::CommandContainer;
use crate::error::{MclError, Result};
use crate::event::InOrderExecInfo;
use crate::residency::MutableResidencyAllocations;
use crate::types::{CommandListId, DispatchId, VariableId};
use crate::variable::{Variable, VariableKind};
use crate::variable_dispatch::VariableDispatch;

pub use self::append::KernelLaunch;
pub use self::mutation::{MutableCommand, MutableCommandDesc, MutationFlags};

/// Counter wait recorded by this list, re-targeted when its wait variable is rebound.
#[derive(Debug, Clone)]
pub struct InOrderPatchCommand {
    exec_info: Rc<InOrderExecInfo>,
    base_counter_value: u64,
    skip_patching: bool,
}

impl InOrderPatchCommand {
    fn new(exec_info: Rc<InOrderExecInfo>, base_counter_value: u64) -> Self {
        Self {
            exec_info,
            base_counter_value,
            skip_patching: false,
        }
    }

    pub fn exec_info(&self) -> &Rc<InOrderExecInfo> {
        &self.exec_info
    }

    pub fn base_counter_value(&self) -> u64 {
        self.base_counter_value
    }

    pub fn skip_patching(&self) -> bool {
        self.skip_patching
    }

    pub(crate) fn update_in_order_exec_info(&mut self, exec_info: Rc<InOrderExecInfo>) {
        self.exec_info = exec_info;
        self.skip_patching = false;
    }

    pub(crate) fn set_skip_patching(&mut self) {
        self.skip_patching = true;
    }
}

/// Size of the list's own in-order counter allocation.
const IN_ORDER_COUNTER_SIZE: u64 = 8;

#[derive(Debug)]
pub struct MutableCommandList {
    id: CommandListId,
    device: Rc<Device>,
    config: MclConfig,
    container: CommandContainer,
    variables: Vec<Variable>,
    dispatches: Vec<VariableDispatch>,
    stage_commit_variables: HashSet<VariableId>,
    residency: MutableResidencyAllocations,
    /// Allocations referenced at record time, sorted by id.
    immutable_residency: Vec<Rc<GraphicsAllocation>>,
    residency_container: Vec<Rc<GraphicsAllocation>>,
    in_order_exec_info: Rc<InOrderExecInfo>,
    in_order_patch_list: Vec<InOrderPatchCommand>,
    commands: Vec<MutableCommand>,
    pending_command_id: Option<u64>,
    base_closed: bool,
    updated: bool,
}

impl MutableCommandList {
    pub fn new(device: Rc<Device>, config: MclConfig) -> Self {
        let counter = device.allocate(IN_ORDER_COUNTER_SIZE);
        let mut list = Self {
            id: CommandListId::next(),
            in_order_exec_info: Rc::new(InOrderExecInfo::new(counter.clone())),
            device,
            config,
            container: CommandContainer::new(),
            variables: Vec::new(),
            dispatches: Vec::new(),
            stage_commit_variables: HashSet::new(),
            residency: MutableResidencyAllocations::default(),
            immutable_residency: Vec::new(),
            residency_container: Vec::new(),
            in_order_patch_list: Vec::new(),
            commands: Vec::new(),
            pending_command_id: None,
            base_closed: false,
            updated: false,
        };
        list.add_immutable_residency(&counter);
        list
    }

    pub fn id(&self) -> CommandListId {
        self.id
    }

    pub fn device(&self) -> &Rc<Device> {
        &self.device
    }

    pub fn config(&self) -> &MclConfig {
        &self.config
    }

    pub fn container(&self) -> &CommandContainer {
        &self.container
    }

    pub fn in_order_exec_info(&self) -> &Rc<InOrderExecInfo> {
        &self.in_order_exec_info
    }

    pub fn in_order_patch_list(&self) -> &[InOrderPatchCommand] {
        &self.in_order_patch_list
    }

    pub fn is_closed(&self) -> bool {
        self.base_closed
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    pub fn create_variable(&mut self, kind: VariableKind) -> VariableId {
        let id = VariableId(self.variables.len() as u32);
        self.variables.push(Variable::new(id, kind, self.config.stage_commit_mode));
        id
    }

    pub fn variable(&self, id: VariableId) -> Option<&Variable> {
        self.variables.get(id.index())
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn dispatch(&self, id: DispatchId) -> Option<&VariableDispatch> {
        self.dispatches.get(id.index())
    }

    pub fn dispatches(&self) -> &[VariableDispatch] {
        &self.dispatches
    }

    fn checked_variable(&self, id: VariableId) -> Result<&Variable> {
        self.variables
            .get(id.index())
            .ok_or(MclError::InvalidArgument("unknown variable"))
    }

    pub fn is_staged(&self, id: VariableId) -> bool {
        self.stage_commit_variables.contains(&id)
    }

    pub fn staged_variable_count(&self) -> usize {
        self.stage_commit_variables.len()
    }

    /// Marks a variable as pending for the next commit pass when it uses staged commit.
    fn set_commit_variable(&mut self, id: VariableId) {
        let var = &mut self.variables[id.index()];
        if var.desc.is_stage_commit {
            var.desc.commit_required = true;
            self.stage_commit_variables.insert(id);
        }
    }

    /// Writes a staged variable's payload and applies pending derived state on its dispatches.
    /// Does nothing when the variable is already up to date.
    pub fn commit_variable(&mut self, id: VariableId) -> Result<()> {
        self.checked_variable(id)?;
        self.commit_variable_inner(id);
        Ok(())
    }

    fn commit_variable_inner(&mut self, id: VariableId) {
        let Self {
            variables,
            dispatches,
            container,
            stage_commit_variables,
            config,
            ..
        } = self;
        let var = &mut variables[id.index()];
        stage_commit_variables.remove(&id);
        if !var.desc.commit_required {
            return;
        }
        mcl_log!(config, variable = id.0, kind = ?var.desc.kind, "commit variable");
        var.write_payload(container);
        for dispatch in &var.used_in_dispatch {
            dispatches[dispatch.index()].commit_changes(container);
        }
        var.desc.commit_required = false;
    }

    /// Commits every dirty variable feeding `dispatch`. Returns whether any was dirty.
    pub fn do_commit_variable_dispatch(&mut self, dispatch: DispatchId) -> bool {
        let Some(d) = self.dispatches.get(dispatch.index()) else {
            return false;
        };
        let dirty: Vec<VariableId> = d
            .variables()
            .filter(|v| self.variables[v.index()].desc.commit_required)
            .collect();
        for &id in &dirty {
            self.commit_variable_inner(id);
        }
        self.dispatches[dispatch.index()].commit_changes(&mut self.container);
        !dirty.is_empty()
    }

    /// Commits all staged variables in creation order and drains the staged set.
    pub fn commit_staged_variables(&mut self) {
        let mut staged: Vec<VariableId> = self.stage_commit_variables.drain().collect();
        staged.sort_unstable();
        mcl_log!(self.config, count = staged.len(), "commit staged variables");
        for id in staged {
            self.commit_variable_inner(id);
        }
    }

    /// Finishes recording or a round of updates: applies staged changes and refreshes residency.
    pub fn close(&mut self) {
        let base_closed_before = self.base_closed;
        self.base_closed = true;

        if !self.stage_commit_variables.is_empty() {
            self.commit_staged_variables();
        }
        self.stage_commit_variables.clear();

        if !base_closed_before {
            self.residency_container = self.immutable_residency.clone();
        }
        self.residency
            .populate_input_residency_container(&mut self.residency_container, base_closed_before);
        debug!(
            list = ?self.id,
            first_close = !base_closed_before,
            updated = self.updated,
            residency = self.residency_container.len(),
            "mutable command list closed"
        );
        self.updated = false;
    }

    /// Drops everything recorded; the list can be recorded again from scratch.
    pub fn reset(&mut self) {
        self.container.clear();
        self.variables.clear();
        self.dispatches.clear();
        self.stage_commit_variables.clear();
        self.residency.clean_residency_container();
        self.immutable_residency.clear();
        self.residency_container.clear();
        self.in_order_patch_list.clear();
        self.commands.clear();
        self.pending_command_id = None;
        self.base_closed = false;
        self.updated = false;
        self.in_order_exec_info.set_counter_value(0);
        if let Some(counter) = self.in_order_exec_info.device_counter_allocation().cloned() {
            self.add_immutable_residency(&counter);
        }
        debug!(list = ?self.id, "mutable command list reset");
    }

    /// Allocations the list needs resident, valid after [`MutableCommandList::close`].
    pub fn residency(&self) -> &[Rc<GraphicsAllocation>] {
        &self.residency_container
    }

    pub fn mutable_residency(&self) -> &MutableResidencyAllocations {
        &self.residency
    }

    fn add_immutable_residency(&mut self, allocation: &Rc<GraphicsAllocation>) {
        if let Err(pos) = self
            .immutable_residency
            .binary_search_by_key(&allocation.id(), |a| a.id())
        {
            self.immutable_residency.insert(pos, allocation.clone());
        }
    }
}
