//! Variables: symbolic kernel arguments and dispatch parameters bound to patch sites.
//!
//! A [`Variable`] only knows its own payload and patch sites. Anything that crosses variables
//! (SLM chains, dispatch derivation, event residency) is driven by
//! [`MutableCommandList`](crate::MutableCommandList), which owns the variable arena.

use std::rc::Rc;

use mcl_hw::{
    MutableLoadRegisterImm, MutablePipeControl, MutableSemaphoreWait, MutableStoreDataImm,
    MutableStoreRegisterMem,
};

use crate::allocation::GraphicsAllocation;
use crate::container::CommandContainer;
use crate::error::{MclError, Result};
use crate::event::EventRef;
use crate::kernel::{AddressSpace, KernelArg};
use crate::patch::{PatchLocationList, PayloadLayout, ValueChunk};
use crate::types::{DispatchId, Dim3, GpuAddress, VariableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    GroupCount,
    GroupSize,
    GlobalOffset,
    Buffer,
    Value,
    SlmBuffer,
    SignalEvent,
    WaitEvent,
}

impl VariableKind {
    pub fn is_dispatch_geometry(self) -> bool {
        matches!(self, Self::GroupCount | Self::GroupSize | Self::GlobalOffset)
    }

    pub fn is_event(self) -> bool {
        matches!(self, Self::SignalEvent | Self::WaitEvent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableState {
    /// Kind is known; patch sites may still be added.
    Defined,
    /// Holds a value that has been programmed at least once.
    Initialized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDescriptor {
    pub kind: VariableKind,
    pub state: VariableState,
    /// Payload size in bytes: 12 for dispatch geometry, 8 for pointers, the argument size for
    /// values and 0 for events.
    pub size: usize,
    pub commit_required: bool,
    pub is_stage_commit: bool,
}

/// Typed stand-in for a raw `(size, pointer)` argument.
#[derive(Debug, Clone)]
pub enum ArgValue<'a> {
    /// Pointer argument; `None` is a null pointer.
    Buffer(Option<u64>),
    Bytes(&'a [u8]),
    SlmSize(u32),
    Dim3(Dim3),
    Event(Option<EventRef>),
}

impl ArgValue<'_> {
    pub(crate) fn fits(&self, kind: VariableKind) -> bool {
        match self {
            Self::Buffer(_) => kind == VariableKind::Buffer,
            Self::Bytes(_) => kind == VariableKind::Value,
            Self::SlmSize(_) => kind == VariableKind::SlmBuffer,
            Self::Dim3(_) => kind.is_dispatch_geometry(),
            Self::Event(_) => kind.is_event(),
        }
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Bytes(_) => "bytes",
            Self::SlmSize(_) => "slm size",
            Self::Dim3(_) => "dim3",
            Self::Event(_) => "event",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BufferValue {
    /// Pointer as supplied by the caller.
    pub pointer: Option<u64>,
    pub gpu_address: GpuAddress,
    pub allocation: Option<Rc<GraphicsAllocation>>,
}

#[derive(Debug, Clone, Default)]
pub struct ImmediateValue {
    pub bytes: Vec<u8>,
    pub chunks: Vec<ValueChunk>,
}

impl ImmediateValue {
    /// Rejects values that do not reach every chunk's source bytes.
    pub(crate) fn validate(&self, value: &[u8]) -> Result<()> {
        if self.chunks.iter().any(|c| c.source_offset >= value.len()) {
            return Err(MclError::InvalidArgument("value shorter than argument element"));
        }
        Ok(())
    }

    pub(crate) fn write(&self, container: &mut CommandContainer) {
        for chunk in &self.chunks {
            chunk.write(container, &self.bytes);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlmValue {
    pub slm_size: u32,
    /// Offset of this argument inside the dispatch's SLM.
    pub slm_offset_value: u32,
    pub slm_alignment: u32,
    pub next_slm_variable: Option<VariableId>,
}

impl Default for SlmValue {
    fn default() -> Self {
        Self {
            slm_size: 0,
            slm_offset_value: 0,
            slm_alignment: 1,
            next_slm_variable: None,
        }
    }
}

/// State of a signal or wait variable and every command it keeps patched.
#[derive(Debug, Default)]
pub struct EventValue {
    pub event: Option<EventRef>,
    pub counter_based_event: bool,
    /// All bound commands are currently zeroed.
    pub noop_state: bool,
    pub is_cb_event_bound_to_cmd_list: bool,
    pub in_order_increment_event: bool,
    pub in_order_allocation_offset: u64,
    pub in_order_exec_base_signal_value: u64,
    pub has_standalone_profiling_node: bool,
    pub kernel_count: u32,
    pub packet_count: u32,
    pub wait_packets: u32,
    pub event_pool_allocation: Option<Rc<GraphicsAllocation>>,
    pub cb_event_device_counter_allocation: Option<Rc<GraphicsAllocation>>,
    pub sem_wait_cmds: Vec<MutableSemaphoreWait>,
    pub store_data_imm_cmds: Vec<MutableStoreDataImm>,
    pub store_reg_mem_cmds: Vec<MutableStoreRegisterMem>,
    /// Low/high pairs for qword counter waits.
    pub load_reg_imm_cmds: Vec<MutableLoadRegisterImm>,
    /// Dispatch whose walker post-sync signals the event.
    pub walker: Option<DispatchId>,
    pub pipe_control: Option<MutablePipeControl>,
}

#[derive(Debug)]
pub enum VariablePayload {
    Dim3(Dim3),
    Buffer(BufferValue),
    Value(ImmediateValue),
    Slm(SlmValue),
    Event(Box<EventValue>),
}

impl VariablePayload {
    fn for_kind(kind: VariableKind) -> Self {
        match kind {
            VariableKind::GroupCount | VariableKind::GroupSize | VariableKind::GlobalOffset => {
                Self::Dim3([0; 3])
            }
            VariableKind::Buffer => Self::Buffer(BufferValue::default()),
            VariableKind::Value => Self::Value(ImmediateValue::default()),
            VariableKind::SlmBuffer => Self::Slm(SlmValue::default()),
            VariableKind::SignalEvent | VariableKind::WaitEvent => {
                Self::Event(Box::new(EventValue {
                    noop_state: true,
                    ..EventValue::default()
                }))
            }
        }
    }
}

#[derive(Debug)]
pub struct Variable {
    id: VariableId,
    pub(crate) desc: VariableDescriptor,
    pub(crate) payload: VariablePayload,
    /// Pointer and SLM offset sites.
    pub(crate) locations: PatchLocationList,
    pub(crate) used_in_dispatch: Vec<DispatchId>,
}

impl Variable {
    pub(crate) fn new(id: VariableId, kind: VariableKind, is_stage_commit: bool) -> Self {
        let size = match kind {
            k if k.is_dispatch_geometry() => 12,
            k if k.is_event() => 0,
            _ => 8,
        };
        Self {
            id,
            desc: VariableDescriptor {
                kind,
                state: VariableState::Defined,
                size,
                commit_required: false,
                is_stage_commit,
            },
            payload: VariablePayload::for_kind(kind),
            locations: PatchLocationList::new(),
            used_in_dispatch: Vec::new(),
        }
    }

    pub fn id(&self) -> VariableId {
        self.id
    }

    pub fn kind(&self) -> VariableKind {
        self.desc.kind
    }

    pub fn desc(&self) -> &VariableDescriptor {
        &self.desc
    }

    pub fn payload(&self) -> &VariablePayload {
        &self.payload
    }

    pub fn locations(&self) -> &PatchLocationList {
        &self.locations
    }

    pub fn used_in_dispatch(&self) -> &[DispatchId] {
        &self.used_in_dispatch
    }

    pub fn dim3(&self) -> Option<Dim3> {
        match &self.payload {
            VariablePayload::Dim3(v) => Some(*v),
            _ => None,
        }
    }

    pub fn buffer(&self) -> Option<&BufferValue> {
        match &self.payload {
            VariablePayload::Buffer(v) => Some(v),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&ImmediateValue> {
        match &self.payload {
            VariablePayload::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn slm(&self) -> Option<&SlmValue> {
        match &self.payload {
            VariablePayload::Slm(v) => Some(v),
            _ => None,
        }
    }

    pub fn event(&self) -> Option<&EventValue> {
        match &self.payload {
            VariablePayload::Event(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn slm_mut(&mut self) -> Option<&mut SlmValue> {
        match &mut self.payload {
            VariablePayload::Slm(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn event_mut(&mut self) -> Option<&mut EventValue> {
        match &mut self.payload {
            VariablePayload::Event(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn unsupported(&self) -> MclError {
        MclError::UnsupportedKind { kind: self.desc.kind }
    }

    pub(crate) fn add_used_in_dispatch(&mut self, dispatch: DispatchId) {
        if !self.used_in_dispatch.contains(&dispatch) {
            self.used_in_dispatch.push(dispatch);
        }
    }

    fn accepts(&self, arg: &KernelArg) -> bool {
        match (self.desc.kind, arg) {
            (VariableKind::Buffer, KernelArg::Pointer { address_space, .. }) => {
                *address_space == AddressSpace::Global
            }
            (VariableKind::SlmBuffer, KernelArg::Pointer { address_space, .. }) => {
                matches!(address_space, AddressSpace::Local { .. })
            }
            (VariableKind::Value, KernelArg::Value { .. }) => true,
            _ => false,
        }
    }

    /// Records where `arg` lives in one dispatch's payload.
    pub fn bind_kernel_argument(&mut self, arg: &KernelArg, payload: &PayloadLayout) -> Result<()> {
        if self.desc.state != VariableState::Defined || !self.accepts(arg) {
            return Err(MclError::InvalidArgument("variable does not match kernel argument"));
        }
        match (arg, &mut self.payload) {
            (KernelArg::Pointer { offset, address_space }, payload_value) => {
                let size = match address_space {
                    AddressSpace::Global => 8,
                    AddressSpace::Local { required_alignment } => {
                        if let VariablePayload::Slm(slm) = payload_value {
                            slm.slm_alignment = (*required_alignment).max(1);
                        }
                        4
                    }
                };
                if let Some(offset) = offset {
                    self.locations.extend(payload.locate_scalar(usize::from(*offset), size));
                }
            }
            (KernelArg::Value { elements }, VariablePayload::Value(value)) => {
                value.chunks.extend(elements.iter().map(|e| ValueChunk::new(payload, e)));
                self.desc.size = elements
                    .iter()
                    .map(|e| usize::from(e.source_offset) + usize::from(e.size))
                    .max()
                    .unwrap_or(0);
            }
            (KernelArg::Value { .. }, _) => {
                return Err(MclError::UnsupportedKind { kind: self.desc.kind });
            }
        }
        Ok(())
    }

    /// Writes the current buffer address or value bytes to every site.
    pub(crate) fn write_payload(&self, container: &mut CommandContainer) {
        match &self.payload {
            VariablePayload::Buffer(buffer) => {
                self.locations.write_all(container, &buffer.gpu_address.to_le_bytes());
            }
            VariablePayload::Value(value) => value.write(container),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::ValueElement;
    use crate::patch::PatchLocation;

    fn heap_only() -> PayloadLayout {
        PayloadLayout {
            inline_stream_offset: 0,
            inline_size: 0,
            heap_offset: 64,
        }
    }

    #[test]
    fn kernel_argument_kind_must_match() {
        let mut slm = Variable::new(VariableId(0), VariableKind::SlmBuffer, true);
        assert!(slm.bind_kernel_argument(&KernelArg::global_pointer(0), &heap_only()).is_err());
        slm.bind_kernel_argument(&KernelArg::slm_pointer(8, 16), &heap_only()).unwrap();
        assert_eq!(slm.slm().unwrap().slm_alignment, 16);
        assert_eq!(slm.locations().iter().next(), Some(&PatchLocation::indirect_heap(72, 4)));

        let mut group_size = Variable::new(VariableId(1), VariableKind::GroupSize, true);
        assert_eq!(
            group_size.bind_kernel_argument(&KernelArg::value(0, 4), &heap_only()),
            Err(MclError::InvalidArgument("variable does not match kernel argument"))
        );
    }

    #[test]
    fn value_size_covers_all_elements() {
        let mut v = Variable::new(VariableId(0), VariableKind::Value, false);
        let arg = KernelArg::Value {
            elements: vec![
                ValueElement {
                    offset: 0,
                    size: 1,
                    source_offset: 0,
                },
                ValueElement {
                    offset: 4,
                    size: 8,
                    source_offset: 8,
                },
            ],
        };
        v.bind_kernel_argument(&arg, &heap_only()).unwrap();
        assert_eq!(v.desc().size, 16);
        assert_eq!(v.value().unwrap().chunks.len(), 2);
        assert!(v.value().unwrap().validate(&[0u8; 8]).is_err());
        assert!(v.value().unwrap().validate(&[0u8; 9]).is_ok());
    }

    #[test]
    fn fresh_event_variable_is_nooped() {
        let v = Variable::new(VariableId(0), VariableKind::WaitEvent, true);
        assert!(v.event().unwrap().noop_state);
        assert_eq!(v.desc().size, 0);
        assert_eq!(v.desc().state, VariableState::Defined);
    }
}
