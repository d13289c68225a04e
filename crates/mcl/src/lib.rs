//! In-place mutation of recorded GPU command lists.
//!
//! A [`MutableCommandList`] records kernel launches into a [`CommandContainer`] and keeps, for
//! every mutable parameter, a [`Variable`] that knows where that parameter landed: inline data of
//! the dispatch walker, the indirect heap, or fields of synchronization commands. Updating a
//! variable re-patches exactly those bytes, either right away or at the next commit when staged
//! commit is enabled.

/// Mutation log line. `MclConfig::print_data` raises it from `trace` to `debug`.
macro_rules! mcl_log {
    ($config:expr, $($arg:tt)+) => {
        if $config.print_data {
            ::tracing::debug!($($arg)+)
        } else {
            ::tracing::trace!($($arg)+)
        }
    };
}

pub mod allocation;
pub mod cmdlist;
pub mod config;
pub mod container;
pub mod error;
pub mod event;
pub mod indirect_data;
pub mod kernel;
pub mod local_ids;
pub mod patch;
pub mod residency;
pub mod types;
pub mod variable;
pub mod variable_dispatch;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use crate::allocation::{Device, GraphicsAllocation, ResolvedPointer};
pub use crate::cmdlist::{
    InOrderPatchCommand, KernelLaunch, MutableCommand, MutableCommandDesc, MutableCommandList,
    MutationFlags,
};
pub use crate::config::MclConfig;
pub use crate::container::{CommandContainer, IndirectHeap};
pub use crate::error::{MclError, Result};
pub use crate::event::{same_event, Event, EventRef, InOrderExecInfo};
pub use crate::kernel::{
    AddressSpace, CrossThreadOffsets, DispatchGeometry, KernelArg, KernelData, KernelDescriptor,
    ValueElement,
};
pub use crate::patch::{PatchLocation, PatchLocationList, PatchTarget, PayloadLayout, ValueChunk};
pub use crate::residency::MutableResidencyAllocations;
pub use crate::types::{CommandListId, Dim3, DispatchId, GpuAddress, VariableId};
pub use crate::variable::{
    ArgValue, BufferValue, EventValue, ImmediateValue, SlmValue, Variable, VariableDescriptor,
    VariableKind, VariablePayload, VariableState,
};
pub use crate::variable_dispatch::VariableDispatch;
