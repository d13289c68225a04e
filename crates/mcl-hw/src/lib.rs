//! Hardware command layouts, command-stream buffers and in-place command mutators.
//!
//! Commands are modelled as `#[repr(C)]` structs made of whole dword/qword fields. Each GPU
//! family publishes the field offsets of the commands it emits through [`GpuFamily`], so code that
//! re-patches a recorded stream never needs to know which family produced it.

pub mod cmd;
pub mod family;
pub mod mutators;
pub mod stream;

pub use crate::cmd::{CmdDecodeError, CmdHdr, CmdOpcode, GpuAddress};
pub use crate::family::{
    gpu_family_by_name, Gen12LpFamily, GpuFamily, LoadRegisterImmLayout, PipeControlLayout,
    SemaphoreWaitLayout, StoreDataImmLayout, StoreRegisterMemLayout, WalkerInit, WalkerLayout,
    XeHpcFamily, GEN12LP, XE_HPC,
};
pub use crate::mutators::{
    MutableComputeWalker, MutableLoadRegisterImm, MutablePipeControl, MutableSemaphoreWait,
    MutableStoreDataImm, MutableStoreRegisterMem, SemaphoreWaitKind,
};
pub use crate::stream::CommandStream;
