//! Local ID policy and the software local ID generator.
//!
//! Per-thread payload layout: for every hardware thread, one GRF-aligned block per channel
//! (x, then y, then z), each holding one `u16` per SIMD lane.

use mcl_hw::GpuFamily;

use crate::error::{MclError, Result};
use crate::types::{align_up_usize, Dim3};

pub const MAX_WORK_GROUP_SIZE: u32 = 1024;

/// Work-items in one group, saturating instead of wrapping.
pub fn work_group_items(group_size: Dim3) -> u64 {
    group_size
        .iter()
        .fold(1u64, |acc, &v| acc.saturating_mul(u64::from(v)))
}

/// Rejects work-groups larger than the per-thread payload reserved at record time.
pub fn check_work_group_size(group_size: Dim3) -> Result<()> {
    if work_group_items(group_size) > u64::from(MAX_WORK_GROUP_SIZE) {
        return Err(MclError::InvalidArgument("work-group size exceeds the device maximum"));
    }
    Ok(())
}

/// Product of the components in the wrapping `u32` arithmetic of the walker and payload fields.
pub fn wrapping_product(v: Dim3) -> u32 {
    v.iter().fold(1u32, |acc, &x| acc.wrapping_mul(x))
}

/// Outcome of the local ID policy for one group size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalIdGeneration {
    pub by_runtime: bool,
    /// Walk order encoding used by the hardware generator; 0 when the runtime generates IDs.
    pub walk_order: u32,
}

impl LocalIdGeneration {
    const RUNTIME: Self = Self {
        by_runtime: true,
        walk_order: 0,
    };

    const fn hardware(walk_order: u32) -> Self {
        Self {
            by_runtime: false,
            walk_order,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalIdRequest {
    pub num_channels: u32,
    pub simd_size: u32,
    pub group_size: Dim3,
    pub requires_walk_order: bool,
    pub walk_order: [u8; 3],
    pub force_sw: bool,
}

pub fn requires_runtime_local_ids(family: &dyn GpuFamily, req: &LocalIdRequest) -> LocalIdGeneration {
    if req.num_channels == 0 {
        return LocalIdGeneration::hardware(0);
    }
    let hw_orders = family.hw_walk_orders();
    let oversized = work_group_items(req.group_size) > u64::from(MAX_WORK_GROUP_SIZE);
    if req.force_sw || hw_orders.is_empty() || req.simd_size == 1 || oversized {
        return LocalIdGeneration::RUNTIME;
    }

    let fastest_dim_is_pow2 = |order: &[u8; 3]| req.group_size[usize::from(order[0])].is_power_of_two();

    if req.requires_walk_order {
        return match hw_orders.iter().position(|o| *o == req.walk_order) {
            Some(idx) if fastest_dim_is_pow2(&req.walk_order) => LocalIdGeneration::hardware(idx as u32),
            _ => LocalIdGeneration::RUNTIME,
        };
    }

    hw_orders
        .iter()
        .position(fastest_dim_is_pow2)
        .map_or(LocalIdGeneration::RUNTIME, |idx| LocalIdGeneration::hardware(idx as u32))
}

fn channel_block_size(simd_size: u32, grf_size: u32) -> usize {
    align_up_usize(simd_size.max(1) as usize * 2, grf_size as usize)
}

pub fn num_threads(total_lws: u32, simd_size: u32) -> u32 {
    total_lws.div_ceil(simd_size.max(1))
}

pub fn per_thread_data_size(simd_size: u32, grf_size: u32, num_channels: u32, total_lws: u32) -> usize {
    num_threads(total_lws, simd_size) as usize * num_channels as usize * channel_block_size(simd_size, grf_size)
}

/// Fills `out` (exactly [`per_thread_data_size`] bytes) with local IDs walked in `walk_order`,
/// fastest dimension first.
pub fn generate_local_ids(
    out: &mut [u8],
    simd_size: u32,
    grf_size: u32,
    num_channels: u32,
    group_size: Dim3,
    walk_order: [u8; 3],
) {
    out.fill(0);
    let simd = simd_size.max(1);
    let total = wrapping_product(group_size);
    let block = channel_block_size(simd, grf_size);
    let channels = num_channels.min(3) as usize;

    let [a, b, c] = walk_order.map(usize::from);
    for thread in 0..num_threads(total, simd) {
        let thread_base = thread as usize * channels * block;
        for lane in 0..simd {
            let i = thread.wrapping_mul(simd).wrapping_add(lane);
            if i >= total {
                break;
            }
            let mut id = [0u32; 3];
            id[a] = i % group_size[a];
            id[b] = (i / group_size[a]) % group_size[b];
            id[c] = i / group_size[a].wrapping_mul(group_size[b]);

            for (ch, v) in id.iter().take(channels).enumerate() {
                let at = thread_base + ch * block + lane as usize * 2;
                out[at..at + 2].copy_from_slice(&(*v as u16).to_le_bytes());
            }
        }
    }
}

/// Lanes active in the last thread of a work-group.
pub fn thread_execution_mask(total_lws: u32, simd_size: u32) -> u32 {
    let max_n_bits = |n: u32| if n >= 32 { u32::MAX } else { (1u32 << n) - 1 };
    let remainder = total_lws & simd_size.wrapping_sub(1);
    match max_n_bits(remainder) {
        0 if simd_size == 1 => max_n_bits(32),
        0 => max_n_bits(simd_size),
        mask => mask,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcl_hw::{GEN12LP, XE_HPC};

    fn req(group_size: Dim3) -> LocalIdRequest {
        LocalIdRequest {
            num_channels: 3,
            simd_size: 16,
            group_size,
            requires_walk_order: false,
            walk_order: [0, 1, 2],
            force_sw: false,
        }
    }

    #[test]
    fn no_channels_never_needs_runtime_ids() {
        let r = LocalIdRequest {
            num_channels: 0,
            force_sw: true,
            ..req([3, 1, 1])
        };
        assert_eq!(requires_runtime_local_ids(&XE_HPC, &r), LocalIdGeneration::hardware(0));
    }

    #[test]
    fn family_without_generator_uses_runtime() {
        assert!(requires_runtime_local_ids(&GEN12LP, &req([8, 1, 1])).by_runtime);
        assert!(!requires_runtime_local_ids(&XE_HPC, &req([8, 1, 1])).by_runtime);
    }

    #[test]
    fn picks_first_order_with_power_of_two_fastest_dim() {
        let g = requires_runtime_local_ids(&XE_HPC, &req([3, 4, 1]));
        assert_eq!(g, LocalIdGeneration::hardware(2));
        assert!(requires_runtime_local_ids(&XE_HPC, &req([3, 5, 7])).by_runtime);
    }

    #[test]
    fn required_walk_order_must_be_walkable() {
        let r = LocalIdRequest {
            requires_walk_order: true,
            walk_order: [1, 0, 2],
            ..req([3, 4, 1])
        };
        assert_eq!(requires_runtime_local_ids(&XE_HPC, &r), LocalIdGeneration::hardware(2));
        let r = LocalIdRequest {
            walk_order: [0, 1, 2],
            ..r
        };
        assert!(requires_runtime_local_ids(&XE_HPC, &r).by_runtime);
    }

    #[test]
    fn ids_follow_walk_order() {
        let (simd, grf) = (8, 32);
        let size = per_thread_data_size(simd, grf, 2, 6);
        assert_eq!(size, 2 * 32);

        let mut out = vec![0u8; size];
        generate_local_ids(&mut out, simd, grf, 2, [2, 3, 1], [0, 1, 2]);
        let lane = |ch: usize, l: usize| u16::from_le_bytes([out[ch * 32 + l * 2], out[ch * 32 + l * 2 + 1]]);
        let xs: Vec<_> = (0..8).map(|l| lane(0, l)).collect();
        let ys: Vec<_> = (0..8).map(|l| lane(1, l)).collect();
        assert_eq!(xs, vec![0, 1, 0, 1, 0, 1, 0, 0]);
        assert_eq!(ys, vec![0, 0, 1, 1, 2, 2, 0, 0]);
    }

    #[test]
    fn execution_mask_covers_remainder_lanes() {
        assert_eq!(thread_execution_mask(20, 16), 0xf);
        assert_eq!(thread_execution_mask(32, 16), 0xffff);
        assert_eq!(thread_execution_mask(5, 1), u32::MAX);
        assert_eq!(thread_execution_mask(64, 32), u32::MAX);
    }
}
