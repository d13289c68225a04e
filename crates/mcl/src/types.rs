use std::sync::atomic::{AtomicU64, Ordering};

pub use mcl_hw::GpuAddress;

pub type Dim3 = [u32; 3];

/// Index of a variable in its command list's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableId(pub(crate) u32);

impl VariableId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a kernel dispatch in its command list's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DispatchId(pub(crate) u32);

impl DispatchId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Process-unique identity of a command list; events record it as their producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandListId(u64);

impl CommandListId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Saturates at the largest multiple of `align` that fits a `u32`.
#[inline]
pub(crate) fn align_up_u32(v: u32, align: u32) -> u32 {
    if align <= 1 {
        return v;
    }
    v.checked_next_multiple_of(align)
        .unwrap_or(u32::MAX / align * align)
}

#[inline]
pub(crate) fn align_up_usize(v: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (v + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slm_alignment_need_not_be_a_power_of_two() {
        assert_eq!(align_up_u32(1, 1024), 1024);
        assert_eq!(align_up_u32(10, 12), 12);
        assert_eq!(align_up_u32(7, 0), 7);
        assert_eq!(align_up_u32(u32::MAX - 3, 1024), u32::MAX - 1023);
        assert_eq!(align_up_usize(65, 64), 128);
    }

    #[test]
    fn command_list_ids_are_unique() {
        assert_ne!(CommandListId::next(), CommandListId::next());
    }
}
