use std::rc::Rc;

use crate::allocation::GraphicsAllocation;

#[derive(Debug)]
struct AddedAllocation {
    allocation: Rc<GraphicsAllocation>,
    ref_count: u32,
}

/// Allocations made resident by mutation, on top of the command list's immutable residency.
///
/// Several variables may point at the same allocation, so entries are ref-counted and disappear
/// when the last user switches away.
#[derive(Debug, Default)]
pub struct MutableResidencyAllocations {
    added: Vec<AddedAllocation>,
    immutable_residency_size: usize,
}

impl MutableResidencyAllocations {
    pub fn add_allocation(&mut self, allocation: &Rc<GraphicsAllocation>) {
        match self.added.iter_mut().find(|a| a.allocation.id() == allocation.id()) {
            Some(entry) => entry.ref_count += 1,
            None => self.added.push(AddedAllocation {
                allocation: allocation.clone(),
                ref_count: 1,
            }),
        }
    }

    pub fn remove_allocation(&mut self, allocation: &GraphicsAllocation) {
        let Some(pos) = self.added.iter().position(|a| a.allocation.id() == allocation.id()) else {
            return;
        };
        self.added[pos].ref_count -= 1;
        if self.added[pos].ref_count == 0 {
            self.added.swap_remove(pos);
        }
    }

    pub fn ref_count(&self, allocation: &GraphicsAllocation) -> u32 {
        self.added
            .iter()
            .find(|a| a.allocation.id() == allocation.id())
            .map_or(0, |a| a.ref_count)
    }

    pub fn len(&self) -> usize {
        self.added.len()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
    }

    /// Appends the mutable allocations to `residency`.
    ///
    /// The first call after recording (`base_closed == false`) remembers how long the immutable,
    /// id-sorted prefix is; later calls truncate back to that prefix before appending, so the
    /// result never accumulates allocations a mutation has since dropped.
    pub fn populate_input_residency_container(
        &mut self,
        residency: &mut Vec<Rc<GraphicsAllocation>>,
        base_closed: bool,
    ) {
        if base_closed {
            residency.truncate(self.immutable_residency_size);
        } else {
            self.immutable_residency_size = residency.len();
        }
        for added in &self.added {
            let immutable = &residency[..self.immutable_residency_size];
            if immutable
                .binary_search_by_key(&added.allocation.id(), |a| a.id())
                .is_err()
            {
                residency.push(added.allocation.clone());
            }
        }
    }

    pub fn clean_residency_container(&mut self) {
        self.added.clear();
        self.immutable_residency_size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc(addr: u64) -> Rc<GraphicsAllocation> {
        Rc::new(GraphicsAllocation::new(addr, 0x1000, 0))
    }

    #[test]
    fn entries_are_ref_counted() {
        let a = alloc(0x1000);
        let mut r = MutableResidencyAllocations::default();
        r.add_allocation(&a);
        r.add_allocation(&a);
        r.remove_allocation(&a);
        assert_eq!(r.ref_count(&a), 1);
        r.remove_allocation(&a);
        assert!(r.is_empty());
        r.remove_allocation(&a);
        assert!(r.is_empty());
    }

    #[test]
    fn removal_swaps_with_last() {
        let (a, b, c) = (alloc(0x1000), alloc(0x2000), alloc(0x3000));
        let mut r = MutableResidencyAllocations::default();
        r.add_allocation(&a);
        r.add_allocation(&b);
        r.add_allocation(&c);
        r.remove_allocation(&a);

        let mut out = Vec::new();
        r.populate_input_residency_container(&mut out, false);
        let ids: Vec<_> = out.iter().map(|x| x.id()).collect();
        assert_eq!(ids, vec![c.id(), b.id()]);
    }

    #[test]
    fn immutable_prefix_is_kept_and_not_duplicated() {
        let (a, b, c) = (alloc(0x1000), alloc(0x2000), alloc(0x3000));
        let mut residency = vec![a.clone(), b.clone()];
        let mut r = MutableResidencyAllocations::default();
        r.add_allocation(&b);
        r.add_allocation(&c);

        r.populate_input_residency_container(&mut residency, false);
        assert_eq!(residency.len(), 3);

        r.remove_allocation(&c);
        r.populate_input_residency_container(&mut residency, true);
        let ids: Vec<_> = residency.iter().map(|x| x.id()).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
    }
}
