//! Physical patch sites of a variable.
//!
//! A kernel's cross-thread payload starts in the walker's inline data window (if the family has
//! one) and continues at the start of its indirect heap region. Offsets in kernel metadata are
//! relative to the full payload; [`PayloadLayout::locate`] turns them into sites in the command
//! stream or the heap, splitting a range that straddles the window boundary.

use mcl_hw::CmdDecodeError;

use crate::container::CommandContainer;
use crate::kernel::ValueElement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchTarget {
    /// Inline data window of a recorded walker.
    CommandBuffer,
    IndirectHeap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchLocation {
    pub target: PatchTarget,
    pub offset: usize,
    pub size: usize,
}

impl PatchLocation {
    pub fn command_buffer(offset: usize, size: usize) -> Self {
        Self {
            target: PatchTarget::CommandBuffer,
            offset,
            size,
        }
    }

    pub fn indirect_heap(offset: usize, size: usize) -> Self {
        Self {
            target: PatchTarget::IndirectHeap,
            offset,
            size,
        }
    }

    /// Writes up to `self.size` leading bytes of `bytes`.
    pub fn write(&self, container: &mut CommandContainer, bytes: &[u8]) {
        let bytes = &bytes[..bytes.len().min(self.size)];
        match self.target {
            PatchTarget::CommandBuffer => container.stream.write_bytes_at(self.offset, bytes),
            PatchTarget::IndirectHeap => container.ioh.write_bytes_at(self.offset, bytes),
        }
    }

    pub fn read<'a>(&self, container: &'a CommandContainer) -> Result<&'a [u8], CmdDecodeError> {
        match self.target {
            PatchTarget::CommandBuffer => container.stream.bytes_at(self.offset, self.size),
            PatchTarget::IndirectHeap => container.ioh.bytes_at(self.offset, self.size),
        }
    }
}

/// Where one dispatch's cross-thread payload lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadLayout {
    pub inline_stream_offset: usize,
    /// 0 when the walker has no inline window.
    pub inline_size: usize,
    pub heap_offset: usize,
}

impl PayloadLayout {
    /// Resolves `[start, start + size)` of the payload into an inline and/or a heap site.
    pub fn locate(&self, start: usize, size: usize) -> (Option<PatchLocation>, Option<PatchLocation>) {
        if start < self.inline_size {
            let inline_part = size.min(self.inline_size - start);
            let inline = PatchLocation::command_buffer(self.inline_stream_offset + start, inline_part);
            let heap = (inline_part < size)
                .then(|| PatchLocation::indirect_heap(self.heap_offset, size - inline_part));
            (Some(inline), heap)
        } else {
            let heap = PatchLocation::indirect_heap(self.heap_offset + (start - self.inline_size), size);
            (None, Some(heap))
        }
    }

    /// Sites of a scalar field; scalars never straddle the window boundary.
    pub fn locate_scalar(&self, start: usize, size: usize) -> PatchLocationList {
        let (inline, heap) = self.locate(start, size);
        PatchLocationList(inline.into_iter().chain(heap).collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchLocationList(Vec<PatchLocation>);

impl PatchLocationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, location: PatchLocation) {
        self.0.push(location);
    }

    pub fn extend(&mut self, other: PatchLocationList) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatchLocation> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Writes the same bytes to every location.
    pub fn write_all(&self, container: &mut CommandContainer, bytes: &[u8]) {
        for location in &self.0 {
            location.write(container, bytes);
        }
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// One element of a by-value argument and the sites it lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueChunk {
    pub size: usize,
    pub source_offset: usize,
    pub inline: Option<PatchLocation>,
    pub heap: Option<PatchLocation>,
}

impl ValueChunk {
    pub fn new(layout: &PayloadLayout, element: &ValueElement) -> Self {
        let (inline, heap) = layout.locate(usize::from(element.offset), usize::from(element.size));
        Self {
            size: usize::from(element.size),
            source_offset: usize::from(element.source_offset),
            inline,
            heap,
        }
    }

    pub fn is_split(&self) -> bool {
        self.inline.is_some() && self.heap.is_some()
    }

    /// Copies this chunk's slice of `value`; a short `value` copies what it has.
    ///
    /// `value.len()` must be greater than `source_offset`.
    pub fn write(&self, container: &mut CommandContainer, value: &[u8]) {
        let bytes_to_copy = self.size.min(value.len() - self.source_offset);
        let src = &value[self.source_offset..self.source_offset + bytes_to_copy];
        match (self.inline, self.heap) {
            (Some(inline), heap) => {
                let inline_part = inline.size.min(src.len());
                inline.write(container, &src[..inline_part]);
                if let Some(heap) = heap {
                    if inline_part < src.len() {
                        heap.write(container, &src[inline_part..]);
                    }
                }
            }
            (None, Some(heap)) => heap.write(container, src),
            (None, None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcl_hw::{GpuFamily, WalkerInit, XE_HPC};

    fn xe_hpc_container() -> (CommandContainer, PayloadLayout) {
        let mut container = CommandContainer::new();
        let walker = container.stream.append_walker(&XE_HPC, &WalkerInit::default());
        let heap_offset = container.ioh.reserve(64);
        let layout = XE_HPC.walker();
        (
            container,
            PayloadLayout {
                inline_stream_offset: walker + layout.inline_data_offset,
                inline_size: layout.inline_data_size,
                heap_offset,
            },
        )
    }

    #[test]
    fn range_past_window_moves_to_heap() {
        let (_, layout) = xe_hpc_container();
        let (inline, heap) = layout.locate(72, 8);
        assert_eq!(inline, None);
        assert_eq!(heap, Some(PatchLocation::indirect_heap(layout.heap_offset + 8, 8)));
    }

    #[test]
    fn no_window_means_heap_offset_is_payload_offset() {
        let layout = PayloadLayout {
            inline_stream_offset: 0,
            inline_size: 0,
            heap_offset: 128,
        };
        assert_eq!(layout.locate(4, 4), (None, Some(PatchLocation::indirect_heap(132, 4))));
    }

    #[test]
    fn straddling_chunk_is_split_at_window_end() {
        let (mut container, layout) = xe_hpc_container();
        let chunk = ValueChunk::new(
            &layout,
            &ValueElement {
                offset: 60,
                size: 8,
                source_offset: 0,
            },
        );
        assert!(chunk.is_split());

        let bytes = [1u8, 2, 3, 4, 5, 6, 7, 8];
        chunk.write(&mut container, &bytes);
        assert_eq!(chunk.inline.unwrap().read(&container).unwrap(), &bytes[..4]);
        assert_eq!(chunk.heap.unwrap().read(&container).unwrap(), &bytes[4..]);
    }

    #[test]
    fn source_offset_selects_bytes() {
        let (mut container, layout) = xe_hpc_container();
        let chunk = ValueChunk::new(
            &layout,
            &ValueElement {
                offset: 80,
                size: 2,
                source_offset: 6,
            },
        );
        chunk.write(&mut container, &[0, 0, 0, 0, 0, 0, 0xaa, 0xbb]);
        assert_eq!(container.ioh.bytes_at(layout.heap_offset + 16, 2).unwrap(), &[0xaa, 0xbb]);
    }
}
