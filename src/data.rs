use smallvec::SmallVec;

use crate::common::{ArgId, Idx};
use crate::launch::GridShape;
use crate::segment::RangeSegment;

const INLINE_ARGS: usize = 4;

/// Where an execution unit sits in the physical grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridPos {
    pub thread_idx: Idx,
    pub block_idx: Idx,
    /// Threads per block.
    pub block_dim: Idx,
    /// Blocks in the grid.
    pub grid_dim: Idx,
}

/// The per-unit iteration state shared by every calculator and statement.
///
/// Holds one segment and one offset per loop argument. Calculators write
/// offsets in place and lambdas read `segment.begin + offset`.
#[derive(Debug, Clone)]
pub struct KernelData {
    segments: SmallVec<[RangeSegment; INLINE_ARGS]>,
    offsets: SmallVec<[Idx; INLINE_ARGS]>,
    pub pos: GridPos,
}

impl GridPos {
    pub fn new(block_idx: Idx, thread_idx: Idx, grid: GridShape) -> Self {
        debug_assert!((0..grid.blocks).contains(&block_idx));
        debug_assert!((0..grid.threads).contains(&thread_idx));
        GridPos {
            thread_idx,
            block_idx,
            block_dim: grid.threads,
            grid_dim: grid.blocks,
        }
    }

    /// The only position of a 1x1 grid.
    pub fn host() -> Self {
        GridPos::new(0, 0, GridShape::single())
    }
}

impl KernelData {
    pub fn new<I>(segments: I, pos: GridPos) -> Self
    where
        I: IntoIterator<Item = RangeSegment>,
    {
        let segments: SmallVec<_> = segments.into_iter().collect();
        let offsets = smallvec::smallvec![0; segments.len()];
        KernelData {
            segments,
            offsets,
            pos,
        }
    }

    pub fn arg_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, arg: ArgId) -> &RangeSegment {
        &self.segments[usize::from(arg)]
    }

    pub fn segment_mut(&mut self, arg: ArgId) -> &mut RangeSegment {
        &mut self.segments[usize::from(arg)]
    }

    pub fn segment_length(&self, arg: ArgId) -> Idx {
        self.segment(arg).len()
    }

    pub fn offset(&self, arg: ArgId) -> Idx {
        self.offsets[usize::from(arg)]
    }

    pub fn assign_offset(&mut self, arg: ArgId, offset: Idx) {
        self.offsets[usize::from(arg)] = offset;
    }

    /// Writes the current loop index of every argument into `out`.
    pub fn fill_indices(&self, out: &mut SmallVec<[Idx; INLINE_ARGS]>) {
        out.clear();
        out.extend(
            self.segments
                .iter()
                .zip(&self.offsets)
                .map(|(s, &o)| s.begin() + o),
        );
    }
}
