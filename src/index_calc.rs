//! Per-dimension offset calculators and their composition over a loop nest.
//!
//! Each loop level of a nest contributes one calculator. A calculator owns the
//! offset slot of its loop argument in [KernelData] and steps it like one digit
//! of a mixed-radix counter: the digit wraps at the segment length, and the
//! overflow ("carry") is added to the next outer digit.

use enum_dispatch::enum_dispatch;
use smallvec::SmallVec;

use crate::common::{ArgId, Idx};
use crate::data::KernelData;

/// Marks a thread calculator whose execution unit has no iterations.
const NO_WORK: Idx = -1;

/// Values handed from a calculator to its outer neighbour during
/// initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarryPair {
    /// The starting offset (or number of skipped iterations) carried out.
    pub first: Idx,
    /// The stride, in units of the outer dimension, of one increment.
    pub second: Idx,
}

#[enum_dispatch]
pub trait IndexCalc {
    /// The loop argument whose offset this calculator writes.
    fn arg(&self) -> ArgId;

    /// Sets up the starting offset and stride for one execution unit.
    ///
    /// `carry_init` is the unit's linear index among `carry_incr` units as seen
    /// by this dimension. `last` is set for the final calculator to consume
    /// the carry chain.
    fn init_thread(
        &mut self,
        data: &mut KernelData,
        carry_init: Idx,
        carry_incr: Idx,
        last: bool,
    ) -> CarryPair;

    /// Assigns the starting offset. Returns `true` if there are no iterations.
    fn reset(&self, data: &mut KernelData) -> bool;

    /// Advances the offset by `carry_in` and returns the carry out.
    fn increment(&self, data: &mut KernelData, carry_in: Idx) -> Idx;
}

/// Every execution unit walks the whole segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqCalc {
    arg: ArgId,
}

/// The segment is strided over the threads of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadCalc {
    arg: ArgId,
    /// Offset assigned on reset, or [NO_WORK].
    i0: Idx,
    /// Minimum number of full trips over the segment per increment.
    full_cycle: Idx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[enum_dispatch(IndexCalc)]
pub enum IndexCalcNode {
    Seq(SeqCalc),
    Thread(ThreadCalc),
}

/// The calculators of one loop nest, outermost first.
///
/// Initialization and increments visit the calculators innermost first.
/// An empty list stands for a statement outside any loop; it runs exactly
/// once per execution unit.
///
/// A sequential level revisits the same inner thread offsets on each of its
/// iterations. When it absorbs a carry, the offsets inside it are rewound to
/// where its current sweep started, and they only move on once it wraps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexCalcList {
    calcs: SmallVec<[IndexCalcNode; 4]>,
    /// Per sequential calculator, the inner offsets at the start of its sweep.
    sweep_starts: SmallVec<[SmallVec<[Idx; 4]>; 4]>,
}

impl SeqCalc {
    pub fn new(arg: ArgId) -> Self {
        SeqCalc { arg }
    }
}

impl IndexCalc for SeqCalc {
    fn arg(&self) -> ArgId {
        self.arg
    }

    fn init_thread(
        &mut self,
        _data: &mut KernelData,
        carry_init: Idx,
        carry_incr: Idx,
        _last: bool,
    ) -> CarryPair {
        CarryPair {
            first: carry_init,
            second: carry_incr,
        }
    }

    fn reset(&self, data: &mut KernelData) -> bool {
        data.assign_offset(self.arg, 0);
        data.segment_length(self.arg) == 0
    }

    fn increment(&self, data: &mut KernelData, carry_in: Idx) -> Idx {
        let i = data.offset(self.arg) + 1;
        if i >= data.segment_length(self.arg) {
            data.assign_offset(self.arg, 0);
            carry_in
        } else {
            data.assign_offset(self.arg, i);
            0
        }
    }
}

impl ThreadCalc {
    pub fn new(arg: ArgId) -> Self {
        ThreadCalc {
            arg,
            i0: NO_WORK,
            full_cycle: 0,
        }
    }

    pub fn initial_offset(&self) -> Option<Idx> {
        (self.i0 >= 0).then_some(self.i0)
    }

    pub fn full_cycle(&self) -> Idx {
        self.full_cycle
    }
}

impl IndexCalc for ThreadCalc {
    fn arg(&self) -> ArgId {
        self.arg
    }

    fn init_thread(
        &mut self,
        data: &mut KernelData,
        carry_thread: Idx,
        carry_incr: Idx,
        last: bool,
    ) -> CarryPair {
        let len = data.segment_length(self.arg);

        // An empty segment leaves the whole nest empty.
        if len == 0 || (last && carry_thread >= len) {
            self.i0 = NO_WORK;
            self.full_cycle = 0;
            return CarryPair {
                first: 0,
                second: 0,
            };
        }

        let carry_out = carry_thread / len;
        self.i0 = carry_thread - carry_out * len;
        self.full_cycle = carry_incr / len;
        CarryPair {
            first: carry_out,
            second: self.full_cycle,
        }
    }

    fn reset(&self, data: &mut KernelData) -> bool {
        data.assign_offset(self.arg, self.i0);
        self.i0 < 0
    }

    fn increment(&self, data: &mut KernelData, carry_in: Idx) -> Idx {
        let len = data.segment_length(self.arg);
        let mut i = data.offset(self.arg) + carry_in - len * self.full_cycle;

        let mut carry_out = self.full_cycle;
        while i >= len {
            i -= len;
            carry_out += 1;
        }

        data.assign_offset(self.arg, i);
        carry_out
    }
}

impl IndexCalcList {
    /// The empty list.
    pub fn terminator() -> Self {
        IndexCalcList::default()
    }

    /// Returns a copy of this list with `calc` appended as the new innermost
    /// dimension.
    #[must_use]
    pub fn extended(&self, calc: impl Into<IndexCalcNode>) -> Self {
        let mut calcs = self.calcs.clone();
        calcs.push(calc.into());
        IndexCalcList {
            calcs,
            sweep_starts: SmallVec::new(),
        }
    }

    pub fn calcs(&self) -> &[IndexCalcNode] {
        &self.calcs
    }

    pub fn len(&self) -> usize {
        self.calcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calcs.is_empty()
    }

    /// Computes starting offsets for unit `thread` of `num_threads`. Must be
    /// called whenever a segment in the nest changes.
    ///
    /// The carry chain ends at the outermost thread calculator; sequential
    /// calculators outside it only pass values through.
    pub fn init_thread(&mut self, data: &mut KernelData, thread: Idx, num_threads: Idx) {
        let last_carrier = self
            .calcs
            .iter()
            .position(|c| matches!(c, IndexCalcNode::Thread(_)))
            .unwrap_or(0);

        let mut carry = CarryPair {
            first: thread,
            second: num_threads,
        };
        for (idx, calc) in self.calcs.iter_mut().enumerate().rev() {
            carry = calc.init_thread(data, carry.first, carry.second, idx == last_carrier);
        }
    }

    /// Assigns starting offsets to every argument in the nest. Returns `true`
    /// if this unit has no iterations.
    pub fn reset(&mut self, data: &mut KernelData) -> bool {
        let empty = self.calcs.iter().rev().any(|calc| calc.reset(data));
        if !empty {
            self.sweep_starts.resize(self.calcs.len(), SmallVec::new());
            self.mark_sweeps(data, 0);
        }
        empty
    }

    /// Steps to this unit's next iteration. Returns `true` once the nest is
    /// exhausted, i.e. a carry leaves the outermost dimension.
    pub fn increment(&mut self, data: &mut KernelData) -> bool {
        let carry_in = data.pos.block_dim;
        self.increment_by(data, carry_in) > 0
    }

    /// Propagates `carry_in` from the innermost dimension outward, stopping at
    /// the first dimension which absorbs it. Returns the carry out of the
    /// outermost dimension.
    pub fn increment_by(&mut self, data: &mut KernelData, carry_in: Idx) -> Idx {
        let mut carry = carry_in;
        for depth in (0..self.calcs.len()).rev() {
            carry = self.calcs[depth].increment(data, carry);
            if carry == 0 {
                if matches!(self.calcs[depth], IndexCalcNode::Seq(_)) {
                    self.rewind(data, depth);
                }
                self.mark_sweeps(data, depth + 1);
                return 0;
            }
        }
        carry
    }

    /// Records the inner offsets of every sequential calculator at or inside
    /// `from` as the start of a new sweep.
    fn mark_sweeps(&mut self, data: &KernelData, from: usize) {
        for depth in from..self.calcs.len() {
            if !matches!(self.calcs[depth], IndexCalcNode::Seq(_)) {
                continue;
            }
            let Some(start) = self.sweep_starts.get_mut(depth) else {
                return;
            };
            let inner = self.calcs[depth + 1..].iter().map(|c| data.offset(c.arg()));
            start.clear();
            start.extend(inner);
        }
    }

    fn rewind(&self, data: &mut KernelData, depth: usize) {
        let Some(start) = self.sweep_starts.get(depth) else {
            return;
        };
        for (calc, &offset) in self.calcs[depth + 1..].iter().zip(start) {
            data.assign_offset(calc.arg(), offset);
        }
    }
}
