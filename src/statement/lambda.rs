use log::warn;
use smallvec::SmallVec;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::Idx;
use crate::data::{GridPos, KernelData};
use crate::index_calc::IndexCalcList;
use crate::launch::LaunchDim;
use crate::statement::{StatementExec, StatementNode};

/// One call of a loop body.
#[derive(Debug)]
pub struct Invocation<'a> {
    pub lambda: usize,
    pub pos: GridPos,
    /// The loop index of every argument, in argument order.
    pub indices: &'a [Idx],
}

type Body<'a> = dyn Fn(&Invocation<'_>) + Sync + 'a;

/// The loop bodies of a kernel, addressed by lambda index.
#[derive(Default)]
pub struct LambdaTable<'a> {
    bodies: Vec<Box<Body<'a>>>,
    invocations: AtomicU64,
}

/// A leaf statement: runs a loop body at every iteration its enclosing loops
/// assign to this execution unit.
#[derive(Debug, Clone)]
pub struct LambdaExec {
    id: usize,
    index_calc: IndexCalcList,
    /// Wraps of the enclosing block loops past their last block. The body is
    /// skipped while this is positive.
    block_quotient: Idx,
}

impl<'a> LambdaTable<'a> {
    pub fn new() -> Self {
        LambdaTable::default()
    }

    /// Registers the next lambda.
    #[must_use]
    pub fn with<F>(mut self, body: F) -> Self
    where
        F: Fn(&Invocation<'_>) + Sync + 'a,
    {
        self.bodies.push(Box::new(body));
        self
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Total number of body calls made through this table.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Calls a registered body. An unregistered lambda is skipped with a
    /// warning; launches reject those up front.
    pub fn invoke(&self, invocation: &Invocation<'_>) {
        match self.bodies.get(invocation.lambda) {
            Some(body) => {
                self.invocations.fetch_add(1, Ordering::Relaxed);
                body(invocation);
            }
            None => warn!(
                "No body registered for lambda {} ({} registered)",
                invocation.lambda,
                self.bodies.len()
            ),
        }
    }
}

impl Debug for LambdaTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LambdaTable")
            .field("len", &self.bodies.len())
            .field("invocations", &self.invocations())
            .finish()
    }
}

impl LambdaExec {
    pub fn new(id: usize, index_calc: IndexCalcList) -> Self {
        LambdaExec {
            id,
            index_calc,
            block_quotient: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn index_calc(&self) -> &IndexCalcList {
        &self.index_calc
    }
}

impl StatementExec for LambdaExec {
    fn exec(
        &mut self,
        data: &mut KernelData,
        lambdas: &LambdaTable<'_>,
        _num_logical_blocks: Idx,
        block_carry: Idx,
    ) {
        if block_carry >= 0 {
            self.block_quotient += block_carry;
            if self.block_quotient > 0 {
                return;
            }
        }

        let mut indices = SmallVec::new();
        let mut done = self.index_calc.reset(data);
        while !done {
            data.fill_indices(&mut indices);
            lambdas.invoke(&Invocation {
                lambda: self.id,
                pos: data.pos,
                indices: &indices,
            });
            done = self.index_calc.increment(data);
        }
    }

    fn init_blocks(&mut self, _data: &mut KernelData, _num_logical_blocks: Idx, block_stride: Idx) {
        self.block_quotient = block_stride;
    }

    fn init_thread(&mut self, data: &mut KernelData) {
        let (thread, threads) = (data.pos.thread_idx, data.pos.block_dim);
        self.index_calc.init_thread(data, thread, threads);
    }

    fn calculate_dimensions(&self, _data: &KernelData, _max_physical: &LaunchDim) -> LaunchDim {
        LaunchDim::default()
    }

    fn children(&self) -> &[StatementNode] {
        &[]
    }

    fn pprint_line(&self) -> String {
        format!("lambda {}", self.id)
    }
}
