use enum_dispatch::enum_dispatch;

use crate::common::Idx;
use crate::data::KernelData;
use crate::launch::LaunchDim;
use crate::statement::{block::BlockFor, for_loop::ForLoop, lambda::LambdaExec};

pub mod block;
pub mod for_loop;
pub mod lambda;

pub use lambda::{Invocation, LambdaTable};

/// The device-side executor of one node of a kernel's statement tree.
///
/// A tree is built once per nest shape (see [crate::nest]) and every
/// execution unit runs its own clone of it.
#[enum_dispatch]
pub trait StatementExec {
    /// Runs this statement for the current execution unit.
    ///
    /// `block_carry` is negative outside any block loop. Inside one, it is
    /// the number of times the enclosing block index wrapped; a positive
    /// carry reaching a leaf means the logical block is past the end.
    fn exec(
        &mut self,
        data: &mut KernelData,
        lambdas: &LambdaTable<'_>,
        num_logical_blocks: Idx,
        block_carry: Idx,
    );

    /// Sets up block loops for the logical block `block_stride`.
    fn init_blocks(&mut self, data: &mut KernelData, num_logical_blocks: Idx, block_stride: Idx);

    /// Sets up index calculators for the current thread.
    fn init_thread(&mut self, data: &mut KernelData);

    /// The blocks and threads this statement needs, given segment lengths.
    fn calculate_dimensions(&self, data: &KernelData, max_physical: &LaunchDim) -> LaunchDim;

    fn children(&self) -> &[StatementNode];

    fn pprint_line(&self) -> String;
}

#[derive(Debug, Clone)]
#[enum_dispatch(StatementExec)]
pub enum StatementNode {
    For(ForLoop),
    BlockFor(BlockFor),
    Lambda(LambdaExec),
}

/// Sibling statements, executed in declaration order.
#[derive(Debug, Clone, Default)]
pub struct StatementList {
    stmts: Vec<StatementNode>,
}

impl StatementList {
    pub fn new(stmts: Vec<StatementNode>) -> Self {
        StatementList { stmts }
    }

    pub fn stmts(&self) -> &[StatementNode] {
        &self.stmts
    }

    pub fn stmts_mut(&mut self) -> &mut [StatementNode] {
        &mut self.stmts
    }

    pub fn len(&self) -> usize {
        self.stmts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    pub fn exec(
        &mut self,
        data: &mut KernelData,
        lambdas: &LambdaTable<'_>,
        num_logical_blocks: Idx,
        block_carry: Idx,
    ) {
        for stmt in &mut self.stmts {
            stmt.exec(data, lambdas, num_logical_blocks, block_carry);
        }
    }

    pub fn init_blocks(
        &mut self,
        data: &mut KernelData,
        num_logical_blocks: Idx,
        block_stride: Idx,
    ) {
        for stmt in &mut self.stmts {
            stmt.init_blocks(data, num_logical_blocks, block_stride);
        }
    }

    pub fn init_thread(&mut self, data: &mut KernelData) {
        for stmt in &mut self.stmts {
            stmt.init_thread(data);
        }
    }

    /// Merges the requirements of all statements with [LaunchDim::maximum].
    ///
    /// An empty list requires nothing.
    pub fn calculate_dimensions(&self, data: &KernelData, max_physical: &LaunchDim) -> LaunchDim {
        self.stmts
            .iter()
            .map(|stmt| stmt.calculate_dimensions(data, max_physical))
            .fold(LaunchDim::default(), |acc, dims| acc.maximum(&dims))
    }
}
