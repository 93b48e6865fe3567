use divrem::DivCeil;

use crate::common::{ArgId, Idx};
use crate::data::KernelData;
use crate::launch::LaunchDim;
use crate::policy::LoopPolicy;
use crate::statement::{LambdaTable, StatementExec, StatementList, StatementNode};
use crate::utils::ascii_name;

/// How a block-distributed level cuts its segment into per-block slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockWidth {
    /// Every block gets this many iterations (the last may get fewer).
    PerBlock(Idx),
    /// The segment is split into at most this many equal slices.
    SplitInto(Idx),
}

/// Grid-stride state of one block-distributed loop level.
///
/// The logical block index is decomposed across nested block loops like a
/// mixed-radix number: this level is the least significant digit, and the
/// quotient is handed to the loops it encloses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockLoop {
    iterations_per_block: Idx,
    num_blocks: Idx,
    block_i: Idx,
}

/// A `For` level distributed over blocks.
#[derive(Debug, Clone)]
pub struct BlockFor {
    arg: ArgId,
    policy: LoopPolicy,
    width: BlockWidth,
    state: BlockLoop,
    enclosed: StatementList,
}

impl BlockWidth {
    pub fn iterations_per_block(&self, len: Idx) -> Idx {
        match *self {
            BlockWidth::PerBlock(n) => n,
            BlockWidth::SplitInto(n) => DivCeil::div_ceil(len, n).max(1),
        }
    }

    /// Number of blocks covering `len` iterations.
    pub fn num_blocks(&self, len: Idx) -> Idx {
        DivCeil::div_ceil(len, self.iterations_per_block(len))
    }
}

impl BlockLoop {
    pub fn num_blocks(&self) -> Idx {
        self.num_blocks
    }

    pub fn block_index(&self) -> Idx {
        self.block_i
    }

    pub fn iterations_per_block(&self) -> Idx {
        self.iterations_per_block
    }

    /// Takes this level's digit of `block_stride` and initializes the
    /// enclosed statements with the remaining quotient.
    pub fn init(
        &mut self,
        enclosed: &mut StatementList,
        data: &mut KernelData,
        width: BlockWidth,
        len: Idx,
        num_logical_blocks: Idx,
        block_stride: Idx,
    ) {
        self.iterations_per_block = width.iterations_per_block(len);
        // An empty segment still gets one (empty) slice.
        self.num_blocks = width.num_blocks(len).max(1);
        self.block_i = block_stride % self.num_blocks;

        enclosed.init_blocks(
            data,
            num_logical_blocks / self.num_blocks,
            block_stride / self.num_blocks,
        );
    }

    /// Advances by `block_carry` blocks and runs the enclosed statements over
    /// the resulting slice of `arg`'s segment.
    ///
    /// The segment is restored before returning.
    pub fn distribute(
        &mut self,
        enclosed: &mut StatementList,
        data: &mut KernelData,
        lambdas: &LambdaTable<'_>,
        arg: ArgId,
        num_logical_blocks: Idx,
        block_carry: Idx,
    ) {
        self.block_i += block_carry;
        let mut carry_out = 0;
        while self.block_i >= self.num_blocks {
            carry_out += 1;
            self.block_i -= self.num_blocks;
        }

        let orig_segment = *data.segment(arg);
        *data.segment_mut(arg) = orig_segment.slice(
            self.block_i * self.iterations_per_block,
            self.iterations_per_block,
        );
        data.assign_offset(arg, 0);

        enclosed.init_thread(data);
        enclosed.exec(data, lambdas, num_logical_blocks, carry_out);

        *data.segment_mut(arg) = orig_segment;
    }
}

impl BlockFor {
    pub fn new(arg: ArgId, policy: LoopPolicy, width: BlockWidth, enclosed: StatementList) -> Self {
        BlockFor {
            arg,
            policy,
            width,
            state: BlockLoop::default(),
            enclosed,
        }
    }

    pub fn arg(&self) -> ArgId {
        self.arg
    }

    pub fn state(&self) -> &BlockLoop {
        &self.state
    }

    fn distribute(
        &mut self,
        data: &mut KernelData,
        lambdas: &LambdaTable<'_>,
        num_logical_blocks: Idx,
        block_carry: Idx,
    ) {
        self.state.distribute(
            &mut self.enclosed,
            data,
            lambdas,
            self.arg,
            num_logical_blocks,
            block_carry,
        );
    }
}

impl StatementExec for BlockFor {
    fn exec(
        &mut self,
        data: &mut KernelData,
        lambdas: &LambdaTable<'_>,
        num_logical_blocks: Idx,
        block_carry: Idx,
    ) {
        // Already inside a grid-stride loop started further out.
        if block_carry >= 0 {
            self.distribute(data, lambdas, num_logical_blocks, block_carry);
            return;
        }

        let pos = data.pos;
        self.init_blocks(data, num_logical_blocks, pos.block_idx);
        self.distribute(data, lambdas, num_logical_blocks, 0);

        let mut logical_block = pos.block_idx + pos.grid_dim;
        while logical_block < num_logical_blocks {
            self.distribute(data, lambdas, num_logical_blocks, pos.grid_dim);
            logical_block += pos.grid_dim;
        }
    }

    fn init_blocks(&mut self, data: &mut KernelData, num_logical_blocks: Idx, block_stride: Idx) {
        let len = data.segment_length(self.arg);
        self.state.init(
            &mut self.enclosed,
            data,
            self.width,
            len,
            num_logical_blocks,
            block_stride,
        );
    }

    fn init_thread(&mut self, data: &mut KernelData) {
        self.enclosed.init_thread(data);
    }

    fn calculate_dimensions(&self, data: &KernelData, max_physical: &LaunchDim) -> LaunchDim {
        let mut dims = self.enclosed.calculate_dimensions(data, max_physical);
        let len = data.segment_length(self.arg);
        dims.add_blocks(self.width.num_blocks(len));
        if let LoopPolicy::CudaThreadBlock(n) = self.policy {
            dims.add_threads(n);
        }
        dims
    }

    fn children(&self) -> &[StatementNode] {
        self.enclosed.stmts()
    }

    fn pprint_line(&self) -> String {
        format!("for {} [{}]", ascii_name(usize::from(self.arg)), self.policy)
    }
}
