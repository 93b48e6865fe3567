use crate::common::{ArgId, Idx};
use crate::data::KernelData;
use crate::launch::LaunchDim;
use crate::policy::LoopPolicy;
use crate::statement::{LambdaTable, StatementExec, StatementList, StatementNode};
use crate::utils::ascii_name;

/// A `For` level distributed over threads or walked sequentially.
///
/// The level itself does nothing at run time: its index calculator was
/// appended to the calculator list of every lambda it encloses when the tree
/// was built. It only contributes its thread requirement.
#[derive(Debug, Clone)]
pub struct ForLoop {
    arg: ArgId,
    policy: LoopPolicy,
    enclosed: StatementList,
}

impl ForLoop {
    pub fn new(arg: ArgId, policy: LoopPolicy, enclosed: StatementList) -> Self {
        debug_assert!(matches!(policy, LoopPolicy::Seq | LoopPolicy::CudaThread));
        ForLoop {
            arg,
            policy,
            enclosed,
        }
    }

    pub fn arg(&self) -> ArgId {
        self.arg
    }

    pub fn policy(&self) -> LoopPolicy {
        self.policy
    }
}

impl StatementExec for ForLoop {
    fn exec(
        &mut self,
        data: &mut KernelData,
        lambdas: &LambdaTable<'_>,
        num_logical_blocks: Idx,
        block_carry: Idx,
    ) {
        self.enclosed
            .exec(data, lambdas, num_logical_blocks, block_carry);
    }

    fn init_blocks(&mut self, data: &mut KernelData, num_logical_blocks: Idx, block_stride: Idx) {
        self.enclosed
            .init_blocks(data, num_logical_blocks, block_stride);
    }

    fn init_thread(&mut self, data: &mut KernelData) {
        self.enclosed.init_thread(data);
    }

    fn calculate_dimensions(&self, data: &KernelData, max_physical: &LaunchDim) -> LaunchDim {
        let mut dims = self.enclosed.calculate_dimensions(data, max_physical);
        if self.policy == LoopPolicy::CudaThread {
            dims.add_threads(data.segment_length(self.arg));
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
