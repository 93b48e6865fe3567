//! Launching a statement tree over a simulated grid.

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::common::{Idx, NO_BLOCK_CARRY};
use crate::data::{GridPos, KernelData};
use crate::launch::{GridShape, LaunchDim, LaunchError, LaunchLimits, LaunchPlan};
use crate::nest::{build, BuildError, Stmt};
use crate::segment::RangeSegment;
use crate::statement::{LambdaTable, StatementList};

/// A loop nest bound to its segments, ready to launch.
#[derive(Debug, Clone)]
pub struct Kernel {
    root: StatementList,
    segments: SmallVec<[RangeSegment; 4]>,
    /// One more than the largest lambda index in the nest.
    lambda_count: usize,
}

/// What a launch ran on and how much work it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct LaunchStats {
    pub required: LaunchDim,
    pub grid: GridShape,
    pub invocations: u64,
}

impl Kernel {
    pub fn new<I>(nest: &[Stmt], segments: I) -> Result<Self, BuildError>
    where
        I: IntoIterator<Item = RangeSegment>,
    {
        let segments: SmallVec<[RangeSegment; 4]> = segments.into_iter().collect();
        let root = build(nest, segments.len())?;
        let mut lambda_count = 0;
        for stmt in nest {
            stmt.visit_lambdas(&mut |id| lambda_count = lambda_count.max(id + 1));
        }
        Ok(Kernel {
            root,
            segments,
            lambda_count,
        })
    }

    pub fn root(&self) -> &StatementList {
        &self.root
    }

    pub fn segments(&self) -> &[RangeSegment] {
        &self.segments
    }

    pub fn lambda_count(&self) -> usize {
        self.lambda_count
    }

    fn data_at(&self, pos: GridPos) -> KernelData {
        KernelData::new(self.segments.iter().copied(), pos)
    }

    /// The blocks and threads the statement tree asks for.
    pub fn required_dims(&self, limits: &LaunchLimits) -> LaunchDim {
        let data = self.data_at(GridPos::host());
        self.root.calculate_dimensions(&data, &limits.max_dims)
    }

    pub fn plan(&self, limits: &LaunchLimits) -> Result<LaunchPlan, LaunchError> {
        limits.plan(self.required_dims(limits))
    }

    /// Runs the kernel on the grid chosen by `limits`.
    ///
    /// Blocks run in parallel and the threads of a block run one after
    /// another. Every execution unit works on its own copy of the kernel data
    /// and statement tree.
    pub fn launch(
        &self,
        limits: &LaunchLimits,
        lambdas: &LambdaTable<'_>,
    ) -> Result<LaunchStats, LaunchError> {
        if lambdas.len() < self.lambda_count {
            return Err(LaunchError::MissingLambda(lambdas.len()));
        }
        let plan = self.plan(limits)?;
        debug!(
            "Launching {} logical blocks on a {} grid (required {})",
            plan.num_logical_blocks, plan.grid, plan.required
        );

        let before = lambdas.invocations();
        (0..plan.grid.blocks).into_par_iter().for_each(|block| {
            for thread in 0..plan.grid.threads {
                let pos = GridPos::new(block, thread, plan.grid);
                self.run_unit(pos, plan.num_logical_blocks, lambdas);
            }
        });

        Ok(LaunchStats {
            required: plan.required,
            grid: plan.grid,
            invocations: lambdas.invocations() - before,
        })
    }

    /// Runs the kernel on a single block of a single thread.
    pub fn launch_host(&self, lambdas: &LambdaTable<'_>) -> Result<LaunchStats, LaunchError> {
        self.launch(&LaunchLimits::new(1, 1), lambdas)
    }

    fn run_unit(&self, pos: GridPos, num_logical_blocks: Idx, lambdas: &LambdaTable<'_>) {
        let mut data = self.data_at(pos);
        let mut root = self.root.clone();
        root.init_thread(&mut data);
        root.exec(&mut data, lambdas, num_logical_blocks, NO_BLOCK_CARRY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ArgId;
    use crate::nest::{for_loop, lambda, perfect_nest};
    use crate::policy::LoopPolicy;
    use crate::trace::VisitLog;
    use itertools::{iproduct, Itertools};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn tuple(indices: &[Idx]) -> SmallVec<[Idx; 4]> {
        SmallVec::from_slice(indices)
    }

    fn segments(lens: &[Idx]) -> Vec<RangeSegment> {
        lens.iter().map(|&l| RangeSegment::new(0, l)).collect()
    }

    /// Launches with a recording body for every lambda of the kernel.
    fn run(kernel: &Kernel, limits: &LaunchLimits) -> (LaunchStats, VisitLog) {
        let log = VisitLog::new();
        let stats = {
            let table = (0..kernel.lambda_count())
                .fold(LambdaTable::new(), |table, _| table.with(log.recorder()));
            kernel.launch(limits, &table).unwrap()
        };
        (stats, log)
    }

    /// Asserts every index tuple of the nest was visited exactly once.
    fn assert_covers_once(log: &VisitLog, lens: &[Idx]) {
        let coverage = log.coverage();
        let expected = lens.iter().map(|&l| 0..l).multi_cartesian_product().collect_vec();
        let expected_len = if lens.is_empty() { 1 } else { expected.len() };
        assert_eq!(coverage.len(), expected_len, "{coverage:?}");
        assert!(coverage.values().all(|&c| c == 1), "{coverage:?}");
        for indices in expected {
            assert!(coverage.contains_key(&(0, tuple(&indices))));
        }
    }

    #[test]
    fn test_lambda_alone_runs_once() {
        let kernel = Kernel::new(&[lambda(0)], []).unwrap();
        let (stats, log) = run(&kernel, &LaunchLimits::default());
        assert_eq!(stats.grid, GridShape::single());
        assert_eq!(stats.invocations, 1);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_block_loop_strides_over_physical_blocks() {
        let nest = [for_loop(0, LoopPolicy::CudaBlock, vec![lambda(0)])];
        let kernel = Kernel::new(&nest, segments(&[7])).unwrap();
        let limits = LaunchLimits::default().with_physical_blocks(3);
        let (stats, log) = run(&kernel, &limits);
        assert_eq!(stats.required, LaunchDim::new(7, 0));
        assert_eq!(stats.grid, GridShape { blocks: 3, threads: 1 });
        assert_covers_once(&log, &[7]);

        let units = log.by_unit();
        let firsts = |b: Idx| units[&(b, 0)].iter().map(|v| v[0]).collect_vec();
        assert_eq!(firsts(0), vec![0, 3, 6]);
        assert_eq!(firsts(1), vec![1, 4]);
        assert_eq!(firsts(2), vec![2, 5]);
    }

    #[test]
    fn test_nested_block_loops_share_logical_blocks() {
        let nest = perfect_nest(&[LoopPolicy::CudaBlock, LoopPolicy::CudaBlock], lambda(0));
        let kernel = Kernel::new(&[nest], segments(&[3, 4])).unwrap();
        let limits = LaunchLimits::default().with_physical_blocks(5);
        let (stats, log) = run(&kernel, &limits);
        assert_eq!(stats.required, LaunchDim::new(12, 0));
        assert_eq!(stats.grid.blocks, 5);
        assert_covers_once(&log, &[3, 4]);
        // Logical block 7 is (7 % 3, 7 / 3) and runs on physical block 2.
        assert!(log.by_unit()[&(2, 0)].contains(&tuple(&[1, 2])));
    }

    #[test]
    fn test_threadblock_splits_into_chunks() {
        let kernel = Kernel::new(
            &[for_loop(0, LoopPolicy::CudaThreadBlock(4), vec![lambda(0)])],
            segments(&[10]),
        )
        .unwrap();
        let (stats, log) = run(&kernel, &LaunchLimits::default());
        assert_eq!(stats.grid, GridShape { blocks: 3, threads: 4 });
        assert_covers_once(&log, &[10]);
        for ((block, thread), visits) in log.by_unit() {
            assert_eq!(visits, vec![tuple(&[block * 4 + thread])]);
        }
    }

    #[test]
    fn test_clamped_threads_stride() {
        let nest = [for_loop(0, LoopPolicy::CudaThread, vec![lambda(0)])];
        let kernel = Kernel::new(&nest, segments(&[10])).unwrap();
        let (stats, log) = run(&kernel, &LaunchLimits::new(8, 4));
        assert_eq!(stats.grid.threads, 4);
        assert_covers_once(&log, &[10]);
        assert_eq!(log.by_unit()[&(0, 2)].len(), 2);
    }

    #[test]
    fn test_host_launch_walks_blocks_outermost() {
        let nest = perfect_nest(
            &[LoopPolicy::Seq, LoopPolicy::CudaBlock, LoopPolicy::CudaThread],
            lambda(0),
        );
        let kernel = Kernel::new(&[nest], segments(&[2, 2, 3])).unwrap();
        let log = VisitLog::new();
        let stats = {
            let table = LambdaTable::new().with(log.recorder());
            kernel.launch_host(&table).unwrap()
        };
        assert_eq!(stats.grid, GridShape::single());
        assert_eq!(stats.required, LaunchDim::new(2, 3));
        assert_covers_once(&log, &[2, 2, 3]);

        // The block loop carries no calculator, so the grid-stride over its
        // logical blocks is outside the sequential walk of `a` and `c`.
        let expected = iproduct!(0..2, 0..2, 0..3)
            .map(|(b, a, c)| tuple(&[a, b, c]))
            .collect_vec();
        assert_eq!(log.by_unit()[&(0, 0)], expected);
    }

    #[test]
    fn test_empty_thread_segment_is_infeasible() {
        let nest = [for_loop(0, LoopPolicy::CudaThread, vec![lambda(0)])];
        let kernel = Kernel::new(&nest, segments(&[0])).unwrap();
        let table = LambdaTable::new().with(|_: &crate::statement::Invocation<'_>| {});
        assert!(matches!(
            kernel.launch(&LaunchLimits::default(), &table),
            Err(LaunchError::Infeasible(_))
        ));
        assert_eq!(table.invocations(), 0);
    }

    #[test]
    fn test_missing_lambda_is_rejected() {
        let nest = [lambda(0), lambda(1)];
        let kernel = Kernel::new(&nest, []).unwrap();
        assert_eq!(kernel.lambda_count(), 2);
        let table = LambdaTable::new().with(|_: &crate::statement::Invocation<'_>| {});
        assert_eq!(
            kernel.launch(&LaunchLimits::default(), &table).unwrap_err(),
            LaunchError::MissingLambda(1)
        );
    }

    #[test]
    fn test_sibling_lambdas_run_in_order() {
        let nest = [
            for_loop(0, LoopPolicy::Seq, vec![lambda(0)]),
            for_loop(0, LoopPolicy::Seq, vec![lambda(1)]),
        ];
        let kernel = Kernel::new(&nest, segments(&[2])).unwrap();
        let log = VisitLog::new();
        {
            let table = LambdaTable::new().with(log.recorder()).with(log.recorder());
            kernel.launch_host(&table).unwrap();
        }
        let order = log.visits().into_iter().map(|v| (v.lambda, v.indices[0])).collect_vec();
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn test_sibling_block_loops_skip_surplus_logical_blocks() {
        let nest = [
            for_loop(0, LoopPolicy::CudaBlock, vec![lambda(0)]),
            for_loop(1, LoopPolicy::CudaBlock, vec![lambda(1)]),
        ];
        let kernel = Kernel::new(&nest, segments(&[2, 6])).unwrap();
        let expected = (0..2)
            .map(|a| ((0, tuple(&[a, 0])), 1))
            .chain((0..6).map(|b| ((1, tuple(&[0, b])), 1)))
            .collect::<BTreeMap<_, _>>();
        for limits in [
            LaunchLimits::default(),
            LaunchLimits::default().with_physical_blocks(4),
        ] {
            let (stats, log) = run(&kernel, &limits);
            assert_eq!(stats.required, LaunchDim::new(6, 0));
            assert_eq!(log.coverage(), expected, "{limits:?}");
        }
    }

    #[test]
    fn test_body_beside_inner_block_loop_runs_once() {
        let nest = [for_loop(
            0,
            LoopPolicy::CudaBlock,
            vec![
                lambda(0),
                for_loop(1, LoopPolicy::CudaBlock, vec![lambda(1)]),
            ],
        )];
        let kernel = Kernel::new(&nest, segments(&[2, 3])).unwrap();
        let expected = (0..2)
            .map(|a| ((0, tuple(&[a, 0])), 1))
            .chain(iproduct!(0..2, 0..3).map(|(a, b)| ((1, tuple(&[a, b])), 1)))
            .collect::<BTreeMap<_, _>>();
        for limits in [
            LaunchLimits::default(),
            LaunchLimits::default().with_physical_blocks(4),
        ] {
            let (stats, log) = run(&kernel, &limits);
            assert_eq!(stats.required, LaunchDim::new(6, 0));
            assert_eq!(log.coverage(), expected, "{limits:?}");
        }
    }

    fn arb_device_policy() -> impl Strategy<Value = LoopPolicy> {
        prop_oneof![
            Just(LoopPolicy::Seq),
            Just(LoopPolicy::CudaThread),
            Just(LoopPolicy::CudaBlock),
            (1..4).prop_map(LoopPolicy::CudaBlockSeq),
            (1..5).prop_map(LoopPolicy::CudaThreadBlock),
        ]
    }

    /// One or two sibling statements, each a lambda or a loop over one of
    /// the `free` arguments.
    fn arb_body(free: Vec<ArgId>, depth: u32) -> BoxedStrategy<Vec<Stmt>> {
        if depth == 0 || free.is_empty() {
            return prop::collection::vec(Just(lambda(0)), 1..=2).boxed();
        }
        let nested = (prop::sample::select(free.clone()), arb_device_policy())
            .prop_flat_map(move |(arg, policy)| {
                let rest = free.iter().copied().filter(|&a| a != arg).collect_vec();
                arb_body(rest, depth - 1).prop_map(move |body| for_loop(arg, policy, body))
            });
        let stmt = prop_oneof![1 => Just(lambda(0)).boxed(), 3 => nested.boxed()];
        prop::collection::vec(stmt, 1..=2).boxed()
    }

    /// Gives every lambda its own index, in depth-first order.
    fn number_lambdas(stmts: &mut [Stmt], next: &mut usize) {
        for stmt in stmts {
            match stmt {
                Stmt::Lambda(id) => {
                    *id = *next;
                    *next += 1;
                }
                Stmt::For { body, .. } => number_lambdas(body, next),
            }
        }
    }

    /// The loops around a lambda.
    #[derive(Debug, Clone, Default)]
    struct Enclosing {
        args: Vec<ArgId>,
        blocks: bool,
        threads: bool,
    }

    fn enclosing_loops(stmts: &[Stmt], outer: &Enclosing, out: &mut Vec<Enclosing>) {
        for stmt in stmts {
            match stmt {
                Stmt::Lambda(_) => out.push(outer.clone()),
                Stmt::For { arg, policy, body } => {
                    let mut inner = outer.clone();
                    inner.args.push(*arg);
                    inner.blocks |= policy.distributes_blocks();
                    inner.threads |=
                        matches!(policy, LoopPolicy::CudaThread | LoopPolicy::CudaThreadBlock(_));
                    enclosing_loops(body, &inner, out);
                }
            }
        }
    }

    proptest! {
        #[test]
        fn test_perfect_nest_covers_iteration_space_once(
            levels in prop::collection::vec((1..=6, arb_device_policy()), 1..=3),
            physical_blocks in 1..=4,
        ) {
            let (lens, policies): (Vec<Idx>, Vec<LoopPolicy>) = levels.into_iter().unzip();
            let nest = [perfect_nest(&policies, lambda(0))];
            let kernel = Kernel::new(&nest, segments(&lens)).unwrap();
            let limits = LaunchLimits::default().with_physical_blocks(physical_blocks);
            let (stats, log) = run(&kernel, &limits);
            prop_assert!(stats.grid.blocks <= physical_blocks);
            prop_assert_eq!(stats.invocations, lens.iter().product::<Idx>() as u64);
            assert_covers_once(&log, &lens);
        }

        #[test]
        fn test_every_body_covers_its_loops(
            mut nest in arb_body(vec![0, 1, 2], 3),
            lens in prop::collection::vec(1..=4, 3),
            max_threads in 1..=8,
            physical_blocks in 1..=4,
        ) {
            let mut lambda_count = 0;
            number_lambdas(&mut nest, &mut lambda_count);
            let mut loops = vec![];
            enclosing_loops(&nest, &Enclosing::default(), &mut loops);

            let kernel = Kernel::new(&nest, segments(&lens)).unwrap();
            let limits = LaunchLimits::new(Idx::MAX, max_threads)
                .with_physical_blocks(physical_blocks);
            let (stats, log) = run(&kernel, &limits);
            prop_assert!(stats.grid.threads <= max_threads);
            prop_assert!(stats.grid.blocks <= physical_blocks);

            // Bodies outside every block loop run in each block, and bodies
            // without a thread level run in each thread.
            let mut expected = BTreeMap::new();
            for (id, enclosing) in loops.iter().enumerate() {
                let per_block = if enclosing.blocks { 1 } else { stats.grid.blocks };
                let per_thread = if enclosing.threads { 1 } else { stats.grid.threads };
                let tuples = if enclosing.args.is_empty() {
                    vec![vec![]]
                } else {
                    enclosing
                        .args
                        .iter()
                        .map(|&a| 0..lens[usize::from(a)])
                        .multi_cartesian_product()
                        .collect_vec()
                };
                for t in tuples {
                    expected.insert((id, t), usize::try_from(per_block * per_thread).unwrap());
                }
            }

            let mut seen: BTreeMap<(usize, Vec<Idx>), usize> = BTreeMap::new();
            for v in log.visits() {
                let bound = loops[v.lambda]
                    .args
                    .iter()
                    .map(|&a| v.indices[usize::from(a)])
                    .collect_vec();
                *seen.entry((v.lambda, bound)).or_default() += 1;
            }
            prop_assert_eq!(stats.invocations, expected.values().sum::<usize>() as u64);
            prop_assert_eq!(seen, expected);
        }
    }
}
