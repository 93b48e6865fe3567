//! Declarative loop nests and their assembly into executor trees.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::common::ArgId;
use crate::index_calc::{IndexCalcList, SeqCalc, ThreadCalc};
use crate::policy::LoopPolicy;
use crate::statement::block::{BlockFor, BlockWidth};
use crate::statement::for_loop::ForLoop;
use crate::statement::lambda::LambdaExec;
use crate::statement::{StatementList, StatementNode};

/// A statement of a kernel body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum Stmt {
    For {
        arg: ArgId,
        policy: LoopPolicy,
        body: Vec<Stmt>,
    },
    Lambda(usize),
}

#[derive(thiserror::Error, Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum BuildError {
    #[error("Loop argument {arg} is out of range for {count} segments")]
    ArgumentOutOfRange { arg: ArgId, count: usize },
    #[error("Loop argument {0} is already bound by an enclosing loop")]
    ArgumentReused(ArgId),
    #[error("Policy {0} cannot execute inside a device kernel")]
    UnsupportedPolicy(LoopPolicy),
    #[error("Policy {0} needs a positive width")]
    ZeroWidth(LoopPolicy),
}

pub fn for_loop(arg: ArgId, policy: LoopPolicy, body: Vec<Stmt>) -> Stmt {
    Stmt::For { arg, policy, body }
}

pub fn lambda(id: usize) -> Stmt {
    Stmt::Lambda(id)
}

/// Nests one loop per policy around `body`, outermost first. Loop `i` binds
/// argument `i`.
pub fn perfect_nest(policies: &[LoopPolicy], body: Stmt) -> Stmt {
    policies
        .iter()
        .enumerate()
        .rev()
        .fold(body, |inner, (i, &policy)| {
            let arg = ArgId::try_from(i).unwrap_or(ArgId::MAX);
            for_loop(arg, policy, vec![inner])
        })
}

impl Stmt {
    /// Calls `f` with the index of every lambda under this statement.
    pub fn visit_lambdas<F: FnMut(usize)>(&self, f: &mut F) {
        match self {
            Stmt::For { body, .. } => body.iter().for_each(|s| s.visit_lambdas(f)),
            Stmt::Lambda(id) => f(*id),
        }
    }
}

/// Assembles executors for a nest over `arg_count` segments.
///
/// Every lambda receives the calculator list of the `For` levels enclosing
/// it, outermost first.
pub fn build(nest: &[Stmt], arg_count: usize) -> Result<StatementList, BuildError> {
    let mut bound = SmallVec::new();
    build_list(nest, arg_count, &IndexCalcList::terminator(), &mut bound)
}

fn build_list(
    stmts: &[Stmt],
    arg_count: usize,
    index_calc: &IndexCalcList,
    bound: &mut SmallVec<[ArgId; 4]>,
) -> Result<StatementList, BuildError> {
    let mut nodes = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        nodes.push(build_stmt(stmt, arg_count, index_calc, bound)?);
    }
    Ok(StatementList::new(nodes))
}

fn build_stmt(
    stmt: &Stmt,
    arg_count: usize,
    index_calc: &IndexCalcList,
    bound: &mut SmallVec<[ArgId; 4]>,
) -> Result<StatementNode, BuildError> {
    let (arg, policy, body) = match stmt {
        Stmt::Lambda(id) => return Ok(LambdaExec::new(*id, index_calc.clone()).into()),
        Stmt::For { arg, policy, body } => (*arg, *policy, body),
    };

    if usize::from(arg) >= arg_count {
        return Err(BuildError::ArgumentOutOfRange {
            arg,
            count: arg_count,
        });
    }
    if bound.contains(&arg) {
        return Err(BuildError::ArgumentReused(arg));
    }
    if !policy.runs_on_device() {
        return Err(BuildError::UnsupportedPolicy(policy));
    }
    if let LoopPolicy::CudaBlockSeq(n) | LoopPolicy::CudaThreadBlock(n) = policy {
        if n <= 0 {
            return Err(BuildError::ZeroWidth(policy));
        }
    }

    let inner_calc = match policy {
        LoopPolicy::Seq | LoopPolicy::CudaBlockSeq(_) => index_calc.extended(SeqCalc::new(arg)),
        LoopPolicy::CudaThread | LoopPolicy::CudaThreadBlock(_) => {
            index_calc.extended(ThreadCalc::new(arg))
        }
        // Each block holds a single iteration, assigned when the block's
        // slice is taken.
        LoopPolicy::CudaBlock => index_calc.clone(),
        LoopPolicy::Simd | LoopPolicy::OmpParallelFor => unreachable!(),
    };

    bound.push(arg);
    let enclosed = build_list(body, arg_count, &inner_calc, bound);
    bound.pop();
    let enclosed = enclosed?;

    if !policy.distributes_blocks() {
        return Ok(ForLoop::new(arg, policy, enclosed).into());
    }
    let width = match policy {
        LoopPolicy::CudaThreadBlock(n) => BlockWidth::PerBlock(n),
        LoopPolicy::CudaBlockSeq(n) => BlockWidth::SplitInto(n),
        _ => BlockWidth::PerBlock(1),
    };
    Ok(BlockFor::new(arg, policy, width, enclosed).into())
}
