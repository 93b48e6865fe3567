use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::common::Idx;

#[derive(
    Eq, PartialEq, Debug, Copy, Clone, Hash, Deserialize, Serialize, enum_iterator::Sequence,
)]
pub enum Policy {
    Undefined,
    Sequential,
    Simd,
    Openmp,
    TargetOpenmp,
    Cuda,
}

#[derive(
    Eq, PartialEq, Debug, Copy, Clone, Hash, Deserialize, Serialize, enum_iterator::Sequence,
)]
pub enum Pattern {
    Undefined,
    Forall,
    Reduce,
    Taskgraph,
}

#[derive(
    Eq, PartialEq, Debug, Copy, Clone, Hash, Deserialize, Serialize, enum_iterator::Sequence,
)]
pub enum Launch {
    Undefined,
    Sync,
    Async,
}

#[derive(
    Eq, PartialEq, Debug, Copy, Clone, Hash, Deserialize, Serialize, enum_iterator::Sequence,
)]
pub enum Platform {
    Undefined,
    Host,
    Cuda,
    OmpTarget,
}

/// The classification of an execution policy.
#[derive(Eq, PartialEq, Debug, Copy, Clone, Hash, Deserialize, Serialize)]
pub struct PolicyDescriptor {
    pub policy: Policy,
    pub pattern: Pattern,
    pub launch: Launch,
    pub platform: Platform,
}

/// Execution policy of a single `For` level of a loop nest.
#[derive(Eq, PartialEq, Debug, Copy, Clone, Hash, Deserialize, Serialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum LoopPolicy {
    /// Every thread walks the whole segment.
    Seq,
    Simd,
    OmpParallelFor,
    /// Iterations are distributed over the threads of a block.
    CudaThread,
    /// One iteration per block, distributed over the grid.
    CudaBlock,
    /// The segment is split over at most this many blocks and each chunk is
    /// walked sequentially.
    CudaBlockSeq(#[cfg_attr(test, proptest(strategy = "1..64i32"))] Idx),
    /// Chunks of this many iterations per block, distributed over its threads.
    CudaThreadBlock(#[cfg_attr(test, proptest(strategy = "1..64i32"))] Idx),
}

#[derive(thiserror::Error, Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum ParsePolicyError {
    #[error("Unknown loop policy: {0}")]
    Unknown(String),
    #[error("Policy {0} requires a positive width, e.g. {0}:128")]
    MissingWidth(String),
    #[error("Invalid width in {0}")]
    InvalidWidth(String),
}

impl PolicyDescriptor {
    pub const fn new(policy: Policy, pattern: Pattern, launch: Launch, platform: Platform) -> Self {
        PolicyDescriptor {
            policy,
            pattern,
            launch,
            platform,
        }
    }

    pub fn is_sequential(&self) -> bool {
        self.policy == Policy::Sequential
    }

    pub fn is_simd(&self) -> bool {
        self.policy == Policy::Simd
    }

    pub fn is_openmp(&self) -> bool {
        self.policy == Policy::Openmp
    }

    pub fn is_target_openmp(&self) -> bool {
        self.policy == Policy::TargetOpenmp
    }

    pub fn is_cuda(&self) -> bool {
        self.policy == Policy::Cuda
    }
}

impl LoopPolicy {
    pub fn descriptor(&self) -> PolicyDescriptor {
        match self {
            LoopPolicy::Seq => PolicyDescriptor::new(
                Policy::Sequential,
                Pattern::Forall,
                Launch::Undefined,
                Platform::Host,
            ),
            LoopPolicy::Simd => PolicyDescriptor::new(
                Policy::Simd,
                Pattern::Forall,
                Launch::Undefined,
                Platform::Host,
            ),
            LoopPolicy::OmpParallelFor => PolicyDescriptor::new(
                Policy::Openmp,
                Pattern::Forall,
                Launch::Undefined,
                Platform::Host,
            ),
            LoopPolicy::CudaThread
            | LoopPolicy::CudaBlock
            | LoopPolicy::CudaBlockSeq(_)
            | LoopPolicy::CudaThreadBlock(_) => PolicyDescriptor::new(
                Policy::Cuda,
                Pattern::Forall,
                Launch::Undefined,
                Platform::Cuda,
            ),
        }
    }

    /// Whether a `For` with this policy may appear inside a device kernel.
    pub fn runs_on_device(&self) -> bool {
        let d = self.descriptor();
        d.is_sequential() || d.is_cuda()
    }

    /// Whether this policy distributes its segment over blocks.
    pub fn distributes_blocks(&self) -> bool {
        matches!(
            self,
            LoopPolicy::CudaBlock | LoopPolicy::CudaBlockSeq(_) | LoopPolicy::CudaThreadBlock(_)
        )
    }
}

impl Display for LoopPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopPolicy::Seq => write!(f, "seq"),
            LoopPolicy::Simd => write!(f, "simd"),
            LoopPolicy::OmpParallelFor => write!(f, "omp"),
            LoopPolicy::CudaThread => write!(f, "thread"),
            LoopPolicy::CudaBlock => write!(f, "block"),
            LoopPolicy::CudaBlockSeq(n) => write!(f, "block_seq:{n}"),
            LoopPolicy::CudaThreadBlock(n) => write!(f, "threadblock:{n}"),
        }
    }
}

impl FromStr for LoopPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, width) = match s.split_once(':') {
            Some((name, width)) => (name, Some(width)),
            None => (s, None),
        };
        let parse_width = || -> Result<Idx, ParsePolicyError> {
            let Some(width) = width else {
                return Err(ParsePolicyError::MissingWidth(name.to_owned()));
            };
            match width.parse::<Idx>() {
                Ok(w) if w > 0 => Ok(w),
                _ => Err(ParsePolicyError::InvalidWidth(s.to_owned())),
            }
        };
        let policy = match name {
            "seq" => LoopPolicy::Seq,
            "simd" => LoopPolicy::Simd,
            "omp" => LoopPolicy::OmpParallelFor,
            "thread" => LoopPolicy::CudaThread,
            "block" => LoopPolicy::CudaBlock,
            "block_seq" => LoopPolicy::CudaBlockSeq(parse_width()?),
            "threadblock" => LoopPolicy::CudaThreadBlock(parse_width()?),
            _ => return Err(ParsePolicyError::Unknown(s.to_owned())),
        };
        let takes_width = matches!(
            policy,
            LoopPolicy::CudaBlockSeq(_) | LoopPolicy::CudaThreadBlock(_)
        );
        if width.is_some() && !takes_width {
            return Err(ParsePolicyError::InvalidWidth(s.to_owned()));
        }
        Ok(policy)
    }
}
