use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::ops::Mul;

use crate::common::Idx;

/// Value of a [LaunchDim] coordinate which has no feasible assignment.
pub const POISON: Idx = -1;

const DEFAULT_MAX_THREADS: Idx = 1024;
const DEFAULT_MAX_BLOCKS: Idx = Idx::MAX;

/// The number of blocks and threads a statement needs.
///
/// In each coordinate, `0` means "no preference", a positive value means
/// exactly that many are needed, and [POISON] (`-1`) means the requirement
/// cannot be satisfied.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct LaunchDim {
    pub blocks: Idx,
    pub threads: Idx,
}

/// Ceilings on a launch, as reported by the device.
///
/// `max_dims` bounds a single launch. `physical_dims`, when positive in a
/// coordinate, further bounds that coordinate to what is resident at once;
/// logical work beyond it is revisited by the grid-stride loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct LaunchLimits {
    pub max_dims: LaunchDim,
    pub physical_dims: LaunchDim,
}

/// The physical grid a kernel runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct GridShape {
    pub blocks: Idx,
    pub threads: Idx,
}

/// A chosen launch: what the statement tree asked for and what it gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct LaunchPlan {
    pub required: LaunchDim,
    pub grid: GridShape,
    /// Number of logical blocks the block loops distribute over.
    pub num_logical_blocks: Idx,
}

#[derive(thiserror::Error, Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum LaunchError {
    #[error("Cannot satisfy the requested resource shape {0}")]
    Infeasible(LaunchDim),
    #[error("Launch limits must be positive, got {0}")]
    InvalidLimits(LaunchDim),
    #[error("Lambda {0} has no registered body")]
    MissingLambda(usize),
}

impl LaunchDim {
    pub const fn new(blocks: Idx, threads: Idx) -> Self {
        LaunchDim { blocks, threads }
    }

    pub fn is_poisoned(&self) -> bool {
        self.blocks == POISON || self.threads == POISON
    }

    /// Coordinate-wise maximum of two requirements.
    ///
    /// A coordinate is [POISON] if it is [POISON] in either operand.
    #[must_use]
    pub fn maximum(&self, other: &LaunchDim) -> LaunchDim {
        let mut result = LaunchDim::new(POISON, POISON);
        if self.blocks > POISON && other.blocks > POISON {
            result.blocks = self.blocks.max(other.blocks);
        }
        if self.threads > POISON && other.threads > POISON {
            result.threads = self.threads.max(other.threads);
        }
        result
    }

    /// Folds one more level of thread multiplicity into this requirement.
    ///
    /// Passing `0` poisons the coordinate. An unset (`0`) accumulator adopts
    /// `t` outright.
    pub fn add_threads(&mut self, t: Idx) {
        self.threads = fold_level(self.threads, t);
    }

    /// Folds one more level of block multiplicity into this requirement.
    ///
    /// Follows the same trap rule as [LaunchDim::add_threads].
    pub fn add_blocks(&mut self, b: Idx) {
        self.blocks = fold_level(self.blocks, b);
    }
}

fn fold_level(acc: Idx, factor: Idx) -> Idx {
    if factor == 0 || acc == POISON {
        POISON
    } else if acc == 0 {
        factor
    } else {
        acc * factor
    }
}

impl Mul for LaunchDim {
    type Output = LaunchDim;

    fn mul(self, rhs: LaunchDim) -> LaunchDim {
        LaunchDim::new(self.blocks * rhs.blocks, self.threads * rhs.threads)
    }
}

impl Display for LaunchDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} blocks, {} threads)", self.blocks, self.threads)
    }
}

impl Default for LaunchLimits {
    fn default() -> Self {
        LaunchLimits {
            max_dims: LaunchDim::new(DEFAULT_MAX_BLOCKS, DEFAULT_MAX_THREADS),
            physical_dims: LaunchDim::default(),
        }
    }
}

impl LaunchLimits {
    pub fn new(max_blocks: Idx, max_threads: Idx) -> Self {
        LaunchLimits {
            max_dims: LaunchDim::new(max_blocks, max_threads),
            physical_dims: LaunchDim::default(),
        }
    }

    /// Bounds the number of co-resident blocks.
    #[must_use]
    pub fn with_physical_blocks(mut self, blocks: Idx) -> Self {
        self.physical_dims.blocks = blocks;
        self
    }

    /// Choose a physical grid for a required [LaunchDim].
    ///
    /// Unset coordinates get a single block or thread. Requirements above the
    /// limits are clamped; block loops and thread calculators stride over the
    /// remainder.
    pub fn plan(&self, required: LaunchDim) -> Result<LaunchPlan, LaunchError> {
        if self.max_dims.blocks <= 0 || self.max_dims.threads <= 0 {
            return Err(LaunchError::InvalidLimits(self.max_dims));
        }
        if required.is_poisoned() {
            return Err(LaunchError::Infeasible(required));
        }

        let num_logical_blocks = required.blocks.max(1);
        let mut block_ceiling = self.max_dims.blocks;
        if self.physical_dims.blocks > 0 {
            block_ceiling = block_ceiling.min(self.physical_dims.blocks);
        }
        let mut thread_ceiling = self.max_dims.threads;
        if self.physical_dims.threads > 0 {
            thread_ceiling = thread_ceiling.min(self.physical_dims.threads);
        }

        let grid = GridShape {
            blocks: num_logical_blocks.min(block_ceiling),
            threads: required.threads.max(1).min(thread_ceiling),
        };
        if grid.blocks < num_logical_blocks || grid.threads < required.threads {
            log::info!(
                "Clamped requirement {} to grid of {} blocks x {} threads",
                required,
                grid.blocks,
                grid.threads
            );
        }
        Ok(LaunchPlan {
            required,
            grid,
            num_logical_blocks,
        })
    }
}

impl GridShape {
    /// The 1x1 grid used to run a nest on the host.
    pub const fn single() -> Self {
        GridShape {
            blocks: 1,
            threads: 1,
        }
    }
}

impl Display for GridShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.blocks, self.threads)
    }
}
