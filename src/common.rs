/// The integer type used for every index, length, count, and carry.
///
/// This matches the signed 32-bit `int` of the device's thread and block
/// registers. Negative values are reserved for sentinels: `-1` marks an
/// invalid starting offset or a poisoned [LaunchDim](crate::launch::LaunchDim)
/// coordinate, and a negative block carry means "not inside a block loop".
pub type Idx = i32;

/// Position of a loop argument in a kernel's segment tuple.
pub type ArgId = u8;

/// The block carry passed to the root of a statement tree.
pub const NO_BLOCK_CARRY: Idx = -1;
