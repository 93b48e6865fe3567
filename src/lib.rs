pub mod common;
pub mod data;
pub mod index_calc;
pub mod kernel;
pub mod launch;
pub mod nest;
pub mod policy;
pub mod pprint;
pub mod segment;
pub mod statement;
pub mod trace;
pub mod utils;

pub use smallvec;
