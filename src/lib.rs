//! Devsolve
//!
//! Redistributes a row-partitioned sparse system onto the processes that own
//! an accelerator device, hands it to an external distributed solve engine
//! and brings the solution back to the owners of the rows.
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

pub mod assignment;
pub mod comm;
pub mod exchange;
pub mod extract;
pub mod merge;
pub mod partition;
pub mod runtime;
pub mod solver;
pub mod topology;
pub mod traits;
pub mod types;

pub use solver::{DistributedSolver, SolverOptions};
pub use types::{Error, Mode, Result, SolveStatus};
