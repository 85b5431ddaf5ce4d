//! Trait definitions

mod engine;
mod group;

pub use engine::{DistributedUpload, SolveEngine};
pub use group::{Element, Group};
