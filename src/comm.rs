//! Collective-communication backends

#[cfg(feature = "mpi")]
mod mpi_impl;
pub mod threaded;
