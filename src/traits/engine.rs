//! The external solve engine
use crate::traits::Group;
use crate::types::{Mode, Result, SolveStatus};
use std::path::Path;

/// The data handed to the engine by one solve-group process for a
/// distributed matrix upload.
#[derive(Debug, Clone, Copy)]
pub struct DistributedUpload<'a> {
    /// Number of rows of the global matrix
    pub global_rows: usize,
    /// Number of rows owned by this solve-group process
    pub local_rows: usize,
    /// Number of non-zeros owned by this solve-group process
    pub local_nnz: usize,
    /// Block size in the row direction
    pub block_rows: usize,
    /// Block size in the column direction
    pub block_cols: usize,
    /// Row pointers of the owned rows, starting at 0
    pub row_ptr: &'a [usize],
    /// Global column indices
    pub cols: &'a [i64],
    /// Values
    pub values: &'a [f64],
    /// Row offsets of all solve-group processes, starting at 0
    pub partition: &'a [usize],
}

/// A distributed linear-solve engine.
///
/// Only leader processes call into the engine. `initialize` and `finalize`
/// bracket all other calls and happen once per process.
pub trait SolveEngine {
    /// Configuration handle
    type Config;
    /// Process-wide resource handle
    type Resources;
    /// Matrix handle
    type Matrix;
    /// Vector handle
    type Vector;
    /// Solver handle
    type Solver;

    /// Start the engine, its plugins and its signal handler
    fn initialize(&self) -> Result<()>;

    /// Shut the engine down
    fn finalize(&self) -> Result<()>;

    /// Load a configuration file and add extra `key=value` parameters
    fn create_config(&self, path: &Path, parameters: &[String]) -> Result<Self::Config>;

    /// Create the resources bound to the solve group and a device
    fn create_resources<G: Group>(
        &self,
        config: &Self::Config,
        group: &G,
        device: usize,
    ) -> Result<Self::Resources>;

    /// Create a matrix
    fn create_matrix(&self, resources: &Self::Resources, mode: Mode) -> Result<Self::Matrix>;

    /// Create a vector
    fn create_vector(&self, resources: &Self::Resources, mode: Mode) -> Result<Self::Vector>;

    /// Create a solver
    fn create_solver(
        &self,
        resources: &Self::Resources,
        mode: Mode,
        config: &Self::Config,
    ) -> Result<Self::Solver>;

    /// Default number of halo rings for a configuration
    fn default_rings(&self, config: &Self::Config) -> usize;

    /// Upload this process's share of a distributed matrix
    fn upload_distributed(&self, matrix: &mut Self::Matrix, upload: DistributedUpload<'_>)
        -> Result<()>;

    /// Set the solver up for a matrix
    fn setup(&self, solver: &mut Self::Solver, matrix: &Self::Matrix) -> Result<()>;

    /// Bind a vector to the row layout of a matrix
    fn bind(&self, vector: &mut Self::Vector, matrix: &Self::Matrix) -> Result<()>;

    /// Copy host data into a vector
    fn upload_vector(&self, vector: &mut Self::Vector, data: &[f64]) -> Result<()>;

    /// Copy a vector into host memory
    fn download_vector(&self, vector: &Self::Vector, data: &mut [f64]) -> Result<()>;

    /// Solve with right-hand side `rhs`, using and overwriting `x`
    fn solve(&self, solver: &mut Self::Solver, rhs: &Self::Vector, x: &mut Self::Vector)
        -> Result<()>;

    /// Status of the last solve
    fn status(&self, solver: &Self::Solver) -> SolveStatus;

    /// Destroy a solver
    fn destroy_solver(&self, solver: Self::Solver) -> Result<()>;

    /// Destroy a matrix
    fn destroy_matrix(&self, matrix: Self::Matrix) -> Result<()>;

    /// Destroy a vector
    fn destroy_vector(&self, vector: Self::Vector) -> Result<()>;

    /// Destroy resources
    fn destroy_resources(&self, resources: Self::Resources) -> Result<()>;

    /// Destroy a configuration
    fn destroy_config(&self, config: Self::Config) -> Result<()>;
}
