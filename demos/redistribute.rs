//? mpirun -n {{NPROCESSES}} --features "mpi"

#[cfg(feature = "mpi")]
use approx::assert_relative_eq;
#[cfg(feature = "mpi")]
use devsolve::{
    extract::DistributedBlock,
    runtime::EngineRuntime,
    traits::{DistributedUpload, Group, SolveEngine},
    DistributedSolver, Error, Mode, Result, SolveStatus, SolverOptions,
};
#[cfg(feature = "mpi")]
use mpi::{environment::Universe, topology::SimpleCommunicator};
#[cfg(feature = "mpi")]
use rlst::CsrMatrix;
#[cfg(feature = "mpi")]
use std::path::Path;

extern crate blas_src;
extern crate lapack_src;

/// A stand-in engine that solves with the diagonal of the matrix
#[cfg(feature = "mpi")]
struct JacobiEngine;

#[cfg(feature = "mpi")]
#[derive(Default)]
struct Matrix {
    rank: usize,
    diagonal: Vec<f64>,
}

#[cfg(feature = "mpi")]
impl SolveEngine for JacobiEngine {
    type Config = ();
    type Resources = usize;
    type Matrix = Matrix;
    type Vector = Vec<f64>;
    type Solver = Vec<f64>;

    fn initialize(&self) -> Result<()> {
        Ok(())
    }
    fn finalize(&self) -> Result<()> {
        Ok(())
    }
    fn create_config(&self, _path: &Path, _parameters: &[String]) -> Result<()> {
        Ok(())
    }
    fn create_resources<G: Group>(&self, _config: &(), group: &G, _device: usize) -> Result<usize> {
        Ok(group.rank())
    }
    fn create_matrix(&self, rank: &usize, _mode: Mode) -> Result<Matrix> {
        Ok(Matrix {
            rank: *rank,
            diagonal: vec![],
        })
    }
    fn create_vector(&self, _rank: &usize, _mode: Mode) -> Result<Vec<f64>> {
        Ok(vec![])
    }
    fn create_solver(&self, _rank: &usize, _mode: Mode, _config: &()) -> Result<Vec<f64>> {
        Ok(vec![])
    }
    fn default_rings(&self, _config: &()) -> usize {
        1
    }
    fn upload_distributed(&self, matrix: &mut Matrix, upload: DistributedUpload<'_>) -> Result<()> {
        let first_row = upload.partition[matrix.rank] as i64;
        matrix.diagonal = upload
            .row_ptr
            .windows(2)
            .enumerate()
            .map(|(i, w)| {
                (w[0]..w[1])
                    .find(|k| upload.cols[*k] == first_row + i as i64)
                    .map(|k| upload.values[k])
                    .unwrap_or(1.0)
            })
            .collect();
        Ok(())
    }
    fn setup(&self, solver: &mut Vec<f64>, matrix: &Matrix) -> Result<()> {
        solver.clone_from(&matrix.diagonal);
        Ok(())
    }
    fn bind(&self, vector: &mut Vec<f64>, matrix: &Matrix) -> Result<()> {
        vector.resize(matrix.diagonal.len(), 0.0);
        Ok(())
    }
    fn upload_vector(&self, vector: &mut Vec<f64>, data: &[f64]) -> Result<()> {
        if vector.len() != data.len() {
            return Err(Error::Engine("vector of the wrong length".to_string()));
        }
        vector.copy_from_slice(data);
        Ok(())
    }
    fn download_vector(&self, vector: &Vec<f64>, data: &mut [f64]) -> Result<()> {
        data.copy_from_slice(vector);
        Ok(())
    }
    fn solve(&self, solver: &mut Vec<f64>, rhs: &Vec<f64>, x: &mut Vec<f64>) -> Result<()> {
        for ((x, b), d) in x.iter_mut().zip(rhs).zip(solver.iter()) {
            *x = b / d;
        }
        Ok(())
    }
    fn status(&self, _solver: &Vec<f64>) -> SolveStatus {
        SolveStatus::Success
    }
    fn destroy_solver(&self, _solver: Vec<f64>) -> Result<()> {
        Ok(())
    }
    fn destroy_matrix(&self, _matrix: Matrix) -> Result<()> {
        Ok(())
    }
    fn destroy_vector(&self, _vector: Vec<f64>) -> Result<()> {
        Ok(())
    }
    fn destroy_resources(&self, _resources: usize) -> Result<()> {
        Ok(())
    }
    fn destroy_config(&self, _config: ()) -> Result<()> {
        Ok(())
    }
}

/// Solve a diagonal system where process `p` owns `p + 1` rows
#[cfg(feature = "mpi")]
fn test_redistribute(comm: &SimpleCommunicator) -> Result<()> {
    let rank = comm.rank();
    let size = comm.size();
    let global_rows = size * (size + 1) / 2;
    let start = rank * (rank + 1) / 2;
    let rows = start..start + rank + 1;
    let n = rows.len();

    let diag = CsrMatrix::new(
        [n, n],
        (0..n).collect(),
        (0..=n).collect(),
        rows.clone().map(|r| 1.0 + r as f64).collect(),
    );
    let offd = CsrMatrix::new([n, 0], vec![], vec![0; n + 1], vec![]);
    let block = DistributedBlock::new(&diag, &offd, &[], rows.clone(), start, global_rows)?;

    let runtime = EngineRuntime::new(JacobiEngine);
    let options = SolverOptions {
        devices: 2,
        ..Default::default()
    };
    let mut solver = DistributedSolver::new(comm, options, &runtime)?;
    solver.set_matrix(&block)?;

    let b = rows.clone().map(|r| 1.0 + r as f64).collect::<Vec<_>>();
    let mut x = vec![0.0; n];
    solver.solve(&mut x, &b)?;
    for v in &x {
        assert_relative_eq!(*v, 1.0, epsilon = 1e-12);
    }
    if let Some(partition) = solver.row_partition() {
        println!("[{rank}] solve partition {:?}", partition.offsets());
    }
    solver.finalize()
}

#[cfg(feature = "mpi")]
fn main() {
    let universe: Universe = mpi::initialize().unwrap();
    let world = universe.world();
    if world.rank() == 0 {
        println!("Testing redistribution onto device groups.");
    }
    if let Err(e) = test_redistribute(&world) {
        eprintln!("[{}] {e}", world.rank());
        if e.is_fatal() {
            world.abort(1);
        }
    }
}

#[cfg(not(feature = "mpi"))]
fn main() {}
