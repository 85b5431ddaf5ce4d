//! Solving a row-partitioned system on the device-owning processes
use crate::exchange::{gather, scatter, ExchangeDescriptor};
use crate::extract::{extract_local, DistributedBlock};
use crate::merge::merge_row_pointers;
use crate::partition::{first_row, is_contiguous, RowPartition};
use crate::runtime::EngineRuntime;
use crate::topology::ProcessTopology;
use crate::traits::{DistributedUpload, Group, SolveEngine};
use crate::types::{Error, Mode, Result, SolveStatus};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

/// Options of a solver instance
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOptions {
    /// Execution mode of the engine
    pub mode: Mode,
    /// Engine configuration file, passed to the engine as is
    pub config_file: PathBuf,
    /// Number of devices detected on each node
    pub devices: usize,
    /// Extra `key=value` parameters added to the configuration
    pub parameters: Vec<String>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            mode: Mode::dDDI,
            config_file: PathBuf::new(),
            devices: 1,
            parameters: vec!["exception_handling=1".to_string()],
        }
    }
}

struct Handles<E: SolveEngine> {
    config: E::Config,
    matrix: E::Matrix,
    x: E::Vector,
    rhs: E::Vector,
    solver: E::Solver,
    rings: usize,
}

struct Layout {
    local_rows: usize,
    device_rows: usize,
    partition: Option<RowPartition>,
}

struct Instance<G: Group, E: SolveEngine> {
    options: SolverOptions,
    topology: ProcessTopology<G>,
    handles: Option<Handles<E>>,
    layout: Option<Layout>,
}

/// A solver redistributing a row-partitioned system onto the leaders of the
/// device groups, which hand it to the engine.
///
/// All methods taking a group or running a solve are collective over the
/// group the instance was initialized on.
pub struct DistributedSolver<G: Group, E: SolveEngine> {
    runtime: Rc<EngineRuntime<E>>,
    instance: Option<Instance<G, E>>,
}

impl<G: Group, E: SolveEngine> DistributedSolver<G, E> {
    /// Create and initialize a solver on `comm`
    pub fn new(comm: &G, options: SolverOptions, runtime: &Rc<EngineRuntime<E>>) -> Result<Self> {
        let mut solver = Self::uninitialized(runtime);
        solver.initialize(comm, options)?;
        Ok(solver)
    }

    /// Create a solver that still has to be initialized
    pub fn uninitialized(runtime: &Rc<EngineRuntime<E>>) -> Self {
        Self {
            runtime: runtime.clone(),
            instance: None,
        }
    }

    /// Set the instance up on `comm`: build the process groups and, on
    /// leaders, the engine handles.
    pub fn initialize(&mut self, comm: &G, options: SolverOptions) -> Result<()> {
        if self.instance.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        let report = comm.rank() == 0;

        let start = Instant::now();
        if options.mode != Mode::dDDI {
            return Err(Error::UnsupportedMode(options.mode.to_string()));
        }
        if report {
            info!("Mode selection took {:?}", start.elapsed());
        }

        let start = Instant::now();
        let topology = ProcessTopology::new(comm, options.mode, options.devices)?;
        if report {
            info!("Communicator setup took {:?}", start.elapsed());
        }

        let start = Instant::now();
        self.runtime.register();
        let handles = if topology.is_leader() {
            match self.create_handles(&topology, &options) {
                Ok(h) => Some(h),
                Err(e) => {
                    self.runtime.unregister();
                    return Err(e);
                }
            }
        } else {
            None
        };
        if report {
            info!("Engine setup took {:?}", start.elapsed());
        }

        self.instance = Some(Instance {
            options,
            topology,
            handles,
            layout: None,
        });
        Ok(())
    }

    fn create_handles(
        &self,
        topology: &ProcessTopology<G>,
        options: &SolverOptions,
    ) -> Result<Handles<E>> {
        let solve_group = topology
            .solve_group()
            .ok_or_else(|| Error::Topology("a leader is outside the solve group".to_string()))?;

        self.runtime.attach()?;
        let engine = self.runtime.engine();
        let config = match engine.create_config(&options.config_file, &options.parameters) {
            Ok(c) => c,
            Err(e) => {
                if let Err(rollback) = self.runtime.abandon() {
                    warn!("Releasing the engine after a failed setup failed: {}", rollback);
                }
                return Err(e);
            }
        };

        let mode = options.mode;
        let created = self
            .runtime
            .ensure_resources(&config, solve_group, topology.device())
            .and_then(|_| {
                self.runtime.with_resources(|engine, resources| {
                    Ok((
                        engine.create_vector(resources, mode)?,
                        engine.create_vector(resources, mode)?,
                        engine.create_matrix(resources, mode)?,
                        engine.create_solver(resources, mode, &config)?,
                    ))
                })
            });
        let (x, rhs, matrix, solver) = match created {
            Ok(objects) => objects,
            Err(e) => {
                if let Err(rollback) = self.runtime.detach(config) {
                    warn!("Releasing the engine after a failed setup failed: {}", rollback);
                }
                return Err(e);
            }
        };
        let rings = engine.default_rings(&config);

        Ok(Handles {
            config,
            matrix,
            x,
            rhs,
            solver,
            rings,
        })
    }

    /// Hand the matrix to the engine.
    ///
    /// Every process passes its own rows; the leaders upload the rows of
    /// their device group and set the solver up.
    pub fn set_matrix(&mut self, block: &DistributedBlock<'_>) -> Result<()> {
        let engine = self.runtime.engine();
        let instance = self.instance.as_mut().ok_or(Error::NotInitialized)?;
        let device_group = instance.topology.device_group();

        let fragment = extract_local(block);
        let local_rows = block.local_rows();
        let device_rows = device_group.all_reduce_sum(local_rows);
        let device_nnz = device_group.all_reduce_sum(fragment.nnz());
        device_group.barrier();

        let row_ptr = gather(device_group, &fragment.row_ptr)?;
        let cols = gather(device_group, &fragment.cols)?;
        let values = gather(device_group, &fragment.values)?;
        let starts = gather(device_group, &[block.rows().start])?;
        device_group.barrier();

        let uploaded = match (
            instance.handles.as_mut(),
            row_ptr.data,
            cols.data,
            values.data,
            starts.data,
        ) {
            (Some(handles), Some(row_ptr_data), Some(cols), Some(values), Some(starts)) => {
                let rows = DeviceRows {
                    row_ptr: row_ptr_data,
                    descriptor: row_ptr.descriptor,
                    cols,
                    values,
                    starts,
                    rows: device_rows,
                    nnz: device_nnz,
                };
                upload_device_rows(engine, handles, &instance.topology, block, rows).map(Some)
            }
            _ => Ok(None),
        };

        // non-leaders learn whether their leader accepted the rows
        let rejected = device_group.all_gather(usize::from(uploaded.is_err()))[0];
        let partition = uploaded?;
        if rejected > 0 {
            return Err(Error::InvalidBlock(format!(
                "the leader of device {} rejected the rows of its group",
                instance.topology.device()
            )));
        }

        instance.layout = Some(Layout {
            local_rows,
            device_rows,
            partition,
        });
        Ok(())
    }

    /// Solve `A x = b`.
    ///
    /// `x` holds the initial guess and receives the solution. A non-success
    /// status of the engine is reported on every process of the device group
    /// as [`Error::SolveFailed`], after `x` has received whatever the engine
    /// left in its solution.
    pub fn solve(&mut self, x: &mut [f64], b: &[f64]) -> Result<()> {
        let engine = self.runtime.engine();
        let instance = self.instance.as_mut().ok_or(Error::NotInitialized)?;
        let layout = instance.layout.as_ref().ok_or(Error::MatrixNotSet)?;
        let group = instance.topology.device_group();

        for actual in [x.len(), b.len()] {
            if actual != layout.local_rows {
                return Err(Error::LengthMismatch {
                    rank: group.rank(),
                    declared: layout.local_rows,
                    actual,
                });
            }
        }

        let gathered_x = gather(group, x)?;
        let gathered_b = gather(group, b)?;
        group.barrier();

        let mut status = SolveStatus::Success;
        let mut solution = gathered_x.data;
        if let (Some(handles), Some(all_x), Some(all_b)) = (
            instance.handles.as_mut(),
            solution.as_mut(),
            gathered_b.data.as_ref(),
        ) {
            if all_x.len() != layout.device_rows {
                return Err(Error::LengthMismatch {
                    rank: 0,
                    declared: layout.device_rows,
                    actual: all_x.len(),
                });
            }
            engine.upload_vector(&mut handles.x, all_x.as_slice())?;
            engine.upload_vector(&mut handles.rhs, all_b)?;
            if let Some(solve_group) = instance.topology.solve_group() {
                solve_group.barrier();
            }

            engine.solve(&mut handles.solver, &handles.rhs, &mut handles.x)?;
            status = engine.status(&handles.solver);
            if !status.is_success() {
                warn!(
                    "Solve engine failed to solve system on {}, status {}",
                    instance.topology.node_name(),
                    status
                );
            }
            engine.download_vector(&handles.x, all_x.as_mut_slice())?;
        }

        scatter(group, &gathered_x.descriptor, solution.as_deref(), x)?;

        let status = SolveStatus::from_code(group.all_gather(status.code())[0]);
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::SolveFailed { status })
        }
    }

    /// Release the engine handles and the process groups.
    ///
    /// Every handle is released even if releasing an earlier one fails; the
    /// first error is returned. The instance can be initialized again
    /// afterwards. Finalizing an instance that is not initialized only logs a
    /// warning.
    pub fn finalize(&mut self) -> Result<()> {
        let Some(instance) = self.instance.take() else {
            warn!("This solver has not been initialized. Please initialize it before finalization.");
            return Ok(());
        };
        self.runtime.unregister();

        if let Some(handles) = instance.handles {
            let engine = self.runtime.engine();
            return engine
                .destroy_solver(handles.solver)
                .and(engine.destroy_matrix(handles.matrix))
                .and(engine.destroy_vector(handles.x))
                .and(engine.destroy_vector(handles.rhs))
                .and(self.runtime.detach(handles.config));
        }
        Ok(())
    }

    /// Whether the instance is initialized
    pub fn is_initialized(&self) -> bool {
        self.instance.is_some()
    }

    /// The runtime shared with the other solvers on this process
    pub fn runtime(&self) -> &Rc<EngineRuntime<E>> {
        &self.runtime
    }

    /// The options the instance was initialized with
    pub fn options(&self) -> Option<&SolverOptions> {
        self.instance.as_ref().map(|i| &i.options)
    }

    /// The process groups of the instance
    pub fn topology(&self) -> Option<&ProcessTopology<G>> {
        self.instance.as_ref().map(|i| &i.topology)
    }

    /// Row offsets of the solve group; on leaders, once a matrix is set
    pub fn row_partition(&self) -> Option<&RowPartition> {
        self.instance
            .as_ref()
            .and_then(|i| i.layout.as_ref())
            .and_then(|l| l.partition.as_ref())
    }

    /// Number of rows of the device group; on leaders, once a matrix is set
    pub fn device_rows(&self) -> Option<usize> {
        self.instance
            .as_ref()
            .filter(|i| i.handles.is_some())
            .and_then(|i| i.layout.as_ref())
            .map(|l| l.device_rows)
    }

    /// Default number of halo rings of the engine configuration, on leaders
    pub fn rings(&self) -> Option<usize> {
        self.instance
            .as_ref()
            .and_then(|i| i.handles.as_ref())
            .map(|h| h.rings)
    }
}

/// The rows of a device group, gathered on its leader
struct DeviceRows {
    row_ptr: Vec<usize>,
    descriptor: ExchangeDescriptor,
    cols: Vec<i64>,
    values: Vec<f64>,
    starts: Vec<usize>,
    rows: usize,
    nnz: usize,
}

/// Merge the rows of a device group and upload them.
///
/// Collective over the solve group. The rows of each device group must be
/// one contiguous range of global rows, and the ranges must follow the order
/// of the leaders in the solve group; otherwise every leader fails with
/// [`Error::InvalidBlock`].
fn upload_device_rows<G: Group, E: SolveEngine>(
    engine: &E,
    handles: &mut Handles<E>,
    topology: &ProcessTopology<G>,
    block: &DistributedBlock<'_>,
    rows: DeviceRows,
) -> Result<RowPartition> {
    let merged = merge_row_pointers(&rows.row_ptr, &rows.descriptor)?;
    for (declared, actual) in [
        (rows.rows, merged.rows),
        (rows.nnz, merged.nnz),
        (rows.cols.len(), merged.nnz),
    ] {
        if declared != actual {
            return Err(Error::LengthMismatch {
                rank: 0,
                declared,
                actual,
            });
        }
    }

    let solve_group = topology
        .solve_group()
        .ok_or_else(|| Error::Topology("a leader is outside the solve group".to_string()))?;
    let member_rows = rows
        .descriptor
        .counts()
        .iter()
        .map(|c| c.saturating_sub(1))
        .collect::<Vec<_>>();
    let contiguous = is_contiguous(&rows.starts, &member_rows);

    let partition = RowPartition::gather(solve_group, merged.rows);
    let aligned = contiguous
        && first_row(&rows.starts, &member_rows)
            .map_or(true, |first| first == partition.offsets()[solve_group.rank()]);
    let misplaced = solve_group.all_reduce_sum(usize::from(!aligned));
    if misplaced > 0 {
        return Err(Error::InvalidBlock(format!(
            "{} device groups do not own a contiguous range of rows in leader order",
            misplaced
        )));
    }
    if partition.global_rows() != block.global_rows() {
        return Err(Error::LengthMismatch {
            rank: solve_group.rank(),
            declared: block.global_rows(),
            actual: partition.global_rows(),
        });
    }
    debug!(
        "Solve rank {} uploads {} rows and {} entries, partition {:?}",
        solve_group.rank(),
        merged.rows,
        merged.nnz,
        partition.offsets()
    );

    solve_group.barrier();
    engine.upload_distributed(
        &mut handles.matrix,
        DistributedUpload {
            global_rows: block.global_rows(),
            local_rows: merged.rows,
            local_nnz: merged.nnz,
            block_rows: 1,
            block_cols: 1,
            row_ptr: &merged.row_ptr,
            cols: &rows.cols,
            values: &rows.values,
            partition: partition.offsets(),
        },
    )?;
    solve_group.barrier();

    engine.setup(&mut handles.solver, &handles.matrix)?;
    engine.bind(&mut handles.x, &handles.matrix)?;
    engine.bind(&mut handles.rhs, &handles.matrix)?;
    Ok(partition)
}

impl<G: Group, E: SolveEngine> Drop for DistributedSolver<G, E> {
    fn drop(&mut self) {
        if self.instance.is_some() {
            if let Err(e) = self.finalize() {
                warn!("Finalizing a dropped solver failed: {}", e);
            }
        }
    }
}
