//! Process groups and the collectives run on them
use crate::exchange::ExchangeDescriptor;

/// An element that can be moved through a collective
#[cfg(feature = "mpi")]
pub trait Element: Copy + Default + Send + Sync + 'static + mpi::datatype::Equivalence {}
#[cfg(feature = "mpi")]
impl<T: Copy + Default + Send + Sync + 'static + mpi::datatype::Equivalence> Element for T {}

/// An element that can be moved through a collective
#[cfg(not(feature = "mpi"))]
pub trait Element: Copy + Default + Send + Sync + 'static {}
#[cfg(not(feature = "mpi"))]
impl<T: Copy + Default + Send + Sync + 'static> Element for T {}

/// A group of processes.
///
/// Every method that communicates is collective: all ranks of the group must
/// call it, in the same order, or the group deadlocks. Variable-count
/// collectives are always rooted at rank 0.
pub trait Group: Sized {
    /// Rank of this process in the group
    fn rank(&self) -> usize;

    /// Number of processes in the group
    fn size(&self) -> usize;

    /// Block until every rank has reached the barrier
    fn barrier(&self);

    /// Create a new group with the same members
    fn duplicate(&self) -> Self;

    /// Split the group.
    ///
    /// Ranks passing the same `color` end up in the same new group, ordered
    /// by `key` and then by their rank in this group. Ranks passing `None`
    /// receive `None`.
    fn split(&self, color: Option<usize>, key: usize) -> Option<Self>;

    /// Split the group into the ranks sharing memory with this process
    fn split_shared(&self) -> Self;

    /// Attach a name to the group, for diagnostics
    fn set_name(&self, name: &str);

    /// Name of the node this process runs on
    fn processor_name(&self) -> String;

    /// Gather one value from every rank onto every rank, in rank order
    fn all_gather<T: Element>(&self, value: T) -> Vec<T>;

    /// Gather variable-length arrays onto rank 0.
    ///
    /// Rank 0 passes the receive buffer together with the descriptor placing
    /// each rank's array in it; the other ranks pass `None`.
    fn gather_varcount<T: Element>(
        &self,
        local: &[T],
        root: Option<(&mut [T], &ExchangeDescriptor)>,
    );

    /// Scatter variable-length arrays from rank 0.
    ///
    /// Rank 0 passes the flat buffer together with its descriptor; the other
    /// ranks pass `None`. Every rank receives its sub-array into `out`.
    fn scatter_varcount<T: Element>(&self, root: Option<(&[T], &ExchangeDescriptor)>, out: &mut [T]);

    /// Abort every process in the group
    fn abort(&self, code: i32) -> !;

    /// Sum one value over all ranks
    fn all_reduce_sum(&self, value: usize) -> usize {
        self.all_gather(value).iter().sum()
    }
}
