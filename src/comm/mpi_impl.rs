//! Groups backed by MPI communicators
use crate::exchange::ExchangeDescriptor;
use crate::traits::{Element, Group};
use mpi::{
    collective::{CommunicatorCollectives, Root},
    datatype::{Partition, PartitionMut},
    topology::{Color, Communicator, SimpleCommunicator},
    Count,
};

fn to_counts(values: &[usize]) -> Vec<Count> {
    values.iter().map(|v| *v as Count).collect()
}

impl Group for SimpleCommunicator {
    fn rank(&self) -> usize {
        Communicator::rank(self) as usize
    }

    fn size(&self) -> usize {
        Communicator::size(self) as usize
    }

    fn barrier(&self) {
        CommunicatorCollectives::barrier(self);
    }

    fn duplicate(&self) -> Self {
        Communicator::duplicate(self)
    }

    fn split(&self, color: Option<usize>, key: usize) -> Option<Self> {
        let color = match color {
            Some(c) => Color::with_value(c as i32),
            None => Color::undefined(),
        };
        self.split_by_color_with_key(color, key as i32)
    }

    fn split_shared(&self) -> Self {
        Communicator::split_shared(self, Communicator::rank(self))
    }

    fn set_name(&self, name: &str) {
        Communicator::set_name(self, name);
    }

    fn processor_name(&self) -> String {
        mpi::environment::processor_name().unwrap_or_default()
    }

    fn all_gather<T: Element>(&self, value: T) -> Vec<T> {
        let mut values = vec![T::default(); Group::size(self)];
        self.all_gather_into(&value, &mut values[..]);
        values
    }

    fn gather_varcount<T: Element>(
        &self,
        local: &[T],
        root: Option<(&mut [T], &ExchangeDescriptor)>,
    ) {
        let root_process = self.process_at_rank(0);
        match root {
            Some((buffer, descriptor)) => {
                let mut partition = PartitionMut::new(
                    buffer,
                    to_counts(descriptor.counts()),
                    to_counts(descriptor.displacements()),
                );
                root_process.gather_varcount_into_root(local, &mut partition);
            }
            None => root_process.gather_varcount_into(local),
        }
    }

    fn scatter_varcount<T: Element>(&self, root: Option<(&[T], &ExchangeDescriptor)>, out: &mut [T]) {
        let root_process = self.process_at_rank(0);
        match root {
            Some((data, descriptor)) => {
                let partition = Partition::new(
                    data,
                    to_counts(descriptor.counts()),
                    to_counts(descriptor.displacements()),
                );
                root_process.scatter_varcount_into_root(&partition, out);
            }
            None => root_process.scatter_varcount_into(out),
        }
    }

    fn abort(&self, code: i32) -> ! {
        Communicator::abort(self, code)
    }
}
