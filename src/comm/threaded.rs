//! An in-process group whose ranks are threads.
//!
//! Every rank runs on its own thread of a rayon pool and ranks are placed on
//! simulated nodes, so node-local splits behave as they would on a cluster.
//! Collectives are rounds over a shared slot table: each rank deposits its
//! contribution, waits for the others, reads what it needs and waits again.
use crate::exchange::ExchangeDescriptor;
use crate::traits::{Element, Group};
use rayon::ThreadPoolBuilder;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Barrier, Mutex, PoisonError};

type Slots = Vec<Option<Box<dyn Any + Send>>>;

struct Exchange {
    barrier: Barrier,
    slots: Mutex<Slots>,
}

impl Exchange {
    fn new(size: usize) -> Self {
        Self {
            barrier: Barrier::new(size),
            slots: Mutex::new((0..size).map(|_| None).collect()),
        }
    }

    /// Deposit `value` for `rank`, then run `read` once all ranks deposited
    fn round<T: Send + 'static, R>(
        &self,
        rank: usize,
        value: T,
        read: impl FnOnce(&Slots) -> R,
    ) -> R {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)[rank] = Some(Box::new(value));
        self.barrier.wait();
        let out = read(&*self.slots.lock().unwrap_or_else(PoisonError::into_inner));
        self.barrier.wait();
        out
    }
}

fn slot<T: 'static>(slots: &Slots, rank: usize) -> &T {
    slots[rank]
        .as_ref()
        .and_then(|b| b.downcast_ref::<T>())
        .expect("ranks entered different collectives")
}

/// One rank of a thread group
pub struct ThreadComm {
    rank: usize,
    nodes: Arc<[usize]>,
    exchange: Arc<Exchange>,
    name: RefCell<String>,
}

impl ThreadComm {
    /// The name set with [`Group::set_name`]
    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    /// Node of every rank of the group
    pub fn nodes(&self) -> &[usize] {
        &self.nodes
    }

    fn all_gather_any<T: Clone + Send + 'static>(&self, value: T) -> Vec<T> {
        let size = self.size();
        self.exchange.round(self.rank, value, |slots| {
            (0..size).map(|r| slot::<T>(slots, r).clone()).collect()
        })
    }

    fn regroup(&self, color: Option<usize>, key: usize) -> Option<Self> {
        let keys = self.all_gather_any((color, key));

        let created = if self.rank == 0 {
            let mut groups = HashMap::new();
            for c in keys.iter().filter_map(|(c, _)| *c) {
                if !groups.contains_key(&c) {
                    let size = keys.iter().filter(|(other, _)| *other == Some(c)).count();
                    groups.insert(c, Arc::new(Exchange::new(size)));
                }
            }
            Some(groups)
        } else {
            None
        };
        let groups = self.exchange.round(self.rank, created, |slots| {
            slot::<Option<HashMap<usize, Arc<Exchange>>>>(slots, 0).clone()
        });

        let color = color?;
        let mut members = (0..self.size())
            .filter(|r| keys[*r].0 == Some(color))
            .collect::<Vec<_>>();
        members.sort_by_key(|r| (keys[*r].1, *r));

        Some(Self {
            rank: members.iter().position(|r| *r == self.rank)?,
            nodes: members.iter().map(|r| self.nodes[*r]).collect(),
            exchange: groups?.get(&color)?.clone(),
            name: RefCell::new(String::new()),
        })
    }
}

impl Group for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.nodes.len()
    }

    fn barrier(&self) {
        self.exchange.barrier.wait();
    }

    fn duplicate(&self) -> Self {
        self.regroup(Some(0), self.rank)
            .expect("a defined color always yields a group")
    }

    fn split(&self, color: Option<usize>, key: usize) -> Option<Self> {
        self.regroup(color, key)
    }

    fn split_shared(&self) -> Self {
        self.regroup(Some(self.nodes[self.rank]), self.rank)
            .expect("a defined color always yields a group")
    }

    fn set_name(&self, name: &str) {
        *self.name.borrow_mut() = name.to_string();
    }

    fn processor_name(&self) -> String {
        format!("node{}", self.nodes[self.rank])
    }

    fn all_gather<T: Element>(&self, value: T) -> Vec<T> {
        self.all_gather_any(value)
    }

    fn gather_varcount<T: Element>(
        &self,
        local: &[T],
        root: Option<(&mut [T], &ExchangeDescriptor)>,
    ) {
        let size = self.size();
        self.exchange.round(self.rank, local.to_vec(), |slots| {
            if let Some((buffer, descriptor)) = root {
                for r in 0..size {
                    buffer[descriptor.range(r)].copy_from_slice(slot::<Vec<T>>(slots, r));
                }
            }
        });
    }

    fn scatter_varcount<T: Element>(&self, root: Option<(&[T], &ExchangeDescriptor)>, out: &mut [T]) {
        let rank = self.rank;
        let sent = root.map(|(data, descriptor)| (data.to_vec(), descriptor.clone()));
        self.exchange.round(rank, sent, |slots| {
            if let Some((data, descriptor)) = slot::<Option<(Vec<T>, ExchangeDescriptor)>>(slots, 0) {
                out.copy_from_slice(&data[descriptor.range(rank)]);
            }
        });
    }

    fn abort(&self, code: i32) -> ! {
        panic!(
            "rank {} on {} aborted with code {}",
            self.rank,
            self.processor_name(),
            code
        );
    }
}

/// Run `f` on a thread group.
///
/// `ranks_per_node[n]` ranks are placed on node `n`; global ranks are
/// numbered node by node. Returns the value of `f` for every rank, in rank
/// order.
pub fn run<R: Send, F: Fn(ThreadComm) -> R + Sync>(ranks_per_node: &[usize], f: F) -> Vec<R> {
    let nodes = ranks_per_node
        .iter()
        .enumerate()
        .flat_map(|(node, count)| std::iter::repeat(node).take(*count))
        .collect::<Arc<[usize]>>();
    if nodes.is_empty() {
        return vec![];
    }
    let exchange = Arc::new(Exchange::new(nodes.len()));
    let pool = ThreadPoolBuilder::new()
        .num_threads(nodes.len())
        .build()
        .expect("unable to start the rank threads");
    pool.broadcast(|ctx| {
        f(ThreadComm {
            rank: ctx.index(),
            nodes: nodes.clone(),
            exchange: exchange.clone(),
            name: RefCell::new(String::new()),
        })
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ranks() {
        let results = run(&[3, 2], |comm| (comm.rank(), comm.size(), comm.processor_name()));
        assert_eq!(results.len(), 5);
        for (i, (rank, size, name)) in results.iter().enumerate() {
            assert_eq!(*rank, i);
            assert_eq!(*size, 5);
            assert_eq!(name, if i < 3 { "node0" } else { "node1" });
        }
    }

    #[test]
    fn test_all_gather() {
        let results = run(&[4], |comm| comm.all_gather(10 * comm.rank()));
        for r in results {
            assert_eq!(r, vec![0, 10, 20, 30]);
        }
    }

    #[test]
    fn test_split() {
        let results = run(&[6], |comm| {
            let color = if comm.rank() == 5 {
                None
            } else {
                Some(comm.rank() % 2)
            };
            // reverse the order inside each group
            let sub = comm.split(color, 10 - comm.rank());
            sub.map(|s| (s.rank(), s.size(), s.all_gather(comm.rank())))
        });
        assert_eq!(results[0], Some((2, 3, vec![4, 2, 0])));
        assert_eq!(results[1], Some((1, 2, vec![3, 1])));
        assert_eq!(results[4], Some((0, 3, vec![4, 2, 0])));
        assert_eq!(results[5], None);
    }

    #[test]
    fn test_split_shared() {
        let results = run(&[2, 3, 1], |comm| {
            let node = comm.split_shared();
            (node.rank(), node.size(), node.nodes().to_vec())
        });
        let expected = [
            (0, 2, vec![0, 0]),
            (1, 2, vec![0, 0]),
            (0, 3, vec![1, 1, 1]),
            (1, 3, vec![1, 1, 1]),
            (2, 3, vec![1, 1, 1]),
            (0, 1, vec![2]),
        ];
        assert_eq!(results, expected);
    }

    #[test]
    fn test_duplicate_is_independent() {
        let results = run(&[3], |comm| {
            let dup = comm.duplicate();
            dup.set_name("copy");
            let a = dup.all_gather(comm.rank() as i64);
            let b = comm.all_gather(-(comm.rank() as i64));
            (dup.name(), a, b)
        });
        for (name, a, b) in results {
            assert_eq!(name, "copy");
            assert_eq!(a, vec![0, 1, 2]);
            assert_eq!(b, vec![0, -1, -2]);
        }
    }

    #[test]
    fn test_empty_run() {
        let results = run(&[], |comm| comm.rank());
        assert!(results.is_empty());
    }
}
