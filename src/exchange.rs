//! Variable-length gather and scatter inside a group
use crate::traits::{Element, Group};
use crate::types::{Error, Result};
use std::ops::Range;

/// Counts and displacements placing per-rank arrays in one flat buffer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExchangeDescriptor {
    counts: Vec<usize>,
    displacements: Vec<usize>,
}

impl ExchangeDescriptor {
    /// Create a descriptor from per-rank counts
    pub fn from_counts(counts: Vec<usize>) -> Self {
        let displacements = counts
            .iter()
            .scan(0, |acc, &c| {
                let d = *acc;
                *acc += c;
                Some(d)
            })
            .collect();
        Self {
            counts,
            displacements,
        }
    }

    /// Number of elements held by each rank
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Offset of each rank's array in the flat buffer
    pub fn displacements(&self) -> &[usize] {
        &self.displacements
    }

    /// Number of elements held by a rank
    pub fn count(&self, rank: usize) -> usize {
        self.counts[rank]
    }

    /// Number of ranks described
    pub fn ranks(&self) -> usize {
        self.counts.len()
    }

    /// Length of the flat buffer
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Position of a rank's array in the flat buffer
    pub fn range(&self, rank: usize) -> Range<usize> {
        self.displacements[rank]..self.displacements[rank] + self.counts[rank]
    }
}

/// The outcome of a gather: the layout, and the flat buffer on rank 0
#[derive(Debug, Clone)]
pub struct Gathered<T> {
    /// Layout of the flat buffer
    pub descriptor: ExchangeDescriptor,
    /// Flat buffer; `None` on every rank but 0
    pub data: Option<Vec<T>>,
}

/// Exchange the length of every rank's array and build the descriptor.
///
/// Every rank gets the same descriptor.
pub fn exchange_counts<G: Group>(group: &G, local_len: usize) -> Result<ExchangeDescriptor> {
    group.barrier();
    let descriptor = ExchangeDescriptor::from_counts(group.all_gather(local_len));
    check_ranks(group, &descriptor)?;
    Ok(descriptor)
}

/// Gather every rank's array onto rank 0
pub fn gather<G: Group, T: Element>(group: &G, local: &[T]) -> Result<Gathered<T>> {
    let descriptor = exchange_counts(group, local.len())?;
    let data = if group.rank() == 0 {
        let mut data = vec![T::default(); descriptor.total()];
        group.gather_varcount(local, Some((&mut data[..], &descriptor)));
        Some(data)
    } else {
        group.gather_varcount(local, None);
        None
    };
    Ok(Gathered { descriptor, data })
}

/// Scatter a flat buffer from rank 0 back to every rank.
///
/// `data` is read on rank 0 only and must be as long as the descriptor's
/// total; `out` must be as long as this rank's count.
pub fn scatter<G: Group, T: Element>(
    group: &G,
    descriptor: &ExchangeDescriptor,
    data: Option<&[T]>,
    out: &mut [T],
) -> Result<()> {
    let rank = group.rank();
    check_ranks(group, descriptor)?;
    check_len(rank, descriptor.count(rank), out.len())?;
    if rank == 0 {
        let data = data.ok_or(Error::LengthMismatch {
            rank,
            declared: descriptor.total(),
            actual: 0,
        })?;
        check_len(rank, descriptor.total(), data.len())?;
        group.scatter_varcount(Some((data, descriptor)), out);
    } else {
        group.scatter_varcount(None, out);
    }
    Ok(())
}

/// The descriptor must have one entry per rank of `group`
fn check_ranks<G: Group>(group: &G, descriptor: &ExchangeDescriptor) -> Result<()> {
    check_len(group.rank(), group.size(), descriptor.ranks())
}

fn check_len(rank: usize, declared: usize, actual: usize) -> Result<()> {
    if declared == actual {
        Ok(())
    } else {
        Err(Error::LengthMismatch {
            rank,
            declared,
            actual,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::threaded::run;

    #[test]
    fn test_descriptor() {
        let d = ExchangeDescriptor::from_counts(vec![3, 0, 2, 4]);
        assert_eq!(d.displacements(), &[0, 3, 3, 5]);
        assert_eq!(d.total(), 9);
        assert_eq!(d.ranks(), 4);
        assert_eq!(d.range(2), 3..5);
        assert_eq!(d.range(3), 5..9);
        assert!(d.range(1).is_empty());
    }

    #[test]
    fn test_descriptor_prefix_sums() {
        let counts = vec![5, 1, 0, 7, 2, 2];
        let d = ExchangeDescriptor::from_counts(counts.clone());
        for i in 0..counts.len() {
            assert_eq!(d.displacements()[i], counts[..i].iter().sum::<usize>());
        }
        assert_eq!(d.total(), counts.iter().sum::<usize>());
    }

    #[test]
    fn test_empty_descriptor() {
        let d = ExchangeDescriptor::from_counts(vec![]);
        assert_eq!(d.total(), 0);
        assert_eq!(d.ranks(), 0);
    }

    #[test]
    fn test_gather() {
        let results = run(&[4], |comm| {
            let local = vec![comm.rank() as f64; comm.rank() + 1];
            gather(&comm, &local).unwrap()
        });
        let root = results[0].data.as_ref().unwrap();
        assert_eq!(root, &[0.0, 1.0, 1.0, 2.0, 2.0, 2.0, 3.0, 3.0, 3.0, 3.0]);
        for (rank, g) in results.iter().enumerate() {
            assert_eq!(g.descriptor.counts(), &[1, 2, 3, 4]);
            assert_eq!(g.data.is_some(), rank == 0);
        }
    }

    #[test]
    fn test_round_trip() {
        let results = run(&[2, 3], |comm| {
            let rank = comm.rank();
            let local = (0..(rank * 2) % 5)
                .map(|i| (100 * rank + i) as i64)
                .collect::<Vec<_>>();
            let gathered = gather(&comm, &local).unwrap();
            let mut back = vec![0; local.len()];
            scatter(
                &comm,
                &gathered.descriptor,
                gathered.data.as_deref(),
                &mut back,
            )
            .unwrap();
            (local, back)
        });
        for (local, back) in results {
            assert_eq!(local, back);
        }
    }

    #[test]
    fn test_scatter_wrong_length() {
        let results = run(&[2], |comm| {
            let descriptor = ExchangeDescriptor::from_counts(vec![1, 1]);
            let mut out = vec![0.0; 3];
            scatter(&comm, &descriptor, Some(&[1.0, 2.0][..]), &mut out)
        });
        for (rank, r) in results.into_iter().enumerate() {
            assert_eq!(
                r,
                Err(Error::LengthMismatch {
                    rank,
                    declared: 1,
                    actual: 3
                })
            );
        }
    }

    #[test]
    fn test_scatter_foreign_descriptor() {
        let results = run(&[2], |comm| {
            let descriptor = ExchangeDescriptor::from_counts(vec![1, 1, 1]);
            let mut out = vec![0.0; 1];
            scatter(&comm, &descriptor, Some(&[1.0, 2.0, 3.0][..]), &mut out)
        });
        for (rank, r) in results.into_iter().enumerate() {
            assert_eq!(
                r,
                Err(Error::LengthMismatch {
                    rank,
                    declared: 2,
                    actual: 3
                })
            );
        }
    }
}
