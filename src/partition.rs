//! Row distribution over the solve group
use crate::traits::Group;
use itertools::Itertools;
use std::ops::Range;

/// Row offsets of the solve-group processes.
///
/// Entry `i` is the first global row of process `i`; the last entry is the
/// number of global rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowPartition {
    offsets: Vec<usize>,
}

impl RowPartition {
    /// Create a partition from the number of rows of each process
    pub fn from_counts(counts: &[usize]) -> Self {
        let mut offsets = Vec::with_capacity(counts.len() + 1);
        offsets.push(0);
        for c in counts {
            offsets.push(offsets[offsets.len() - 1] + c);
        }
        Self { offsets }
    }

    /// Build the partition from the row counts of all solve-group processes.
    ///
    /// Collective over `group`.
    pub fn gather<G: Group>(group: &G, local_rows: usize) -> Self {
        let counts = group.all_gather(local_rows);
        group.barrier();
        Self::from_counts(&counts)
    }

    /// The offsets, starting at 0
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Number of processes
    pub fn parts(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Number of global rows
    pub fn global_rows(&self) -> usize {
        self.offsets[self.offsets.len() - 1]
    }

    /// Global rows of a process
    pub fn range(&self, part: usize) -> Range<usize> {
        self.offsets[part]..self.offsets[part + 1]
    }
}

/// Whether the row ranges `starts[i]..starts[i] + rows[i]` follow each other
/// without gaps. Empty ranges may start anywhere.
pub fn is_contiguous(starts: &[usize], rows: &[usize]) -> bool {
    starts
        .iter()
        .zip(rows)
        .filter(|(_, r)| **r > 0)
        .tuple_windows()
        .all(|((s0, r0), (s1, _))| *s0 + *r0 == *s1)
}

/// First row of the first non-empty range
pub fn first_row(starts: &[usize], rows: &[usize]) -> Option<usize> {
    starts
        .iter()
        .zip(rows)
        .find(|(_, r)| **r > 0)
        .map(|(s, _)| *s)
}
