//! Merging of concatenated CSR row pointers
use crate::exchange::ExchangeDescriptor;
use crate::types::{Error, Result};
use itertools::Itertools;

/// Row pointers covering the rows of a whole device group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRows {
    /// Row pointers, starting at 0 and ending at `nnz`
    pub row_ptr: Vec<usize>,
    /// Number of rows
    pub rows: usize,
    /// Number of stored entries
    pub nnz: usize,
}

/// Merge row-pointer arrays that were concatenated into one buffer.
///
/// `gathered` holds one row-pointer array per rank, each starting at 0, laid
/// out as described by `descriptor`. Every array after the first is shifted
/// by the entry count of the arrays before it and loses its leading 0, so the
/// result has `gathered.len() - (k - 1)` entries for `k` arrays. Ranks owning
/// no rows contribute the array `[0]` and vanish from the result.
pub fn merge_row_pointers(gathered: &[usize], descriptor: &ExchangeDescriptor) -> Result<MergedRows> {
    if descriptor.total() != gathered.len() {
        return Err(Error::LengthMismatch {
            rank: 0,
            declared: descriptor.total(),
            actual: gathered.len(),
        });
    }

    let mut row_ptr = Vec::with_capacity(gathered.len() + 1);
    row_ptr.push(0);
    let mut offset = 0;
    for rank in 0..descriptor.ranks() {
        let fragment = &gathered[descriptor.range(rank)];
        match fragment.first().copied() {
            Some(0) => {}
            Some(v) => {
                return Err(Error::InvalidFragment(format!(
                    "row pointers of rank {} start at {}",
                    rank, v
                )))
            }
            None => {
                return Err(Error::InvalidFragment(format!(
                    "rank {} sent no row pointers",
                    rank
                )))
            }
        }
        if fragment.iter().tuple_windows().any(|(a, b)| b < a) {
            return Err(Error::InvalidFragment(format!(
                "row pointers of rank {} decrease",
                rank
            )));
        }
        row_ptr.extend(fragment[1..].iter().map(|v| v + offset));
        offset += fragment[fragment.len() - 1];
    }

    Ok(MergedRows {
        rows: row_ptr.len() - 1,
        nnz: offset,
        row_ptr,
    })
}
