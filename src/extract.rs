//! Conversion of a process's matrix block into one globally indexed CSR fragment
use crate::types::{Error, Result};
use itertools::Itertools;
use rlst::CsrMatrix;
use std::ops::Range;

/// One process's rows of a row-partitioned matrix.
///
/// The diagonal block holds the columns owned by the process, numbered from
/// the start of its column range. The off-diagonal block holds all other
/// columns, numbered through `col_map`.
pub struct DistributedBlock<'a> {
    diag: &'a CsrMatrix<f64>,
    offd: &'a CsrMatrix<f64>,
    col_map: &'a [usize],
    rows: Range<usize>,
    col_start: usize,
    global_rows: usize,
}

impl<'a> DistributedBlock<'a> {
    /// Create a block owning the global rows `rows`
    pub fn new(
        diag: &'a CsrMatrix<f64>,
        offd: &'a CsrMatrix<f64>,
        col_map: &'a [usize],
        rows: Range<usize>,
        col_start: usize,
        global_rows: usize,
    ) -> Result<Self> {
        if rows.end < rows.start || rows.end > global_rows {
            return Err(Error::InvalidBlock(format!(
                "row range {:?} does not fit {} global rows",
                rows, global_rows
            )));
        }
        for (name, block) in [("diagonal", diag), ("off-diagonal", offd)] {
            if block.indptr().len() != rows.len() + 1 {
                return Err(Error::InvalidBlock(format!(
                    "{} block has {} rows, expected {}",
                    name,
                    block.indptr().len().saturating_sub(1),
                    rows.len()
                )));
            }
        }
        if let Some(j) = offd.indices().iter().find(|j| **j >= col_map.len()) {
            return Err(Error::InvalidBlock(format!(
                "off-diagonal column {} is outside a column map of length {}",
                j,
                col_map.len()
            )));
        }
        Ok(Self {
            diag,
            offd,
            col_map,
            rows,
            col_start,
            global_rows,
        })
    }

    /// Number of rows owned by the process
    pub fn local_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of rows of the global matrix
    pub fn global_rows(&self) -> usize {
        self.global_rows
    }

    /// Global rows owned by the process
    pub fn rows(&self) -> Range<usize> {
        self.rows.clone()
    }

    /// First global column owned by the process
    pub fn col_start(&self) -> usize {
        self.col_start
    }
}

/// A CSR matrix piece with global column indices
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CsrFragment {
    /// Row pointers, starting at 0
    pub row_ptr: Vec<usize>,
    /// Global column indices
    pub cols: Vec<i64>,
    /// Values
    pub values: Vec<f64>,
}

impl CsrFragment {
    /// Number of rows
    pub fn rows(&self) -> usize {
        self.row_ptr.len().saturating_sub(1)
    }

    /// Number of stored entries
    pub fn nnz(&self) -> usize {
        self.cols.len()
    }

    /// Check the row pointers against the column and value arrays
    pub fn validate(&self) -> Result<()> {
        if self.row_ptr.first() != Some(&0) {
            return Err(Error::InvalidFragment(
                "row pointers must start at 0".to_string(),
            ));
        }
        if self.row_ptr.iter().tuple_windows().any(|(a, b)| b < a) {
            return Err(Error::InvalidFragment(
                "row pointers must not decrease".to_string(),
            ));
        }
        if self.row_ptr.last() != Some(&self.cols.len()) || self.cols.len() != self.values.len() {
            return Err(Error::InvalidFragment(format!(
                "row pointers end at {:?} with {} columns and {} values",
                self.row_ptr.last(),
                self.cols.len(),
                self.values.len()
            )));
        }
        Ok(())
    }
}

/// Merge the diagonal and off-diagonal blocks into one fragment.
///
/// Each row lists the off-diagonal entries left of the owned column range,
/// then the diagonal entries, then the remaining off-diagonal entries, each
/// part sorted by column.
pub fn extract_local(block: &DistributedBlock<'_>) -> CsrFragment {
    let (d_ptr, d_ind, d_val) = (block.diag.indptr(), block.diag.indices(), block.diag.data());
    let (o_ptr, o_ind, o_val) = (block.offd.indptr(), block.offd.indices(), block.offd.data());

    let nnz = d_ind.len() + o_ind.len();
    let mut row_ptr = Vec::with_capacity(block.local_rows() + 1);
    let mut cols = Vec::with_capacity(nnz);
    let mut values = Vec::with_capacity(nnz);
    row_ptr.push(0);

    let mut diag_row = vec![];
    let mut offd_row = vec![];
    for i in 0..block.local_rows() {
        diag_row.clear();
        diag_row.extend((d_ptr[i]..d_ptr[i + 1]).map(|k| (block.col_start + d_ind[k], d_val[k])));
        diag_row.sort_by_key(|e| e.0);

        offd_row.clear();
        offd_row.extend((o_ptr[i]..o_ptr[i + 1]).map(|k| (block.col_map[o_ind[k]], o_val[k])));
        offd_row.sort_by_key(|e| e.0);

        let left = offd_row.partition_point(|e| e.0 < block.col_start);
        for (c, v) in offd_row[..left]
            .iter()
            .chain(diag_row.iter())
            .chain(offd_row[left..].iter())
        {
            cols.push(*c as i64);
            values.push(*v);
        }
        row_ptr.push(cols.len());
    }

    CsrFragment {
        row_ptr,
        cols,
        values,
    }
}

#[cfg(test)]
mod test {
    extern crate blas_src;
    extern crate lapack_src;

    use super::*;
    use approx::assert_relative_eq;

    /// Rows 2..4 of a 6x6 matrix, owning columns 2..4.
    fn example() -> (CsrMatrix<f64>, CsrMatrix<f64>, Vec<usize>) {
        let diag = CsrMatrix::new([2, 2], vec![1, 0, 0, 1], vec![0, 2, 4], vec![3.0, 2.0, 4.0, 5.0]);
        // row 0: global columns 5 and 0 (unsorted); row 1: global column 4
        let offd = CsrMatrix::new([2, 3], vec![2, 0, 1], vec![0, 2, 3], vec![1.5, -1.0, 6.0]);
        (diag, offd, vec![0, 4, 5])
    }

    #[test]
    fn test_interleave() {
        let (diag, offd, col_map) = example();
        let block = DistributedBlock::new(&diag, &offd, &col_map, 2..4, 2, 6).unwrap();
        let fragment = extract_local(&block);

        assert_eq!(fragment.row_ptr, vec![0, 4, 7]);
        assert_eq!(fragment.cols, vec![0, 2, 3, 5, 2, 3, 4]);
        let expected = [-1.0, 2.0, 3.0, 1.5, 4.0, 5.0, 6.0];
        for (a, b) in fragment.values.iter().zip(expected.iter()) {
            assert_relative_eq!(*a, *b);
        }
        fragment.validate().unwrap();
        assert_eq!(fragment.rows(), 2);
        assert_eq!(fragment.nnz(), 7);
    }

    #[test]
    fn test_no_rows() {
        let diag = CsrMatrix::<f64>::new([0, 0], vec![], vec![0], vec![]);
        let offd = CsrMatrix::<f64>::new([0, 0], vec![], vec![0], vec![]);
        let block = DistributedBlock::new(&diag, &offd, &[], 3..3, 3, 6).unwrap();
        let fragment = extract_local(&block);
        assert_eq!(fragment.row_ptr, vec![0]);
        assert_eq!(fragment.nnz(), 0);
        fragment.validate().unwrap();
    }

    #[test]
    fn test_invalid_blocks() {
        let (diag, offd, col_map) = example();
        assert!(matches!(
            DistributedBlock::new(&diag, &offd, &col_map, 2..5, 2, 6),
            Err(Error::InvalidBlock(_))
        ));
        assert!(matches!(
            DistributedBlock::new(&diag, &offd, &col_map[..2], 2..4, 2, 6),
            Err(Error::InvalidBlock(_))
        ));
        assert!(matches!(
            DistributedBlock::new(&diag, &offd, &col_map, 2..4, 2, 3),
            Err(Error::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_validate() {
        let bad_start = CsrFragment {
            row_ptr: vec![1, 2],
            cols: vec![0, 1],
            values: vec![1.0, 1.0],
        };
        assert!(bad_start.validate().is_err());
        let decreasing = CsrFragment {
            row_ptr: vec![0, 2, 1],
            cols: vec![0],
            values: vec![1.0],
        };
        assert!(decreasing.validate().is_err());
        let short = CsrFragment {
            row_ptr: vec![0, 2],
            cols: vec![0],
            values: vec![1.0],
        };
        assert!(short.validate().is_err());
    }
}
