use nalgebra::Scalar;
use nalgebra_sparse::{CooMatrix, CscMatrix};

/// Sub-matrix `mat[rows, cols]` taken by index sets.
///
/// Output row `i` is input row `rows[i]`, output column `j` is input column
/// `cols[j]`. Index sets are expected to be free of duplicates.
pub fn select<T>(mat: &CscMatrix<T>, rows: &[usize], cols: &[usize]) -> CscMatrix<T>
where
    T: Scalar,
    for<'a> CscMatrix<T>: From<&'a CooMatrix<T>>,
{
    let mut row_map = vec![usize::MAX; mat.nrows()];
    for (new, &old) in rows.iter().enumerate() {
        row_map[old] = new;
    }
    let mut coo = CooMatrix::new(rows.len(), cols.len());
    for (new_col, &old_col) in cols.iter().enumerate() {
        let col = mat.col(old_col);
        for (&r, v) in col.row_indices().iter().zip(col.values()) {
            let new_row = row_map[r];
            if new_row != usize::MAX {
                coo.push(new_row, new_col, v.clone());
            }
        }
    }
    CscMatrix::from(&coo)
}

/// Square diagonal matrix with `diag` on the main diagonal.
pub fn diagonal<T>(diag: &[T]) -> CscMatrix<T>
where
    T: Scalar,
    for<'a> CscMatrix<T>: From<&'a CooMatrix<T>>,
{
    let n = diag.len();
    let mut coo = CooMatrix::new(n, n);
    for (i, v) in diag.iter().enumerate() {
        coo.push(i, i, v.clone());
    }
    CscMatrix::from(&coo)
}

/// Extension trait for index-set slicing.
pub trait Slice {
    type Mat;
    fn select(&self, rows: &[usize], cols: &[usize]) -> Self::Mat;
}

impl<T> Slice for CscMatrix<T>
where
    T: Scalar,
    for<'a> CscMatrix<T>: From<&'a CooMatrix<T>>,
{
    type Mat = CscMatrix<T>;

    #[inline(always)]
    fn select(&self, rows: &[usize], cols: &[usize]) -> Self::Mat {
        select(self, rows, cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    #[test]
    fn test_select_reorders() {
        let dense = DMatrix::from_fn(4, 4, |r, c| (10 * r + c) as f64 + 1.0);
        let mat = CscMatrix::from(&dense);
        let sub = DMatrix::from(&mat.select(&[3, 1], &[2, 0, 3]));
        assert_eq!(sub.shape(), (2, 3));
        assert_eq!(sub[(0, 0)], 33.0);
        assert_eq!(sub[(0, 1)], 31.0);
        assert_eq!(sub[(1, 2)], 14.0);
    }

    #[test]
    fn test_select_empty() {
        let mat = diagonal(&[1.0, 2.0]);
        let sub = mat.select(&[], &[0, 1]);
        assert_eq!((sub.nrows(), sub.ncols(), sub.nnz()), (0, 2, 0));
    }
}
