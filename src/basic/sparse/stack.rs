use nalgebra::Scalar;
use nalgebra_sparse::{CooMatrix, CscMatrix};

/// Assembles a block matrix from a grid of CSC blocks.
///
/// Every block of a grid row must have the same number of rows and every
/// block of a grid column the same number of columns; the first row and the
/// first column of the grid fix those sizes.
pub fn csc_blocks<T>(grid: &[&[&CscMatrix<T>]]) -> CscMatrix<T>
where
    T: Scalar,
    for<'a> CscMatrix<T>: From<&'a CooMatrix<T>>,
{
    let row_heights: Vec<usize> = grid
        .iter()
        .map(|r| r.first().map_or(0, |b| b.nrows()))
        .collect();
    let col_widths: Vec<usize> = grid
        .first()
        .map(|r| r.iter().map(|b| b.ncols()).collect())
        .unwrap_or_default();
    let nrows = row_heights.iter().sum();
    let ncols = col_widths.iter().sum();
    let nnz = grid.iter().flat_map(|r| r.iter()).map(|b| b.nnz()).sum();

    let mut coo = CooMatrix::new(nrows, ncols);
    coo.reserve(nnz);
    let mut r0 = 0;
    for (blocks, height) in grid.iter().zip(&row_heights) {
        let mut c0 = 0;
        for (b, width) in blocks.iter().zip(&col_widths) {
            for (r, c, v) in b.triplet_iter() {
                coo.push(r0 + r, c0 + c, v.clone());
            }
            c0 += width;
        }
        r0 += height;
    }
    CscMatrix::from(&coo)
}

pub fn csc_hstack<T>(matrices: &[&CscMatrix<T>]) -> CscMatrix<T>
where
    T: Scalar,
    for<'a> CscMatrix<T>: From<&'a CooMatrix<T>>,
{
    csc_blocks(&[matrices])
}

pub fn csc_vstack<T>(matrices: &[&CscMatrix<T>]) -> CscMatrix<T>
where
    T: Scalar,
    for<'a> CscMatrix<T>: From<&'a CooMatrix<T>>,
{
    let rows: Vec<[&CscMatrix<T>; 1]> = matrices.iter().map(|m| [*m]).collect();
    let grid: Vec<&[&CscMatrix<T>]> = rows.iter().map(|r| r.as_slice()).collect();
    csc_blocks(&grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csc_hstack() {
        let mut mat1 = CooMatrix::new(3, 2);
        mat1.push(2, 1, 3);
        let mut mat2 = CooMatrix::new(3, 3);
        mat2.push(0, 0, 2);
        mat2.push(1, 1, 4);
        mat2.push(2, 2, 6);
        let mut mat3 = CooMatrix::new(3, 5);
        mat3.push(2, 1, 3);
        mat3.push(0, 2, 2);
        mat3.push(1, 3, 4);
        mat3.push(2, 4, 6);

        let a = csc_hstack(&[&CscMatrix::from(&mat1), &CscMatrix::from(&mat2)]);
        assert!(a == CscMatrix::from(&mat3), "matrices do not match!")
    }

    #[test]
    fn test_csc_vstack() {
        let mut mat1 = CooMatrix::new(2, 3);
        mat1.push(1, 2, 3);
        let mut mat2 = CooMatrix::new(3, 3);
        mat2.push(0, 0, 2);
        mat2.push(1, 1, 4);
        mat2.push(2, 2, 6);
        let mut mat3 = CooMatrix::new(5, 3);
        mat3.push(1, 2, 3);
        mat3.push(2, 0, 2);
        mat3.push(3, 1, 4);
        mat3.push(4, 2, 6);

        let a = csc_vstack(&[&CscMatrix::from(&mat1), &CscMatrix::from(&mat2)]);
        assert!(a == CscMatrix::from(&mat3), "matrices do not match!")
    }

    #[test]
    fn test_empty_blocks_keep_offsets() {
        let a = CscMatrix::<i32>::zeros(0, 2);
        let mut d = CooMatrix::new(2, 2);
        d.push(1, 0, 7);
        let d = CscMatrix::from(&d);
        let m = csc_blocks(&[&[&CscMatrix::zeros(0, 0), &a], &[&CscMatrix::zeros(2, 0), &d]]);
        assert_eq!((m.nrows(), m.ncols()), (2, 2));
        assert_eq!(m.triplet_iter().next(), Some((1, 0, &7)));
    }
}
