use faer::{
    MatMut,
    linalg::solvers::Solve,
    sparse::{
        SparseColMatRef, SymbolicSparseColMatRef,
        linalg::solvers::{Lu, SymbolicLu},
    },
};

use super::Solve as GridSolve;

/// LU solver backed by `faer`, reusing the symbolic analysis between calls.
#[derive(Default)]
pub struct FaerSolver {
    symbolic: Option<(usize, SymbolicLu<usize>)>,
}

#[allow(non_snake_case)]
impl GridSolve for FaerSolver {
    fn solve(
        &mut self,
        Ap: &mut [usize],
        Ai: &mut [usize],
        Ax: &mut [f64],
        b: &mut [f64],
        n: usize,
    ) -> Result<(), &'static str> {
        let s = SymbolicSparseColMatRef::new_checked(n, n, Ap, None, Ai);
        let mat = SparseColMatRef::new(s, Ax);
        let symbolic = match &self.symbolic {
            Some((dim, sym)) if *dim == n => sym.clone(),
            _ => {
                let sym = SymbolicLu::try_new(s).map_err(|_| "Faer symbolic error")?;
                self.symbolic = Some((n, sym.clone()));
                sym
            }
        };
        let lu = Lu::try_new_with_symbolic(symbolic, mat).map_err(|_| "Faer numerical error")?;
        lu.solve_in_place(MatMut::from_column_major_slice_mut(b, n, 1));
        Ok(())
    }

    fn reset(&mut self) {
        self.symbolic = None;
    }
}
