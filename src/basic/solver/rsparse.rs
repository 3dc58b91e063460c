use rsparse::{
    data::{self, Numeric, Symb},
    lsolve, lu, sqr, usolve,
};

use super::Solve;

/// LU solver backed by `rsparse`, reusing the symbolic ordering between calls.
#[derive(Default)]
pub struct RSparseSolver {
    x: Vec<f64>,
    symbolic: Option<Symb>,
}

#[allow(non_snake_case)]
impl Solve for RSparseSolver {
    fn solve(
        &mut self,
        Ap: &mut [usize],
        Ai: &mut [usize],
        Ax: &mut [f64],
        b: &mut [f64],
        n: usize,
    ) -> Result<(), &'static str> {
        if Ap.len() != n + 1 || b.len() != n {
            return Err("dimension mismatch in sparse solve");
        }
        let a = data::Sprs {
            m: n,
            n,
            i: Ai.to_vec(),
            p: Ap.iter().map(|&v| v as isize).collect(),
            x: Ax.to_vec(),
            nzmax: Ax.len(),
        };
        let s = match &mut self.symbolic {
            Some(s) if self.x.len() == n => s,
            slot => {
                self.x = vec![0.0; n];
                slot.insert(sqr(&a, 1, false))
            }
        };
        let num = lu(&a, s, 1e-6).map_err(|_| "LU factorization failed")?;
        let x = &mut self.x[..];
        ipvec(&num.pinv, b, x); // x = P*b
        lsolve(&num.l, x); // x = L\x
        usolve(&num.u, x); // x = U\x
        ipvec(&s.q, x, b); // b = Q*x
        Ok(())
    }

    fn reset(&mut self) {
        self.symbolic = None;
    }
}

fn ipvec<T: Numeric<T>>(p: &Option<Vec<isize>>, b: &[T], x: &mut [T]) {
    match p {
        Some(perm) => {
            for (k, v) in b.iter().enumerate() {
                x[perm[k] as usize] = *v;
            }
        }
        None => x.copy_from_slice(b),
    }
}
