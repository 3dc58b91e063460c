//! Scalar expression trees with structural differentiation.
//!
//! Expressions are built from [`Var`] handles (interned by a [`Symbols`]
//! arena), `f64` literals, the arithmetic operators, elementary functions
//! and [`piecewise`] time steps. [`Expr::differentiate`] is a total structural
//! recursion, so every node kind has a defined derivative, and [`Tape`]
//! compiles a tree into a flat program for repeated numeric evaluation.

mod diff;
mod eval;
mod expr;
mod ops;
mod tape;

pub use eval::Bindings;
pub use expr::*;
pub use tape::{Slot, Tape};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GridError;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use std::collections::HashMap;

    fn central_difference(f: &Expr, x: Var, at: &HashMap<Var, f64>) -> f64 {
        let h = 1e-6;
        let mut lo = at.clone();
        let mut hi = at.clone();
        *lo.get_mut(&x).unwrap() -= h;
        *hi.get_mut(&x).unwrap() += h;
        (f.evaluate(&hi).unwrap() - f.evaluate(&lo).unwrap()) / (2.0 * h)
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let mut s = Symbols::new();
        let [x, y] = s.vars(["x", "y"]);
        let cases: Vec<Expr> = vec![
            x + y,
            x - 3.0 * y,
            x * y,
            x / y,
            -x,
            x.pow(3.0),
            x.pow(y),
            sin(x) * cos(y),
            tan(x),
            exp(x * y),
            log(x),
            sqrt(x),
            asin(x / 2.0),
            acos(x / 2.0),
            atan(x),
            sinh(x),
            cosh(y),
            piecewise(y, 10.0, x * x, 3.0 * x),
        ];
        // x stays below the pole of tan and inside the domains of log, sqrt
        // and asin(x / 2); y stays away from zero for x / y.
        let mut rng = StdRng::seed_from_u64(42);
        let mut points = vec![(0.3, 1.7), (0.9, 0.4), (1.3, 2.2), (0.55, 1.05)];
        points.extend((0..64).map(|_| (rng.gen_range(0.2..1.3), rng.gen_range(0.3..2.5))));
        for f in &cases {
            for &(px, py) in &points {
                let at = HashMap::from([(x, px), (y, py)]);
                for v in [x, y] {
                    let exact = f.differentiate(v).evaluate(&at).unwrap();
                    let approx = central_difference(f, v, &at);
                    assert_abs_diff_eq!(exact, approx, epsilon = 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_independent_derivative_is_structural_zero() {
        let mut s = Symbols::new();
        let [x, y, z] = s.vars(["x", "y", "z"]);
        let f = sin(x) * y + heaviside(z);
        assert!(f.differentiate(z).is_zero());
        assert!(piecewise(z, 1.0, 2.0, 3.0).differentiate(z).is_zero());
        assert!(!f.differentiate(x).is_zero());
    }

    #[test]
    fn test_differentiation_is_repeatable_and_pure() {
        let mut s = Symbols::new();
        let x = s.var("x");
        let f = x * x * sin(x);
        let before = f.to_string();
        let d1 = f.differentiate(x).to_string();
        let d2 = f.differentiate(x).to_string();
        assert_eq!(d1, d2);
        assert_eq!(before, f.to_string());
    }

    #[test]
    fn test_unbound_variable() {
        let mut s = Symbols::new();
        let [x, y] = s.vars(["x", "y"]);
        let f = x + y;
        let at = HashMap::from([(x, 1.0)]);
        match f.evaluate(&at) {
            Err(GridError::UnboundVariable(name)) => assert_eq!(name, y.to_string()),
            other => panic!("expected unbound variable, got {other:?}"),
        }
    }

    #[test]
    fn test_piecewise_is_left_continuous() {
        let mut s = Symbols::new();
        let t = s.var("t");
        let step = piecewise(t, 2.5, 0.15, -0.075);
        let at = |v: f64| step.evaluate(&HashMap::from([(t, v)])).unwrap();
        assert_eq!(at(0.0), -0.075);
        assert_eq!(at(2.5), -0.075);
        assert_eq!(at(2.5 + 1e-9), 0.15);
        assert_eq!(step.switch_times(), vec![2.5]);
    }

    #[test]
    fn test_names_are_interned() {
        let mut s = Symbols::new();
        let a = s.var("Vm");
        let b = s.var("Vm");
        assert_eq!(a, b);
        assert_eq!(s.len(), 1);
        assert_eq!(s.name(a), Some("Vm"));
        assert_eq!(s.lookup("Va"), None);
    }

    #[test]
    fn test_tape_agrees_with_tree() {
        let mut s = Symbols::new();
        let [x, y, p, t] = s.vars(["x", "y", "p", "t"]);
        let f = x.pow(2.0) * cos(y) - p / (1.0 + y * y) + piecewise(t, 1.0, 2.0 * x, 0.5);
        let resolve = |v: Var| -> crate::error::GridResult<Slot> {
            Ok(if v == x {
                Slot::Var(0)
            } else if v == y {
                Slot::Var(1)
            } else if v == p {
                Slot::Param(0)
            } else {
                Slot::Time
            })
        };
        let tape = Tape::compile(&f, &resolve).unwrap();
        let mut stack = Vec::new();
        for (vx, vy, vp, vt) in [(0.2, 1.1, 3.0, 0.5), (1.7, -0.3, 0.1, 2.0)] {
            let at = HashMap::from([(x, vx), (y, vy), (p, vp), (t, vt)]);
            let tree = f.evaluate(&at).unwrap();
            let flat = tape.eval(&[vx, vy], &[vp], vt, &mut stack);
            assert_abs_diff_eq!(tree, flat, epsilon = 1e-12);
        }
    }
}
