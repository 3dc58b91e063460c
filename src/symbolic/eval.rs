use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use super::expr::{Expr, Node, Var};
use crate::error::{GridError, GridResult};

/// Source of variable values for [`Expr::evaluate`].
pub trait Bindings {
    fn value(&self, var: Var) -> Option<f64>;
}

impl<S: BuildHasher> Bindings for HashMap<Var, f64, S> {
    fn value(&self, var: Var) -> Option<f64> {
        self.get(&var).copied()
    }
}

impl Bindings for BTreeMap<Var, f64> {
    fn value(&self, var: Var) -> Option<f64> {
        self.get(&var).copied()
    }
}

impl Bindings for [(Var, f64)] {
    fn value(&self, var: Var) -> Option<f64> {
        self.iter().find(|(v, _)| *v == var).map(|(_, x)| *x)
    }
}

impl Expr {
    /// Evaluates the tree numerically.
    ///
    /// Fails with [`GridError::UnboundVariable`] when a referenced variable
    /// has no entry in `bindings`.
    pub fn evaluate<B: Bindings + ?Sized>(&self, bindings: &B) -> GridResult<f64> {
        Ok(match self.node() {
            Node::Const(c) => *c,
            Node::Var(v) => bindings
                .value(*v)
                .ok_or_else(|| GridError::UnboundVariable(v.to_string()))?,
            Node::Neg(a) => -a.evaluate(bindings)?,
            Node::Add(a, b) => a.evaluate(bindings)? + b.evaluate(bindings)?,
            Node::Sub(a, b) => a.evaluate(bindings)? - b.evaluate(bindings)?,
            Node::Mul(a, b) => a.evaluate(bindings)? * b.evaluate(bindings)?,
            Node::Div(a, b) => a.evaluate(bindings)? / b.evaluate(bindings)?,
            Node::Pow(a, b) => a.evaluate(bindings)?.powf(b.evaluate(bindings)?),
            Node::Func(f, a) => f.apply(a.evaluate(bindings)?),
            Node::Piecewise {
                t,
                t_switch,
                after,
                before,
            } => {
                if t.evaluate(bindings)? <= *t_switch {
                    before.evaluate(bindings)?
                } else {
                    after.evaluate(bindings)?
                }
            }
        })
    }
}
