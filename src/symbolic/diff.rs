use super::expr::{Expr, Func, Node, Var};

// Folding constructors used by the derivative rules. They keep derivative
// trees small enough that structural zeros survive into the Jacobian pattern.

pub(crate) fn add(a: Expr, b: Expr) -> Expr {
    match (a.as_const(), b.as_const()) {
        (Some(x), Some(y)) => Expr::constant(x + y),
        (Some(x), _) if x == 0.0 => b,
        (_, Some(y)) if y == 0.0 => a,
        _ => Expr::from_node(Node::Add(a, b)),
    }
}

pub(crate) fn sub(a: Expr, b: Expr) -> Expr {
    match (a.as_const(), b.as_const()) {
        (Some(x), Some(y)) => Expr::constant(x - y),
        (_, Some(y)) if y == 0.0 => a,
        (Some(x), _) if x == 0.0 => neg(b),
        _ => Expr::from_node(Node::Sub(a, b)),
    }
}

pub(crate) fn mul(a: Expr, b: Expr) -> Expr {
    match (a.as_const(), b.as_const()) {
        (Some(x), Some(y)) => Expr::constant(x * y),
        (Some(x), _) | (_, Some(x)) if x == 0.0 => Expr::zero(),
        (Some(x), _) if x == 1.0 => b,
        (_, Some(y)) if y == 1.0 => a,
        (Some(x), _) if x == -1.0 => neg(b),
        (_, Some(y)) if y == -1.0 => neg(a),
        _ => Expr::from_node(Node::Mul(a, b)),
    }
}

pub(crate) fn div(a: Expr, b: Expr) -> Expr {
    match (a.as_const(), b.as_const()) {
        (Some(x), _) if x == 0.0 => Expr::zero(),
        (Some(x), Some(y)) if y != 0.0 => Expr::constant(x / y),
        (_, Some(y)) if y == 1.0 => a,
        _ => Expr::from_node(Node::Div(a, b)),
    }
}

pub(crate) fn pow(a: Expr, b: Expr) -> Expr {
    match (a.as_const(), b.as_const()) {
        (_, Some(y)) if y == 0.0 => Expr::one(),
        (_, Some(y)) if y == 1.0 => a,
        (Some(x), Some(y)) => Expr::constant(x.powf(y)),
        _ => Expr::from_node(Node::Pow(a, b)),
    }
}

pub(crate) fn neg(a: Expr) -> Expr {
    if let Some(x) = a.as_const() {
        return Expr::constant(-x);
    }
    if let Node::Neg(inner) = a.node() {
        return inner.clone();
    }
    Expr::from_node(Node::Neg(a))
}

fn func(f: Func, a: Expr) -> Expr {
    match a.as_const() {
        Some(x) => Expr::constant(f.apply(x)),
        None => Expr::from_node(Node::Func(f, a)),
    }
}

impl Expr {
    /// Symbolic derivative with respect to `wrt`.
    ///
    /// The result is a new tree; `self` is left untouched. Independent
    /// sub-trees differentiate to a `Const(0)` node, so `is_zero()` on the
    /// result is a reliable structural sparsity test.
    pub fn differentiate(&self, wrt: Var) -> Expr {
        match self.node() {
            Node::Const(_) => Expr::zero(),
            Node::Var(v) => {
                if *v == wrt {
                    Expr::one()
                } else {
                    Expr::zero()
                }
            }
            Node::Neg(a) => neg(a.differentiate(wrt)),
            Node::Add(a, b) => add(a.differentiate(wrt), b.differentiate(wrt)),
            Node::Sub(a, b) => sub(a.differentiate(wrt), b.differentiate(wrt)),
            Node::Mul(a, b) => add(
                mul(a.differentiate(wrt), b.clone()),
                mul(a.clone(), b.differentiate(wrt)),
            ),
            Node::Div(a, b) => {
                let da = a.differentiate(wrt);
                let db = b.differentiate(wrt);
                if db.is_zero() {
                    div(da, b.clone())
                } else {
                    div(
                        sub(mul(da, b.clone()), mul(a.clone(), db)),
                        pow(b.clone(), Expr::constant(2.0)),
                    )
                }
            }
            Node::Pow(u, v) => {
                let du = u.differentiate(wrt);
                match v.as_const() {
                    Some(n) => mul(
                        mul(Expr::constant(n), pow(u.clone(), Expr::constant(n - 1.0))),
                        du,
                    ),
                    None => {
                        let dv = v.differentiate(wrt);
                        if du.is_zero() && dv.is_zero() {
                            return Expr::zero();
                        }
                        mul(
                            self.clone(),
                            add(
                                mul(dv, func(Func::Log, u.clone())),
                                div(mul(v.clone(), du), u.clone()),
                            ),
                        )
                    }
                }
            }
            Node::Func(f, a) => {
                let da = a.differentiate(wrt);
                if da.is_zero() {
                    return Expr::zero();
                }
                let outer = match f {
                    Func::Sin => func(Func::Cos, a.clone()),
                    Func::Cos => neg(func(Func::Sin, a.clone())),
                    Func::Tan => div(
                        Expr::one(),
                        pow(func(Func::Cos, a.clone()), Expr::constant(2.0)),
                    ),
                    Func::Exp => func(Func::Exp, a.clone()),
                    Func::Log => div(Expr::one(), a.clone()),
                    Func::Sqrt => div(
                        Expr::one(),
                        mul(Expr::constant(2.0), func(Func::Sqrt, a.clone())),
                    ),
                    Func::Asin => div(Expr::one(), one_minus_square_root(a)),
                    Func::Acos => neg(div(Expr::one(), one_minus_square_root(a))),
                    Func::Atan => div(
                        Expr::one(),
                        add(Expr::one(), pow(a.clone(), Expr::constant(2.0))),
                    ),
                    Func::Sinh => func(Func::Cosh, a.clone()),
                    Func::Cosh => func(Func::Sinh, a.clone()),
                    Func::Heaviside => return Expr::zero(),
                };
                mul(outer, da)
            }
            Node::Piecewise {
                t,
                t_switch,
                after,
                before,
            } => {
                let d_after = after.differentiate(wrt);
                let d_before = before.differentiate(wrt);
                if d_after.is_zero() && d_before.is_zero() {
                    Expr::zero()
                } else {
                    Expr::from_node(Node::Piecewise {
                        t: t.clone(),
                        t_switch: *t_switch,
                        after: d_after,
                        before: d_before,
                    })
                }
            }
        }
    }
}

fn one_minus_square_root(a: &Expr) -> Expr {
    func(
        Func::Sqrt,
        sub(Expr::one(), pow(a.clone(), Expr::constant(2.0))),
    )
}
