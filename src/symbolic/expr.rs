use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Handle of a symbolic variable.
///
/// Handles are plain integers handed out by a [`Symbols`] arena, so identity
/// checks and hashing never touch the variable name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Var(pub(crate) u32);

impl Var {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Arena owning variable names.
///
/// Names are interned: asking twice for `"Vm"` yields the same [`Var`].
#[derive(Debug, Default, Clone)]
pub struct Symbols {
    names: Vec<String>,
    lookup: HashMap<String, Var>,
}

impl Symbols {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle registered under `name`, creating it if needed.
    pub fn var(&mut self, name: impl Into<String>) -> Var {
        let name = name.into();
        if let Some(v) = self.lookup.get(&name) {
            return *v;
        }
        let v = Var(self.names.len() as u32);
        self.names.push(name.clone());
        self.lookup.insert(name, v);
        v
    }

    /// Registers several names at once.
    pub fn vars<const N: usize>(&mut self, names: [&str; N]) -> [Var; N] {
        names.map(|n| self.var(n))
    }

    pub fn lookup(&self, name: &str) -> Option<Var> {
        self.lookup.get(name).copied()
    }

    pub fn name(&self, var: Var) -> Option<&str> {
        self.names.get(var.index()).map(|s| s.as_str())
    }

    /// Name of `var`, or its handle text when it was created elsewhere.
    pub fn display_name(&self, var: Var) -> String {
        self.name(var)
            .map(str::to_owned)
            .unwrap_or_else(|| var.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Elementary functions known to the expression layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Sqrt,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    /// Unit step, `1` for positive arguments and `0` otherwise.
    Heaviside,
}

impl Func {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Tan => x.tan(),
            Func::Exp => x.exp(),
            Func::Log => x.ln(),
            Func::Sqrt => x.sqrt(),
            Func::Asin => x.asin(),
            Func::Acos => x.acos(),
            Func::Atan => x.atan(),
            Func::Sinh => x.sinh(),
            Func::Cosh => x.cosh(),
            Func::Heaviside => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Sqrt => "sqrt",
            Func::Asin => "asin",
            Func::Acos => "acos",
            Func::Atan => "atan",
            Func::Sinh => "sinh",
            Func::Cosh => "cosh",
            Func::Heaviside => "heaviside",
        }
    }
}

/// Node of an expression tree.
#[derive(Debug)]
pub enum Node {
    Const(f64),
    Var(Var),
    Neg(Expr),
    Add(Expr, Expr),
    Sub(Expr, Expr),
    Mul(Expr, Expr),
    Div(Expr, Expr),
    Pow(Expr, Expr),
    Func(Func, Expr),
    /// `before` while `t <= t_switch`, `after` once `t > t_switch`.
    Piecewise {
        t: Expr,
        t_switch: f64,
        after: Expr,
        before: Expr,
    },
}

/// Immutable scalar expression.
///
/// Cloning is a reference-count bump; sub-trees are shared, never copied,
/// and no operation mutates an existing tree.
#[derive(Clone, Debug)]
pub struct Expr(pub(crate) Rc<Node>);

impl Expr {
    pub(crate) fn from_node(node: Node) -> Self {
        Expr(Rc::new(node))
    }

    pub fn node(&self) -> &Node {
        &self.0
    }

    pub fn constant(value: f64) -> Self {
        Self::from_node(Node::Const(value))
    }

    pub fn zero() -> Self {
        Self::constant(0.0)
    }

    pub fn one() -> Self {
        Self::constant(1.0)
    }

    pub fn var(var: Var) -> Self {
        Self::from_node(Node::Var(var))
    }

    /// Literal value when the node is a constant.
    pub fn as_const(&self) -> Option<f64> {
        match self.node() {
            Node::Const(c) => Some(*c),
            _ => None,
        }
    }

    /// Structural zero test (a `Const(0)` node).
    pub fn is_zero(&self) -> bool {
        self.as_const() == Some(0.0)
    }

    pub fn is_one(&self) -> bool {
        self.as_const() == Some(1.0)
    }

    pub fn pow(&self, exponent: impl Into<Expr>) -> Expr {
        Self::from_node(Node::Pow(self.clone(), exponent.into()))
    }

    pub fn apply(&self, f: Func) -> Expr {
        Self::from_node(Node::Func(f, self.clone()))
    }

    pub fn sin(&self) -> Expr {
        self.apply(Func::Sin)
    }

    pub fn cos(&self) -> Expr {
        self.apply(Func::Cos)
    }

    pub fn tan(&self) -> Expr {
        self.apply(Func::Tan)
    }

    pub fn exp(&self) -> Expr {
        self.apply(Func::Exp)
    }

    pub fn ln(&self) -> Expr {
        self.apply(Func::Log)
    }

    pub fn sqrt(&self) -> Expr {
        self.apply(Func::Sqrt)
    }

    /// Variables referenced by this expression, in handle order.
    pub fn variables(&self) -> BTreeSet<Var> {
        let mut out = BTreeSet::new();
        self.visit(&mut |n| {
            if let Node::Var(v) = n {
                out.insert(*v);
            }
        });
        out
    }

    /// Switch instants of every `piecewise` node in the tree.
    pub fn switch_times(&self) -> Vec<f64> {
        let mut out = Vec::new();
        self.visit(&mut |n| {
            if let Node::Piecewise { t_switch, .. } = n {
                out.push(*t_switch);
            }
        });
        out
    }

    fn visit(&self, f: &mut impl FnMut(&Node)) {
        f(self.node());
        match self.node() {
            Node::Const(_) | Node::Var(_) => {}
            Node::Neg(a) | Node::Func(_, a) => a.visit(f),
            Node::Add(a, b)
            | Node::Sub(a, b)
            | Node::Mul(a, b)
            | Node::Div(a, b)
            | Node::Pow(a, b) => {
                a.visit(f);
                b.visit(f);
            }
            Node::Piecewise {
                t, after, before, ..
            } => {
                t.visit(f);
                after.visit(f);
                before.visit(f);
            }
        }
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::constant(value)
    }
}

impl From<Var> for Expr {
    fn from(var: Var) -> Self {
        Expr::var(var)
    }
}

impl From<&Expr> for Expr {
    fn from(e: &Expr) -> Self {
        e.clone()
    }
}

impl From<&Var> for Expr {
    fn from(var: &Var) -> Self {
        Expr::var(*var)
    }
}

/// Hard step in time: `before` up to and including `t_switch`, `after` later.
///
/// # Arguments
///
/// * `t` - Expression of the time variable.
/// * `t_switch` - Switch instant (s).
/// * `after` - Value taken for `t > t_switch`.
/// * `before` - Value taken for `t <= t_switch`.
pub fn piecewise(
    t: impl Into<Expr>,
    t_switch: f64,
    after: impl Into<Expr>,
    before: impl Into<Expr>,
) -> Expr {
    Expr::from_node(Node::Piecewise {
        t: t.into(),
        t_switch,
        after: after.into(),
        before: before.into(),
    })
}

pub fn sin(e: impl Into<Expr>) -> Expr {
    e.into().sin()
}

pub fn cos(e: impl Into<Expr>) -> Expr {
    e.into().cos()
}

pub fn tan(e: impl Into<Expr>) -> Expr {
    e.into().tan()
}

pub fn exp(e: impl Into<Expr>) -> Expr {
    e.into().exp()
}

pub fn log(e: impl Into<Expr>) -> Expr {
    e.into().ln()
}

pub fn sqrt(e: impl Into<Expr>) -> Expr {
    e.into().sqrt()
}

pub fn asin(e: impl Into<Expr>) -> Expr {
    e.into().apply(Func::Asin)
}

pub fn acos(e: impl Into<Expr>) -> Expr {
    e.into().apply(Func::Acos)
}

pub fn atan(e: impl Into<Expr>) -> Expr {
    e.into().apply(Func::Atan)
}

pub fn sinh(e: impl Into<Expr>) -> Expr {
    e.into().apply(Func::Sinh)
}

pub fn cosh(e: impl Into<Expr>) -> Expr {
    e.into().apply(Func::Cosh)
}

pub fn heaviside(e: impl Into<Expr>) -> Expr {
    e.into().apply(Func::Heaviside)
}

pub fn pow(base: impl Into<Expr>, exponent: impl Into<Expr>) -> Expr {
    base.into().pow(exponent)
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node() {
            Node::Const(c) => write!(f, "{c}"),
            Node::Var(v) => write!(f, "{v}"),
            Node::Neg(a) => write!(f, "-({a})"),
            Node::Add(a, b) => write!(f, "({a} + {b})"),
            Node::Sub(a, b) => write!(f, "({a} - {b})"),
            Node::Mul(a, b) => write!(f, "({a} * {b})"),
            Node::Div(a, b) => write!(f, "({a} / {b})"),
            Node::Pow(a, b) => write!(f, "({a} ** {b})"),
            Node::Func(func, a) => write!(f, "{}({a})", func.name()),
            Node::Piecewise {
                t,
                t_switch,
                after,
                before,
            } => write!(f, "piecewise({t}, {t_switch}, {after}, {before})"),
        }
    }
}
