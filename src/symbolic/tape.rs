use super::expr::{Expr, Func, Node, Var};
use crate::error::GridResult;

/// Where a compiled variable load reads its value from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// Index into the state/algebraic vector.
    Var(usize),
    /// Index into the parameter vector.
    Param(usize),
    /// The simulation time.
    Time,
}

#[derive(Clone, Copy, Debug)]
enum Op {
    Const(f64),
    Load(Slot),
    Neg,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Powi(i32),
    Func(Func),
    Piecewise(f64),
}

/// Postfix program compiled from an [`Expr`].
///
/// Evaluation walks a flat op list with a caller-provided stack, so a hot
/// loop evaluating many tapes does not allocate.
#[derive(Clone, Debug)]
pub struct Tape {
    ops: Vec<Op>,
}

impl Tape {
    /// Compiles `expr`, resolving every variable through `resolve`.
    pub fn compile(expr: &Expr, resolve: &impl Fn(Var) -> GridResult<Slot>) -> GridResult<Self> {
        let mut ops = Vec::new();
        emit(expr, resolve, &mut ops)?;
        Ok(Tape { ops })
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Evaluates the program.
    ///
    /// # Arguments
    ///
    /// * `x` - State and algebraic values.
    /// * `p` - Parameter values.
    /// * `t` - Time.
    /// * `stack` - Scratch buffer, cleared on entry.
    pub fn eval(&self, x: &[f64], p: &[f64], t: f64, stack: &mut Vec<f64>) -> f64 {
        stack.clear();
        for op in &self.ops {
            match *op {
                Op::Const(c) => stack.push(c),
                Op::Load(Slot::Var(i)) => stack.push(x[i]),
                Op::Load(Slot::Param(i)) => stack.push(p[i]),
                Op::Load(Slot::Time) => stack.push(t),
                Op::Neg => unary(stack, |a| -a),
                Op::Add => binary(stack, |a, b| a + b),
                Op::Sub => binary(stack, |a, b| a - b),
                Op::Mul => binary(stack, |a, b| a * b),
                Op::Div => binary(stack, |a, b| a / b),
                Op::Pow => binary(stack, f64::powf),
                Op::Powi(n) => unary(stack, |a| a.powi(n)),
                Op::Func(f) => unary(stack, |a| f.apply(a)),
                Op::Piecewise(t_switch) => {
                    let before = stack.pop().unwrap_or(f64::NAN);
                    let after = stack.pop().unwrap_or(f64::NAN);
                    if let Some(top) = stack.last_mut() {
                        *top = if *top <= t_switch { before } else { after };
                    }
                }
            }
        }
        stack.pop().unwrap_or(f64::NAN)
    }
}

#[inline(always)]
fn unary(stack: &mut [f64], f: impl Fn(f64) -> f64) {
    if let Some(a) = stack.last_mut() {
        *a = f(*a);
    }
}

#[inline(always)]
fn binary(stack: &mut Vec<f64>, f: impl Fn(f64, f64) -> f64) {
    if let Some(b) = stack.pop() {
        if let Some(a) = stack.last_mut() {
            *a = f(*a, b);
        }
    }
}

fn emit(
    expr: &Expr,
    resolve: &impl Fn(Var) -> GridResult<Slot>,
    ops: &mut Vec<Op>,
) -> GridResult<()> {
    match expr.node() {
        Node::Const(c) => ops.push(Op::Const(*c)),
        Node::Var(v) => ops.push(Op::Load(resolve(*v)?)),
        Node::Neg(a) => {
            emit(a, resolve, ops)?;
            ops.push(Op::Neg);
        }
        Node::Add(a, b) => emit_binary(a, b, Op::Add, resolve, ops)?,
        Node::Sub(a, b) => emit_binary(a, b, Op::Sub, resolve, ops)?,
        Node::Mul(a, b) => emit_binary(a, b, Op::Mul, resolve, ops)?,
        Node::Div(a, b) => emit_binary(a, b, Op::Div, resolve, ops)?,
        Node::Pow(a, b) => match b.as_const() {
            Some(n) if n.fract() == 0.0 && n.abs() <= 64.0 => {
                emit(a, resolve, ops)?;
                ops.push(Op::Powi(n as i32));
            }
            _ => emit_binary(a, b, Op::Pow, resolve, ops)?,
        },
        Node::Func(f, a) => {
            emit(a, resolve, ops)?;
            ops.push(Op::Func(*f));
        }
        Node::Piecewise {
            t,
            t_switch,
            after,
            before,
        } => {
            emit(t, resolve, ops)?;
            emit(after, resolve, ops)?;
            emit(before, resolve, ops)?;
            ops.push(Op::Piecewise(*t_switch));
        }
    }
    Ok(())
}

fn emit_binary(
    a: &Expr,
    b: &Expr,
    op: Op,
    resolve: &impl Fn(Var) -> GridResult<Slot>,
    ops: &mut Vec<Op>,
) -> GridResult<()> {
    emit(a, resolve, ops)?;
    emit(b, resolve, ops)?;
    ops.push(op);
    Ok(())
}
