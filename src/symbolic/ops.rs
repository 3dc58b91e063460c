use std::ops::{Add, Div, Mul, Neg, Sub};

use super::expr::{Expr, Node, Var};

macro_rules! impl_binop {
    ($trait:ident, $method:ident, $node:ident) => {
        impl<R: Into<Expr>> $trait<R> for Expr {
            type Output = Expr;
            fn $method(self, rhs: R) -> Expr {
                Expr::from_node(Node::$node(self, rhs.into()))
            }
        }

        impl<R: Into<Expr>> $trait<R> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: R) -> Expr {
                Expr::from_node(Node::$node(self.clone(), rhs.into()))
            }
        }

        impl<R: Into<Expr>> $trait<R> for Var {
            type Output = Expr;
            fn $method(self, rhs: R) -> Expr {
                Expr::from_node(Node::$node(Expr::var(self), rhs.into()))
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::from_node(Node::$node(Expr::constant(self), rhs))
            }
        }

        impl $trait<&Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::from_node(Node::$node(Expr::constant(self), rhs.clone()))
            }
        }

        impl $trait<Var> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Var) -> Expr {
                Expr::from_node(Node::$node(Expr::constant(self), Expr::var(rhs)))
            }
        }
    };
}

impl_binop!(Add, add, Add);
impl_binop!(Sub, sub, Sub);
impl_binop!(Mul, mul, Mul);
impl_binop!(Div, div, Div);

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::from_node(Node::Neg(self))
    }
}

impl Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::from_node(Node::Neg(self.clone()))
    }
}

impl Neg for Var {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::from_node(Node::Neg(Expr::var(self)))
    }
}

impl Var {
    pub fn pow(self, exponent: impl Into<Expr>) -> Expr {
        Expr::var(self).pow(exponent)
    }

    pub fn sin(self) -> Expr {
        Expr::var(self).sin()
    }

    pub fn cos(self) -> Expr {
        Expr::var(self).cos()
    }
}
