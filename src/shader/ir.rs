//! Typed intermediate representation of generated programs.
//!
//! Generators build [`Function`]s out of [`Stmt`]s and [`Expr`]s instead of
//! concatenating source text; [`super::wgsl`] prints them and [`super::eval`]
//! interprets them. Arithmetic on [`Expr`] is available through the `std::ops`
//! operators, comparisons through the named methods.

use core::ops::{Add, Div, Mul, Neg, Rem, Sub};

/// Scalar types of the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ty {
    I32,
    F32,
    Bool,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    /// Truncating remainder.
    Rem,
    Min,
    Max,
    /// Float power.
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub(crate) const fn is_comparison(self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::Eq | Self::Ne)
    }

    pub(crate) const fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Abs,
    Not,
    Exp,
    Log,
    Sqrt,
    Sin,
    Cos,
    Tanh,
    Floor,
    Ceil,
}

impl UnOp {
    /// Operators defined on floats only.
    pub(crate) const fn is_float_only(self) -> bool {
        !matches!(self, Self::Neg | Self::Abs | Self::Not)
    }
}

/// An IR expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i32),
    Float(f32),
    Bool(bool),
    /// A variable declared by [`Stmt::Let`] or [`Stmt::For`].
    Var(String),
    /// Component `axis` of the output index array `m`.
    Index(usize),
    /// Flat output offset of a texel-level program.
    Offset,
    /// A named scalar uniform.
    Uniform(String),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Select {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    ToFloat(Box<Expr>),
    ToInt(Box<Expr>),
    /// Element at flat `offset` of input `input`.
    Sample { input: usize, offset: Box<Expr> },
    /// Calls a helper function with the caller's parameter.
    Call(String),
}

/// Integer literal from an extent, stride or index.
///
/// Callers only pass values bounded by validated shapes and attributes,
/// which fit in `i32`.
#[must_use]
pub fn int(v: usize) -> Expr {
    debug_assert!(i32::try_from(v).is_ok(), "{v} does not fit in i32");
    Expr::Int(v as i32)
}

/// Signed integer literal, under the same range contract as [`int`].
#[must_use]
pub fn sint(v: isize) -> Expr {
    debug_assert!(i32::try_from(v).is_ok(), "{v} does not fit in i32");
    Expr::Int(v as i32)
}

#[must_use]
pub fn float(v: f32) -> Expr {
    Expr::Float(v)
}

#[must_use]
pub fn var(name: &str) -> Expr {
    Expr::Var(name.to_owned())
}

/// `m[axis]`.
#[must_use]
pub const fn index(axis: usize) -> Expr {
    Expr::Index(axis)
}

#[must_use]
pub fn uniform(name: &str) -> Expr {
    Expr::Uniform(name.to_owned())
}

#[must_use]
pub fn sample(input: usize, offset: Expr) -> Expr {
    Expr::Sample {
        input,
        offset: Box::new(offset),
    }
}

#[must_use]
pub fn call(function: &str) -> Expr {
    Expr::Call(function.to_owned())
}

impl Expr {
    fn binary(self, op: BinOp, rhs: Self) -> Self {
        Self::Binary(op, Box::new(self), Box::new(rhs))
    }

    fn unary(self, op: UnOp) -> Self {
        Self::Unary(op, Box::new(self))
    }

    #[must_use]
    pub fn lt(self, rhs: Self) -> Self {
        self.binary(BinOp::Lt, rhs)
    }

    #[must_use]
    pub fn le(self, rhs: Self) -> Self {
        self.binary(BinOp::Le, rhs)
    }

    #[must_use]
    pub fn gt(self, rhs: Self) -> Self {
        self.binary(BinOp::Gt, rhs)
    }

    #[must_use]
    pub fn ge(self, rhs: Self) -> Self {
        self.binary(BinOp::Ge, rhs)
    }

    #[must_use]
    pub fn equals(self, rhs: Self) -> Self {
        self.binary(BinOp::Eq, rhs)
    }

    #[must_use]
    pub fn and(self, rhs: Self) -> Self {
        self.binary(BinOp::And, rhs)
    }

    #[must_use]
    pub fn or(self, rhs: Self) -> Self {
        self.binary(BinOp::Or, rhs)
    }

    #[must_use]
    pub fn min(self, rhs: Self) -> Self {
        self.binary(BinOp::Min, rhs)
    }

    #[must_use]
    pub fn max(self, rhs: Self) -> Self {
        self.binary(BinOp::Max, rhs)
    }

    #[must_use]
    pub fn pow(self, rhs: Self) -> Self {
        self.binary(BinOp::Pow, rhs)
    }

    #[must_use]
    pub fn abs(self) -> Self {
        self.unary(UnOp::Abs)
    }

    #[must_use]
    pub fn apply(self, op: UnOp) -> Self {
        self.unary(op)
    }

    #[must_use]
    pub fn to_float(self) -> Self {
        Self::ToFloat(Box::new(self))
    }

    #[must_use]
    pub fn to_int(self) -> Self {
        Self::ToInt(Box::new(self))
    }

    /// `cond ? then : otherwise` with `self` as the condition.
    #[must_use]
    pub fn select(self, then: Self, otherwise: Self) -> Self {
        Self::Select {
            cond: Box::new(self),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }
}

macro_rules! impl_arith {
    ($($tr:ident :: $method:ident => $op:ident),* $(,)?) => {
        $(
            impl $tr for Expr {
                type Output = Expr;

                fn $method(self, rhs: Expr) -> Expr {
                    self.binary(BinOp::$op, rhs)
                }
            }
        )*
    };
}

impl_arith!(Add::add => Add, Sub::sub => Sub, Mul::mul => Mul, Div::div => Div, Rem::rem => Rem);

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        self.unary(UnOp::Neg)
    }
}

/// An IR statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Declares a mutable variable.
    Let { name: String, ty: Ty, init: Expr },
    Assign { name: String, value: Expr },
    If {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    /// `for (var name = start; name < end; name += 1)`.
    For {
        var: String,
        start: Expr,
        end: Expr,
        body: Vec<Stmt>,
    },
    Return(Expr),
}

impl Stmt {
    #[must_use]
    pub fn let_int(name: &str, init: Expr) -> Self {
        Self::Let {
            name: name.to_owned(),
            ty: Ty::I32,
            init,
        }
    }

    #[must_use]
    pub fn let_float(name: &str, init: Expr) -> Self {
        Self::Let {
            name: name.to_owned(),
            ty: Ty::F32,
            init,
        }
    }

    #[must_use]
    pub fn assign(name: &str, value: Expr) -> Self {
        Self::Assign {
            name: name.to_owned(),
            value,
        }
    }

    #[must_use]
    pub const fn when(cond: Expr, then: Vec<Stmt>) -> Self {
        Self::If {
            cond,
            then,
            otherwise: Vec::new(),
        }
    }

    #[must_use]
    pub fn for_range(var: &str, start: Expr, end: Expr, body: Vec<Stmt>) -> Self {
        Self::For {
            var: var.to_owned(),
            start,
            end,
            body,
        }
    }
}

/// What a function receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Params {
    /// The output index array `m` of the given rank.
    Indices(usize),
    /// The flat output offset.
    Offset,
}

/// A generated function returning one `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Params,
    pub body: Vec<Stmt>,
}

impl Function {
    #[must_use]
    pub fn new(name: impl Into<String>, params: Params, body: Vec<Stmt>) -> Self {
        Self {
            name: name.into(),
            params,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_build_binary_nodes() {
        let e = index(0) - int(2);
        assert_eq!(
            e,
            Expr::Binary(BinOp::Sub, Box::new(Expr::Index(0)), Box::new(Expr::Int(2)))
        );
        assert!(matches!(var("k").lt(int(0)), Expr::Binary(BinOp::Lt, _, _)));
    }
}
