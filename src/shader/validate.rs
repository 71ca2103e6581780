//! Type checking of generated modules.
//!
//! Every program passes through [`validate`] before it reaches a device. A
//! failure means a generator produced malformed IR, so it is reported as
//! [`Error::ShaderValidation`] and never as a user error.

use std::collections::HashMap;

use super::ShaderModule;
use super::ir::{BinOp, Expr, Function, Params, Stmt, Ty, UnOp};
use crate::error::{Error, Result};

struct Checker<'a> {
    module: &'a ShaderModule,
    function: &'a Function,
    scopes: Vec<HashMap<&'a str, Ty>>,
}

/// Type-checks every function of `module`.
///
/// # Errors
/// Returns [`Error::ShaderValidation`] naming the module and the defect.
pub fn validate(module: &ShaderModule) -> Result<()> {
    let mut names: Vec<&str> = Vec::new();
    for function in module.helpers.iter().chain(core::iter::once(&module.entry)) {
        if names.contains(&function.name.as_str()) {
            return Err(defect(module, format!("function `{}` is defined twice", function.name)));
        }
        names.push(&function.name);
        if function.params != module.entry.params {
            return Err(defect(module, format!("`{}` takes different parameters than the entry", function.name)));
        }
        let mut checker = Checker {
            module,
            function,
            scopes: vec![HashMap::new()],
        };
        checker.block(&function.body)?;
        if !returns(&function.body) {
            return Err(defect(module, format!("`{}` does not return on every path", function.name)));
        }
    }
    if let Params::Indices(rank) = module.entry.params {
        if rank != module.output.rank() {
            return Err(defect(
                module,
                format!("entry rank {rank} differs from output rank {}", module.output.rank()),
            ));
        }
    }
    Ok(())
}

fn defect(module: &ShaderModule, reason: String) -> Error {
    Error::ShaderValidation {
        program: module.label.clone(),
        reason,
    }
}

fn returns(block: &[Stmt]) -> bool {
    match block.last() {
        Some(Stmt::Return(_)) => true,
        Some(Stmt::If { then, otherwise, .. }) => returns(then) && returns(otherwise),
        _ => false,
    }
}

impl<'a> Checker<'a> {
    fn fail(&self, reason: String) -> Error {
        defect(self.module, format!("in `{}`: {reason}", self.function.name))
    }

    fn lookup(&self, name: &str) -> Option<Ty> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    fn declare(&mut self, name: &'a str, ty: Ty) -> Result<()> {
        if self.lookup(name).is_some() {
            return Err(self.fail(format!("variable `{name}` is declared twice")));
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, ty);
        }
        Ok(())
    }

    fn block(&mut self, stmts: &'a [Stmt]) -> Result<()> {
        self.scopes.push(HashMap::new());
        let result = stmts.iter().try_for_each(|s| self.stmt(s));
        self.scopes.pop();
        result
    }

    fn stmt(&mut self, stmt: &'a Stmt) -> Result<()> {
        match stmt {
            Stmt::Let { name, ty, init } => {
                let found = self.expr(init)?;
                if found != *ty {
                    return Err(self.fail(format!("`{name}` is {ty:?} but initialised with {found:?}")));
                }
                self.declare(name, *ty)
            }
            Stmt::Assign { name, value } => {
                let declared = self
                    .lookup(name)
                    .ok_or_else(|| self.fail(format!("assignment to undeclared `{name}`")))?;
                let found = self.expr(value)?;
                if found != declared {
                    return Err(self.fail(format!("`{name}` is {declared:?}, assigned {found:?}")));
                }
                Ok(())
            }
            Stmt::If { cond, then, otherwise } => {
                self.expect(cond, Ty::Bool)?;
                self.block(then)?;
                self.block(otherwise)
            }
            Stmt::For { var, start, end, body } => {
                self.expect(start, Ty::I32)?;
                self.expect(end, Ty::I32)?;
                self.scopes.push(HashMap::new());
                let result = self.declare(var, Ty::I32).and_then(|()| self.block(body));
                self.scopes.pop();
                result
            }
            Stmt::Return(e) => self.expect(e, Ty::F32),
        }
    }

    fn expect(&self, e: &Expr, ty: Ty) -> Result<()> {
        let found = self.expr(e)?;
        if found != ty {
            return Err(self.fail(format!("expected {ty:?}, found {found:?} in {e:?}")));
        }
        Ok(())
    }

    fn expr(&self, e: &Expr) -> Result<Ty> {
        Ok(match e {
            Expr::Int(_) => Ty::I32,
            Expr::Float(v) if !v.is_finite() => {
                return Err(self.fail(format!("non-finite literal {v}; pass it as a uniform")));
            }
            Expr::Float(_) => Ty::F32,
            Expr::Bool(_) => Ty::Bool,
            Expr::Var(name) => self
                .lookup(name)
                .ok_or_else(|| self.fail(format!("use of undeclared `{name}`")))?,
            Expr::Index(axis) => match self.function.params {
                Params::Indices(rank) if *axis < rank => Ty::I32,
                Params::Indices(rank) => {
                    return Err(self.fail(format!("index axis {axis} out of range for rank {rank}")));
                }
                Params::Offset => return Err(self.fail("index access in a texel-level function".into())),
            },
            Expr::Offset => match self.function.params {
                Params::Offset => Ty::I32,
                Params::Indices(_) => return Err(self.fail("offset access in an index function".into())),
            },
            Expr::Uniform(name) => {
                if !self.module.uniforms.iter().any(|u| u == name) {
                    return Err(self.fail(format!("undeclared uniform `{name}`")));
                }
                Ty::F32
            }
            Expr::Unary(op, inner) => {
                let ty = self.expr(inner)?;
                match (op, ty) {
                    (UnOp::Not, Ty::Bool) => Ty::Bool,
                    (UnOp::Not, _) | (_, Ty::Bool) => {
                        return Err(self.fail(format!("{op:?} applied to {ty:?}")));
                    }
                    (op, Ty::I32) if op.is_float_only() => {
                        return Err(self.fail(format!("{op:?} applied to an integer")));
                    }
                    (_, ty) => ty,
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = self.expr(lhs)?;
                let r = self.expr(rhs)?;
                if l != r {
                    return Err(self.fail(format!("{op:?} mixes {l:?} and {r:?}")));
                }
                if op.is_logical() {
                    if l != Ty::Bool {
                        return Err(self.fail(format!("{op:?} needs booleans")));
                    }
                    Ty::Bool
                } else if l == Ty::Bool {
                    return Err(self.fail(format!("{op:?} applied to booleans")));
                } else if op.is_comparison() {
                    Ty::Bool
                } else if *op == BinOp::Pow && l != Ty::F32 {
                    return Err(self.fail("Pow applied to integers".into()));
                } else {
                    l
                }
            }
            Expr::Select { cond, then, otherwise } => {
                self.expect(cond, Ty::Bool)?;
                let t = self.expr(then)?;
                self.expect(otherwise, t)?;
                t
            }
            Expr::ToFloat(inner) => {
                self.expect(inner, Ty::I32)?;
                Ty::F32
            }
            Expr::ToInt(inner) => {
                self.expect(inner, Ty::F32)?;
                Ty::I32
            }
            Expr::Sample { input, offset } => {
                if *input >= self.module.inputs.len() {
                    return Err(self.fail(format!("sample of missing input {input}")));
                }
                self.expect(offset, Ty::I32)?;
                Ty::F32
            }
            Expr::Call(name) => {
                if !self.module.helpers.iter().any(|h| &h.name == name) {
                    return Err(self.fail(format!("call to unknown helper `{name}`")));
                }
                Ty::F32
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Packing, TextureLayout};
    use crate::shader::ir::{Function, Params, Stmt, float, index, int, var};
    use crate::shader::{InputBinding, ShaderModule};

    fn module(body: Vec<Stmt>) -> ShaderModule {
        let layout = TextureLayout::new(&[3], Packing::Unpacked, 16).unwrap();
        ShaderModule {
            label: "test".into(),
            inputs: vec![InputBinding::new(0, layout.clone())],
            output: layout,
            uniforms: vec![],
            helpers: vec![],
            entry: Function::new("process", Params::Indices(1), body),
        }
    }

    #[test]
    fn accepts_well_typed_body() {
        let m = module(vec![
            Stmt::let_int("k", index(0) - int(1)),
            Stmt::when(var("k").lt(int(0)), vec![Stmt::Return(float(0.0))]),
            Stmt::Return(crate::shader::ir::sample(0, var("k"))),
        ]);
        assert!(validate(&m).is_ok());
    }

    #[test]
    fn rejects_type_mismatch() {
        let m = module(vec![Stmt::Return(index(0))]);
        assert!(matches!(validate(&m), Err(Error::ShaderValidation { .. })));
    }

    #[test]
    fn rejects_undeclared_variable() {
        let m = module(vec![Stmt::Return(var("missing").to_float())]);
        assert!(validate(&m).is_err());
    }

    #[test]
    fn rejects_missing_return() {
        let m = module(vec![Stmt::let_float("x", float(1.0))]);
        assert!(validate(&m).is_err());
    }

    #[test]
    fn rejects_non_finite_literals() {
        for v in [f32::INFINITY, f32::NEG_INFINITY, f32::NAN] {
            let m = module(vec![Stmt::Return(float(v))]);
            assert!(matches!(validate(&m), Err(Error::ShaderValidation { .. })));
        }
    }

    #[test]
    fn rejects_out_of_range_axis() {
        let m = module(vec![Stmt::Return(index(3).to_float())]);
        assert!(validate(&m).is_err());
    }
}
