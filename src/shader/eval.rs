//! Host interpreter for [`ShaderModule`]s.
//!
//! Mirrors the semantics of the WGSL the printer emits, so that programs can
//! execute without a GPU: integer arithmetic wraps, integer division by zero
//! yields the dividend, remainder by zero yields zero, float-to-int casts
//! saturate. Sampling outside an input is reported as [`Error::Internal`]
//! rather than returning the undefined value a GPU would.

use rayon::prelude::*;

use super::ShaderModule;
use super::ir::{BinOp, Expr, Function, Params, Stmt, UnOp};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Int(i32),
    Float(f32),
    Bool(bool),
}

enum Flow {
    Next,
    Return(f32),
}

#[derive(Clone, Copy)]
enum Args<'a> {
    Indices(&'a [i32]),
    Offset(i32),
}

struct Frame<'a> {
    module: &'a ShaderModule,
    inputs: &'a [&'a [f32]],
    uniforms: &'a [f32],
    args: Args<'a>,
    vars: Vec<(&'a str, Value)>,
}

/// Evaluates every output element and returns the output texel buffer
/// (`width * height` single-channel values, padding left at zero).
///
/// `inputs` holds the texel buffers of the bound inputs in binding order;
/// `uniforms` holds the uniform values in declaration order.
///
/// # Errors
/// Returns [`Error::Internal`] for missing inputs or uniforms and for
/// out-of-range samples.
pub fn evaluate(module: &ShaderModule, inputs: &[&[f32]], uniforms: &[f32]) -> Result<Vec<f32>> {
    check_bindings(module, inputs, uniforms)?;
    let size = module.output.size();
    let mut texels = vec![0.0f32; module.output.texels()];
    texels[..size]
        .par_iter_mut()
        .enumerate()
        .try_for_each(|(offset, slot)| {
            *slot = value_at(module, inputs, uniforms, offset)?;
            Ok(())
        })?;
    Ok(texels)
}

/// Evaluates a single output element.
///
/// # Errors
/// Same as [`evaluate`], plus [`Error::Internal`] for an offset outside the
/// output.
pub fn evaluate_at(module: &ShaderModule, inputs: &[&[f32]], uniforms: &[f32], offset: usize) -> Result<f32> {
    check_bindings(module, inputs, uniforms)?;
    if offset >= module.output.size() {
        return Err(Error::Internal(format!(
            "offset {offset} outside output {:?}",
            module.output.shape()
        )));
    }
    value_at(module, inputs, uniforms, offset)
}

fn check_bindings(module: &ShaderModule, inputs: &[&[f32]], uniforms: &[f32]) -> Result<()> {
    if inputs.len() != module.inputs.len() {
        return Err(Error::Internal(format!(
            "`{}` binds {} inputs, {} supplied",
            module.label,
            module.inputs.len(),
            inputs.len()
        )));
    }
    for (binding, data) in module.inputs.iter().zip(inputs) {
        let needed = binding.layout.texels() * binding.layout.packing().channels();
        if data.len() < needed {
            return Err(Error::Internal(format!(
                "input {} of `{}` holds {} values, layout needs {needed}",
                binding.name,
                module.label,
                data.len()
            )));
        }
    }
    if uniforms.len() != module.uniforms.len() {
        return Err(Error::Internal(format!(
            "`{}` declares {} uniforms, {} supplied",
            module.label,
            module.uniforms.len(),
            uniforms.len()
        )));
    }
    Ok(())
}

fn value_at(module: &ShaderModule, inputs: &[&[f32]], uniforms: &[f32], offset: usize) -> Result<f32> {
    match module.entry.params {
        Params::Offset => call(module, inputs, uniforms, &module.entry, Args::Offset(offset as i32)),
        Params::Indices(_) => {
            let mut rest = offset;
            let m: Vec<i32> = module
                .output
                .strides()
                .iter()
                .map(|&s| {
                    let i = rest / s;
                    rest %= s;
                    i as i32
                })
                .collect();
            call(module, inputs, uniforms, &module.entry, Args::Indices(&m))
        }
    }
}

fn call<'a>(
    module: &'a ShaderModule,
    inputs: &'a [&'a [f32]],
    uniforms: &'a [f32],
    function: &'a Function,
    args: Args<'a>,
) -> Result<f32> {
    let mut frame = Frame {
        module,
        inputs,
        uniforms,
        args,
        vars: Vec::new(),
    };
    match frame.block(&function.body)? {
        Flow::Return(v) => Ok(v),
        Flow::Next => Err(Error::Internal(format!(
            "`{}` in `{}` finished without returning",
            function.name, module.label
        ))),
    }
}

impl<'a> Frame<'a> {
    fn block(&mut self, stmts: &'a [Stmt]) -> Result<Flow> {
        let mark = self.vars.len();
        let mut flow = Flow::Next;
        for stmt in stmts {
            flow = self.stmt(stmt)?;
            if matches!(flow, Flow::Return(_)) {
                break;
            }
        }
        self.vars.truncate(mark);
        Ok(flow)
    }

    fn stmt(&mut self, stmt: &'a Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Let { name, init, .. } => {
                let v = self.expr(init)?;
                self.vars.push((name.as_str(), v));
                Ok(Flow::Next)
            }
            Stmt::Assign { name, value } => {
                let v = self.expr(value)?;
                let slot = self
                    .vars
                    .iter_mut()
                    .rev()
                    .find(|(n, _)| *n == name.as_str())
                    .ok_or_else(|| Error::Internal(format!("assignment to undeclared `{name}`")))?;
                slot.1 = v;
                Ok(Flow::Next)
            }
            Stmt::If { cond, then, otherwise } => {
                if self.boolean(cond)? {
                    self.block(then)
                } else {
                    self.block(otherwise)
                }
            }
            Stmt::For { var, start, end, body } => {
                let start = self.integer(start)?;
                let end = self.integer(end)?;
                let mark = self.vars.len();
                self.vars.push((var.as_str(), Value::Int(start)));
                let mut flow = Flow::Next;
                let mut i = start;
                while i < end {
                    self.vars[mark].1 = Value::Int(i);
                    flow = self.block(body)?;
                    if matches!(flow, Flow::Return(_)) {
                        break;
                    }
                    i += 1;
                }
                self.vars.truncate(mark);
                Ok(flow)
            }
            Stmt::Return(e) => Ok(Flow::Return(self.float(e)?)),
        }
    }

    fn integer(&self, e: &Expr) -> Result<i32> {
        match self.expr(e)? {
            Value::Int(v) => Ok(v),
            other => Err(Error::Internal(format!("expected an integer, found {other:?}"))),
        }
    }

    fn float(&self, e: &Expr) -> Result<f32> {
        match self.expr(e)? {
            Value::Float(v) => Ok(v),
            other => Err(Error::Internal(format!("expected a float, found {other:?}"))),
        }
    }

    fn boolean(&self, e: &Expr) -> Result<bool> {
        match self.expr(e)? {
            Value::Bool(v) => Ok(v),
            other => Err(Error::Internal(format!("expected a boolean, found {other:?}"))),
        }
    }

    fn expr(&self, e: &Expr) -> Result<Value> {
        Ok(match e {
            Expr::Int(v) => Value::Int(*v),
            Expr::Float(v) => Value::Float(*v),
            Expr::Bool(v) => Value::Bool(*v),
            Expr::Var(name) => self
                .vars
                .iter()
                .rev()
                .find(|(n, _)| *n == name.as_str())
                .map(|(_, v)| *v)
                .ok_or_else(|| Error::Internal(format!("use of undeclared `{name}`")))?,
            Expr::Index(axis) => match self.args {
                Args::Indices(m) => Value::Int(
                    *m.get(*axis)
                        .ok_or_else(|| Error::Internal(format!("index axis {axis} out of range")))?,
                ),
                Args::Offset(_) => return Err(Error::Internal("index access in a texel-level function".into())),
            },
            Expr::Offset => match self.args {
                Args::Offset(o) => Value::Int(o),
                Args::Indices(_) => return Err(Error::Internal("offset access in an index function".into())),
            },
            Expr::Uniform(name) => {
                let slot = self
                    .module
                    .uniforms
                    .iter()
                    .position(|u| u == name)
                    .ok_or_else(|| Error::Internal(format!("undeclared uniform `{name}`")))?;
                Value::Float(self.uniforms[slot])
            }
            Expr::Unary(op, inner) => unary(*op, self.expr(inner)?)?,
            Expr::Binary(op, lhs, rhs) => binary(*op, self.expr(lhs)?, self.expr(rhs)?)?,
            Expr::Select { cond, then, otherwise } => {
                if self.boolean(cond)? {
                    self.expr(then)?
                } else {
                    self.expr(otherwise)?
                }
            }
            Expr::ToFloat(inner) => Value::Float(self.integer(inner)? as f32),
            Expr::ToInt(inner) => Value::Int(self.float(inner)? as i32),
            Expr::Sample { input, offset } => Value::Float(self.sample(*input, self.integer(offset)?)?),
            Expr::Call(name) => {
                let helper = self
                    .module
                    .helpers
                    .iter()
                    .find(|h| &h.name == name)
                    .ok_or_else(|| Error::Internal(format!("call to unknown helper `{name}`")))?;
                Value::Float(call(self.module, self.inputs, self.uniforms, helper, self.args)?)
            }
        })
    }

    fn sample(&self, input: usize, offset: i32) -> Result<f32> {
        let binding = self
            .module
            .inputs
            .get(input)
            .ok_or_else(|| Error::Internal(format!("sample of missing input {input}")))?;
        let coord = usize::try_from(offset)
            .ok()
            .and_then(|o| binding.layout.coord_of(o))
            .ok_or_else(|| {
                Error::Internal(format!(
                    "`{}` samples {} at {offset}, outside {:?}",
                    self.module.label,
                    binding.name,
                    binding.layout.shape()
                ))
            })?;
        let channels = binding.layout.packing().channels();
        let at = (coord.y * binding.layout.width() + coord.x) * channels + coord.channel;
        Ok(self.inputs[input][at])
    }
}

fn unary(op: UnOp, v: Value) -> Result<Value> {
    Ok(match (op, v) {
        (UnOp::Neg, Value::Int(x)) => Value::Int(x.wrapping_neg()),
        (UnOp::Abs, Value::Int(x)) => Value::Int(x.wrapping_abs()),
        (UnOp::Not, Value::Bool(b)) => Value::Bool(!b),
        (op, Value::Float(x)) => Value::Float(match op {
            UnOp::Neg => -x,
            UnOp::Abs => x.abs(),
            UnOp::Exp => x.exp(),
            UnOp::Log => x.ln(),
            UnOp::Sqrt => x.sqrt(),
            UnOp::Sin => x.sin(),
            UnOp::Cos => x.cos(),
            UnOp::Tanh => x.tanh(),
            UnOp::Floor => x.floor(),
            UnOp::Ceil => x.ceil(),
            UnOp::Not => return Err(Error::Internal("logical not of a float".into())),
        }),
        (op, v) => return Err(Error::Internal(format!("{op:?} applied to {v:?}"))),
    })
}

fn binary(op: BinOp, l: Value, r: Value) -> Result<Value> {
    Ok(match (l, r) {
        (Value::Int(a), Value::Int(b)) => match op {
            BinOp::Add => Value::Int(a.wrapping_add(b)),
            BinOp::Sub => Value::Int(a.wrapping_sub(b)),
            BinOp::Mul => Value::Int(a.wrapping_mul(b)),
            BinOp::Div => Value::Int(if b == 0 { a } else { a.wrapping_div(b) }),
            BinOp::Rem => Value::Int(if b == 0 { 0 } else { a.wrapping_rem(b) }),
            BinOp::Min => Value::Int(a.min(b)),
            BinOp::Max => Value::Int(a.max(b)),
            BinOp::Lt => Value::Bool(a < b),
            BinOp::Le => Value::Bool(a <= b),
            BinOp::Gt => Value::Bool(a > b),
            BinOp::Ge => Value::Bool(a >= b),
            BinOp::Eq => Value::Bool(a == b),
            BinOp::Ne => Value::Bool(a != b),
            BinOp::Pow | BinOp::And | BinOp::Or => {
                return Err(Error::Internal(format!("{op:?} applied to integers")));
            }
        },
        (Value::Float(a), Value::Float(b)) => match op {
            BinOp::Add => Value::Float(a + b),
            BinOp::Sub => Value::Float(a - b),
            BinOp::Mul => Value::Float(a * b),
            BinOp::Div => Value::Float(a / b),
            BinOp::Rem => Value::Float(a % b),
            BinOp::Min => Value::Float(a.min(b)),
            BinOp::Max => Value::Float(a.max(b)),
            BinOp::Pow => Value::Float(a.powf(b)),
            BinOp::Lt => Value::Bool(a < b),
            BinOp::Le => Value::Bool(a <= b),
            BinOp::Gt => Value::Bool(a > b),
            BinOp::Ge => Value::Bool(a >= b),
            BinOp::Eq => Value::Bool(a == b),
            BinOp::Ne => Value::Bool(a != b),
            BinOp::And | BinOp::Or => return Err(Error::Internal(format!("{op:?} applied to floats"))),
        },
        (Value::Bool(a), Value::Bool(b)) => match op {
            BinOp::And => Value::Bool(a && b),
            BinOp::Or => Value::Bool(a || b),
            _ => return Err(Error::Internal(format!("{op:?} applied to booleans"))),
        },
        (l, r) => return Err(Error::Internal(format!("{op:?} mixes {l:?} and {r:?}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Packing, TextureLayout};
    use crate::shader::ir::{Stmt, float, index, int, sample, uniform, var};

    fn shifted(packing: Packing) -> ShaderModule {
        let input = TextureLayout::new(&[4], packing, 8192).unwrap();
        let output = TextureLayout::new(&[6], Packing::Unpacked, 8192).unwrap();
        ShaderModule::indexed(
            "Shift",
            vec![input],
            output,
            vec![
                Stmt::let_int("k", index(0) - int(1)),
                Stmt::when(var("k").lt(int(0)).or(var("k").ge(int(4))), vec![Stmt::Return(uniform("fill"))]),
                Stmt::Return(sample(0, var("k"))),
            ],
        )
        .with_uniform("fill")
    }

    #[test]
    fn evaluates_every_output_element() {
        let module = shifted(Packing::Unpacked);
        let out = evaluate(&module, &[&[1.0, 2.0, 3.0, 4.0]], &[9.0]).unwrap();
        assert_eq!(out, vec![9.0, 1.0, 2.0, 3.0, 4.0, 9.0]);
    }

    #[test]
    fn packed_inputs_read_the_right_channel() {
        let module = shifted(Packing::Rgba);
        assert_eq!(evaluate_at(&module, &[&[1.0, 2.0, 3.0, 4.0]], &[0.0], 3).unwrap(), 3.0);
    }

    #[test]
    fn loops_accumulate() {
        let output = TextureLayout::new(&[1], Packing::Unpacked, 16).unwrap();
        let module = ShaderModule::indexed(
            "Sum",
            vec![],
            output,
            vec![
                Stmt::let_float("acc", float(0.0)),
                Stmt::for_range(
                    "i",
                    int(0),
                    int(4),
                    vec![Stmt::assign("acc", var("acc") + var("i").to_float())],
                ),
                Stmt::Return(var("acc")),
            ],
        );
        assert_eq!(evaluate(&module, &[], &[]).unwrap(), vec![6.0]);
    }

    #[test]
    fn out_of_range_sample_is_internal() {
        let input = TextureLayout::new(&[2], Packing::Unpacked, 16).unwrap();
        let output = TextureLayout::new(&[3], Packing::Unpacked, 16).unwrap();
        let module = ShaderModule::indexed("Bad", vec![input], output, vec![Stmt::Return(sample(0, index(0)))]);
        let err = evaluate(&module, &[&[1.0, 2.0]], &[]).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Internal);
    }

    #[test]
    fn integer_division_by_zero_matches_gpu() {
        assert_eq!(binary(BinOp::Div, Value::Int(7), Value::Int(0)).unwrap(), Value::Int(7));
        assert_eq!(binary(BinOp::Rem, Value::Int(7), Value::Int(0)).unwrap(), Value::Int(0));
        assert_eq!(binary(BinOp::Rem, Value::Int(-7), Value::Int(3)).unwrap(), Value::Int(-1));
    }
}
