//! WGSL printer for [`ShaderModule`]s.
//!
//! Layout constants (extents, strides, texture widths) are baked into the
//! source, so identical shapes and parameters always render identical text.
//! Bindings, in order: one `texture_2d<f32>` per input, the
//! `texture_storage_2d<r32float, write>` output, then the uniform block if
//! the module declares uniforms.

use core::fmt::Write;

use super::ShaderModule;
use super::ir::{BinOp, Expr, Function, Params, Stmt, Ty, UnOp};
use crate::layout::TextureLayout;

/// Workgroup extent of the generated driver, in texels per axis.
pub const WORKGROUP_SIZE: u32 = 8;

const INDENT: &str = "    ";

/// Renders `module` to WGSL.
#[must_use]
pub fn render(module: &ShaderModule) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// {} (generated)", module.label);
    for (binding, input) in module.inputs.iter().enumerate() {
        let _ = writeln!(out, "@group(0) @binding({binding}) var {}: texture_2d<f32>;", input.name);
    }
    let output_binding = module.inputs.len();
    let _ = writeln!(
        out,
        "@group(0) @binding({output_binding}) var Output: texture_storage_2d<r32float, write>;"
    );
    if !module.uniforms.is_empty() {
        let _ = writeln!(
            out,
            "struct Uniforms {{\n{INDENT}values: array<vec4<f32>, {}>,\n}};",
            module.uniforms.len().div_ceil(4)
        );
        let _ = writeln!(
            out,
            "@group(0) @binding({}) var<uniform> u: Uniforms;",
            output_binding + 1
        );
    }
    for input in &module.inputs {
        out.push('\n');
        sampler(&mut out, &input.name, &input.layout);
    }
    let printer = Printer { module };
    for function in module.helpers.iter().chain(core::iter::once(&module.entry)) {
        out.push('\n');
        printer.function(&mut out, function);
    }
    out.push('\n');
    driver(&mut out, module);
    out
}

fn sampler(out: &mut String, name: &str, layout: &TextureLayout) {
    let channels = layout.packing().channels();
    let width = layout.width();
    let _ = writeln!(out, "fn sample_{name}(offset: i32) -> f32 {{");
    if channels == 1 {
        let _ = writeln!(
            out,
            "{INDENT}return textureLoad({name}, vec2<i32>(offset % {width}, offset / {width}), 0).x;"
        );
    } else {
        let _ = writeln!(out, "{INDENT}let texel = offset / {channels};");
        let _ = writeln!(
            out,
            "{INDENT}let rgba = textureLoad({name}, vec2<i32>(texel % {width}, texel / {width}), 0);"
        );
        let _ = writeln!(out, "{INDENT}return rgba[offset % {channels}];");
    }
    out.push_str("}\n");
}

fn driver(out: &mut String, module: &ShaderModule) {
    let layout = &module.output;
    let (width, height) = (layout.width(), layout.height());
    let _ = writeln!(out, "@compute @workgroup_size({WORKGROUP_SIZE}, {WORKGROUP_SIZE}, 1)");
    out.push_str("fn main(@builtin(global_invocation_id) gid: vec3<u32>) {\n");
    let _ = writeln!(out, "{INDENT}let x = i32(gid.x);");
    let _ = writeln!(out, "{INDENT}let y = i32(gid.y);");
    let _ = writeln!(out, "{INDENT}if (x >= {width} || y >= {height}) {{ return; }}");
    let _ = writeln!(out, "{INDENT}let offset = y * {width} + x;");
    let _ = writeln!(out, "{INDENT}if (offset >= {}) {{ return; }}", layout.size());
    let value = match module.entry.params {
        Params::Offset => format!("{}(offset)", module.entry.name),
        Params::Indices(rank) => {
            let _ = writeln!(out, "{INDENT}var m: array<i32, {}>;", rank.max(1));
            let _ = writeln!(out, "{INDENT}var rest = offset;");
            for (axis, stride) in layout.strides().iter().enumerate() {
                let _ = writeln!(out, "{INDENT}m[{axis}] = rest / {stride};");
                let _ = writeln!(out, "{INDENT}rest = rest - m[{axis}] * {stride};");
            }
            format!("{}(m)", module.entry.name)
        }
    };
    let _ = writeln!(
        out,
        "{INDENT}textureStore(Output, vec2<i32>(x, y), vec4<f32>({value}, 0.0, 0.0, 0.0));"
    );
    out.push_str("}\n");
}

struct Printer<'a> {
    module: &'a ShaderModule,
}

impl Printer<'_> {
    fn function(&self, out: &mut String, function: &Function) {
        let params = match function.params {
            Params::Indices(rank) => format!("m: array<i32, {}>", rank.max(1)),
            Params::Offset => "offset: i32".to_owned(),
        };
        let _ = writeln!(out, "fn {}({params}) -> f32 {{", function.name);
        self.block(out, &function.body, 1);
        out.push_str("}\n");
    }

    fn block(&self, out: &mut String, stmts: &[Stmt], depth: usize) {
        for stmt in stmts {
            self.stmt(out, stmt, depth);
        }
    }

    fn stmt(&self, out: &mut String, stmt: &Stmt, depth: usize) {
        let pad = INDENT.repeat(depth);
        match stmt {
            Stmt::Let { name, ty, init } => {
                let _ = writeln!(out, "{pad}var {name}: {} = {};", ty_name(*ty), self.expr(init));
            }
            Stmt::Assign { name, value } => {
                let _ = writeln!(out, "{pad}{name} = {};", self.expr(value));
            }
            Stmt::If { cond, then, otherwise } => {
                let _ = writeln!(out, "{pad}if ({}) {{", self.expr(cond));
                self.block(out, then, depth + 1);
                if otherwise.is_empty() {
                    let _ = writeln!(out, "{pad}}}");
                } else {
                    let _ = writeln!(out, "{pad}}} else {{");
                    self.block(out, otherwise, depth + 1);
                    let _ = writeln!(out, "{pad}}}");
                }
            }
            Stmt::For { var, start, end, body } => {
                let _ = writeln!(
                    out,
                    "{pad}for (var {var}: i32 = {}; {var} < {}; {var} = {var} + 1) {{",
                    self.expr(start),
                    self.expr(end)
                );
                self.block(out, body, depth + 1);
                let _ = writeln!(out, "{pad}}}");
            }
            Stmt::Return(e) => {
                let _ = writeln!(out, "{pad}return {};", self.expr(e));
            }
        }
    }

    fn expr(&self, e: &Expr) -> String {
        match e {
            Expr::Int(v) => int_literal(*v),
            Expr::Float(v) => float_literal(*v),
            Expr::Bool(v) => v.to_string(),
            Expr::Var(name) => name.clone(),
            Expr::Index(axis) => format!("m[{axis}]"),
            Expr::Offset => "offset".to_owned(),
            Expr::Uniform(name) => {
                let slot = self
                    .module
                    .uniforms
                    .iter()
                    .position(|u| u == name)
                    .unwrap_or_default();
                format!("u.values[{}][{}]", slot / 4, slot % 4)
            }
            Expr::Unary(op, inner) => {
                let inner = self.expr(inner);
                match op {
                    UnOp::Neg => format!("(-{inner})"),
                    UnOp::Not => format!("(!{inner})"),
                    UnOp::Abs => format!("abs({inner})"),
                    UnOp::Exp => format!("exp({inner})"),
                    UnOp::Log => format!("log({inner})"),
                    UnOp::Sqrt => format!("sqrt({inner})"),
                    UnOp::Sin => format!("sin({inner})"),
                    UnOp::Cos => format!("cos({inner})"),
                    UnOp::Tanh => format!("tanh({inner})"),
                    UnOp::Floor => format!("floor({inner})"),
                    UnOp::Ceil => format!("ceil({inner})"),
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let (l, r) = (self.expr(lhs), self.expr(rhs));
                match op {
                    BinOp::Min => format!("min({l}, {r})"),
                    BinOp::Max => format!("max({l}, {r})"),
                    BinOp::Pow => format!("pow({l}, {r})"),
                    op => format!("({l} {} {r})", infix(*op)),
                }
            }
            Expr::Select { cond, then, otherwise } => format!(
                "select({}, {}, {})",
                self.expr(otherwise),
                self.expr(then),
                self.expr(cond)
            ),
            Expr::ToFloat(inner) => format!("f32({})", self.expr(inner)),
            Expr::ToInt(inner) => format!("i32({})", self.expr(inner)),
            Expr::Sample { input, offset } => {
                let name = self
                    .module
                    .inputs
                    .get(*input)
                    .map_or("A", |i| i.name.as_str());
                format!("sample_{name}({})", self.expr(offset))
            }
            Expr::Call(name) => match self.module.entry.params {
                Params::Indices(_) => format!("{name}(m)"),
                Params::Offset => format!("{name}(offset)"),
            },
        }
    }
}

const fn infix(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Rem => "%",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::And => "&&",
        BinOp::Or => "||",
        BinOp::Min | BinOp::Max | BinOp::Pow => "",
    }
}

const fn ty_name(ty: Ty) -> &'static str {
    match ty {
        Ty::I32 => "i32",
        Ty::F32 => "f32",
        Ty::Bool => "bool",
    }
}

fn int_literal(v: i32) -> String {
    if v == i32::MIN {
        // the literal 2147483648 is out of range before negation
        return "i32(-2147483647 - 1)".to_owned();
    }
    if v < 0 { format!("({v})") } else { v.to_string() }
}

/// Finite values only; validation rejects non-finite literals since WGSL
/// constant evaluation cannot produce them.
fn float_literal(v: f32) -> String {
    let text = format!("{v:?}");
    let text = if text.contains(['.', 'e']) { text } else { format!("{text}.0") };
    if v.is_sign_negative() { format!("({text}f)") } else { format!("{text}f") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Packing, TextureLayout};
    use crate::shader::ir::{Stmt, float, index, int, sample, var};

    fn module(packing: Packing) -> ShaderModule {
        let input = TextureLayout::new(&[3], packing, 8192).unwrap();
        let output = TextureLayout::new(&[5], Packing::Unpacked, 8192).unwrap();
        ShaderModule::indexed(
            "Copy",
            vec![input],
            output,
            vec![
                Stmt::let_int("k", index(0) - int(1)),
                Stmt::when(var("k").lt(int(0)), vec![Stmt::Return(float(-1.5))]),
                Stmt::Return(sample(0, var("k"))),
            ],
        )
    }

    #[test]
    fn renders_bindings_and_driver() {
        let src = render(&module(Packing::Unpacked));
        assert!(src.contains("@group(0) @binding(0) var A: texture_2d<f32>;"));
        assert!(src.contains("var Output: texture_storage_2d<r32float, write>;"));
        assert!(src.contains("fn process(m: array<i32, 1>) -> f32 {"));
        assert!(src.contains("var k: i32 = (m[0] - 1);"));
        assert!(src.contains("return (-1.5f);"));
        assert!(src.contains("m[0] = rest / 1;"));
        assert!(src.contains("textureStore(Output, vec2<i32>(x, y), vec4<f32>(process(m), 0.0, 0.0, 0.0));"));
    }

    #[test]
    fn packed_inputs_select_channel() {
        let src = render(&module(Packing::Rgba));
        assert!(src.contains("let texel = offset / 4;"));
        assert!(src.contains("return rgba[offset % 4];"));
    }

    #[test]
    fn float_literals_are_valid_wgsl() {
        assert_eq!(float_literal(5.0), "5.0f");
        assert_eq!(float_literal(1e-7), "1e-7f");
        assert_eq!(float_literal(-0.0), "(-0.0f)");
        assert_eq!(int_literal(-3), "(-3)");
    }

    #[test]
    fn rendering_is_deterministic() {
        assert_eq!(render(&module(Packing::Unpacked)), render(&module(Packing::Unpacked)));
    }
}
