//! # Shader Fragment Generator
//!
//! Translates an operator plus the layouts of its inputs into a pure function
//! `value = f(output index)`, expressed in a small typed IR.
//!
//! ## Submodules
//!
//! - [`ir`]: expressions, statements and functions of the IR
//! - [`validate`]: type checking; malformed IR is a generator defect
//! - [`wgsl`]: renders a [`ShaderModule`] to WGSL source
//! - [`eval`]: interprets a [`ShaderModule`] on the host
//! - [`generate`]: per-operator generators
//!
//! ## Program Shape
//!
//! A [`ShaderModule`] binds one texture per operand, named positionally
//! `A`, `B`, …, a list of scalar uniforms, optional helper functions and one
//! entry function. An entry taking the output index array (`process(m)`) runs
//! under a shared driver that decodes every output texel into an index;
//! an entry taking the flat offset is a texel-level `main` of its own
//! (`has_main`).

pub mod eval;
pub mod generate;
pub mod ir;
pub mod validate;
pub mod wgsl;

use crate::layout::TextureLayout;

use self::ir::{Function, Params};

/// One sampled input texture of a program.
#[derive(Debug, Clone, PartialEq)]
pub struct InputBinding {
    pub name: String,
    pub layout: TextureLayout,
}

impl InputBinding {
    /// Binding for operand `position`, named `A`, `B`, …, `Z`, `AA`, `AB`, ….
    #[must_use]
    pub fn new(position: usize, layout: TextureLayout) -> Self {
        Self {
            name: operand_name(position),
            layout,
        }
    }
}

/// Positional operand name.
#[must_use]
pub fn operand_name(position: usize) -> String {
    let mut name = Vec::new();
    let mut n = position + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        name.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

/// A complete generated program.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderModule {
    /// Operator label used in logs and errors.
    pub label: String,
    pub inputs: Vec<InputBinding>,
    pub output: TextureLayout,
    pub uniforms: Vec<String>,
    pub helpers: Vec<Function>,
    pub entry: Function,
}

impl ShaderModule {
    /// A module whose entry is `process(m)` over the output rank.
    #[must_use]
    pub fn indexed(label: &str, inputs: Vec<TextureLayout>, output: TextureLayout, body: Vec<ir::Stmt>) -> Self {
        let rank = output.rank();
        Self {
            label: label.to_owned(),
            inputs: bind_inputs(inputs),
            output,
            uniforms: Vec::new(),
            helpers: Vec::new(),
            entry: Function::new("process", Params::Indices(rank), body),
        }
    }

    /// A texel-level module whose entry receives the flat output offset.
    #[must_use]
    pub fn texel(label: &str, inputs: Vec<TextureLayout>, output: TextureLayout, body: Vec<ir::Stmt>) -> Self {
        Self {
            label: label.to_owned(),
            inputs: bind_inputs(inputs),
            output,
            uniforms: Vec::new(),
            helpers: Vec::new(),
            entry: Function::new("value_at", Params::Offset, body),
        }
    }

    #[must_use]
    pub fn with_helper(mut self, helper: Function) -> Self {
        self.helpers.push(helper);
        self
    }

    #[must_use]
    pub fn with_uniform(mut self, name: &str) -> Self {
        self.uniforms.push(name.to_owned());
        self
    }

    /// Whether the program provides its own texel-level entry point.
    #[must_use]
    pub fn has_main(&self) -> bool {
        self.entry.params == Params::Offset
    }

    /// Type-checks the module; see [`validate::validate`].
    ///
    /// # Errors
    /// Returns [`crate::Error::ShaderValidation`] for malformed IR.
    pub fn validate(&self) -> crate::Result<()> {
        validate::validate(self)
    }

    /// Renders the module to WGSL; see [`wgsl::render`].
    #[must_use]
    pub fn to_wgsl(&self) -> String {
        wgsl::render(self)
    }

    /// Layouts of the bound inputs, in binding order.
    #[must_use]
    pub fn input_layouts(&self) -> Vec<TextureLayout> {
        self.inputs.iter().map(|i| i.layout.clone()).collect()
    }
}

fn bind_inputs(layouts: Vec<TextureLayout>) -> Vec<InputBinding> {
    layouts
        .into_iter()
        .enumerate()
        .map(|(i, layout)| InputBinding::new(i, layout))
        .collect()
}
