//! Compiles a typed, JavaScript-shaped AST directly to JVM class files.
//!
//! The input is a [`kava_ast::Module`]; the output is one `.class` byte
//! image per generated class, verifiable under class file major version
//! 61. There is no intermediate representation: the compiler resolves
//! types and overloads, then walks the AST once per method body,
//! emitting bytecode and stack map frames together.
//!
//! ```no_run
//! use kava_ast::Module;
//! use kava_compiler::Compiler;
//!
//! # fn demo(module: Module) -> kava_compiler::CompileResult<()> {
//! let unit = Compiler::new().compile(&module)?;
//! for (name, bytes) in unit.iter() {
//!     std::fs::write(format!("{name}.class"), bytes).ok();
//! }
//! # Ok(())
//! # }
//! ```

pub mod consteval;
pub mod emit;
pub mod error;
pub mod infer;
pub mod literal;
pub mod overload;
pub mod regex;
pub mod types;

use std::collections::BTreeMap;

use kava_ast::Module;

pub use crate::error::{CompileError, CompileErrorKind, CompileResult};

/// The class files produced from one module, keyed by dotted class name
/// (`com.util.Point`).
#[derive(Debug, Default)]
pub struct CompiledUnit {
    classes: BTreeMap<String, Vec<u8>>,
}

impl CompiledUnit {
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.classes.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.classes.iter().map(|(n, b)| (n.as_str(), b.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<u8>> {
        self.classes
    }
}

/// Entry point for compilation. Stateless; exists so callers have a
/// place to hang future options.
#[derive(Debug, Default)]
pub struct Compiler {
    _priv: (),
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a module. The first diagnostic aborts the whole unit;
    /// nothing is produced on error.
    pub fn compile(&self, module: &Module) -> CompileResult<CompiledUnit> {
        let classes = emit::compile_module(module)?;
        Ok(CompiledUnit { classes })
    }
}

/// Convenience wrapper around [`Compiler::compile`].
pub fn compile(module: &Module) -> CompileResult<CompiledUnit> {
    Compiler::new().compile(module)
}
