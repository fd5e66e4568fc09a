//! Method signatures and overload sets.

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use super::JvmType;
use crate::error::{CompileError, CompileResult};

bitflags! {
    /// Subset of JVM method access flags the compiler distinguishes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodFlags: u16 {
        const STATIC = 0x0008;
        const VARARGS = 0x0080;
        const SYNTHETIC = 0x1000;
    }
}

/// A fully resolved method signature.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSignature {
    /// Internal name of the declaring class.
    pub owner: String,
    /// Method name; constructors use `<init>`.
    pub name: String,
    pub params: Vec<JvmType>,
    pub ret: JvmType,
    pub flags: MethodFlags,
}

impl MethodSignature {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        params: Vec<JvmType>,
        ret: JvmType,
        flags: MethodFlags,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            params,
            ret,
            flags,
        }
    }

    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// JVM method descriptor, e.g. `(ILjava/lang/String;)D`.
    pub fn descriptor(&self) -> String {
        let mut out = String::from("(");
        for p in &self.params {
            out.push_str(&p.descriptor());
        }
        out.push(')');
        out.push_str(&self.ret.descriptor());
        out
    }

    /// Human-readable form for overload diagnostics:
    /// `add(int, int): int`.
    pub fn display(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.display_name()).collect();
        format!("{}({}): {}", self.name, params.join(", "), self.ret)
    }
}

/// All overloads declared under one class, keyed by method name.
#[derive(Debug, Default, Clone)]
pub struct OverloadSet {
    methods: FxHashMap<String, Vec<MethodSignature>>,
}

impl OverloadSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a signature, rejecting a duplicate parameter list under the
    /// same name.
    pub fn add(&mut self, sig: MethodSignature) -> CompileResult<()> {
        let existing = self.methods.entry(sig.name.clone()).or_default();
        if existing.iter().any(|s| s.params == sig.params) {
            return Err(CompileError::overload(format!(
                "Duplicate method signature: {}",
                sig.display()
            )));
        }
        existing.push(sig);
        Ok(())
    }

    pub fn get(&self, name: &str) -> &[MethodSignature] {
        self.methods.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MethodSignature> {
        self.methods.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(params: Vec<JvmType>, ret: JvmType) -> MethodSignature {
        MethodSignature::new("Calc", "add", params, ret, MethodFlags::STATIC)
    }

    #[test]
    fn test_descriptor() {
        let s = sig(vec![JvmType::Int, JvmType::string()], JvmType::Double);
        assert_eq!(s.descriptor(), "(ILjava/lang/String;)D");
    }

    #[test]
    fn test_duplicate_params_rejected() {
        let mut set = OverloadSet::new();
        set.add(sig(vec![JvmType::Int], JvmType::Int)).unwrap();
        set.add(sig(vec![JvmType::Double], JvmType::Double)).unwrap();
        let err = set.add(sig(vec![JvmType::Int], JvmType::Double)).unwrap_err();
        assert!(err.to_string().contains("Duplicate method signature"));
    }

    #[test]
    fn test_display() {
        let s = sig(vec![JvmType::Int, JvmType::Int], JvmType::Int);
        assert_eq!(s.display(), "add(int, int): int");
    }
}
